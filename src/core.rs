use std::io::{self, IsTerminal};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tokio::sync::watch;

use crate::{
  bridge::Bridge,
  cli::Cli,
  config::BridgeConfig,
  error::RpcError,
  logging,
  rcon::Rcon,
  rpc::{ConnectionState, Transport},
  ui,
  util::command,
};

/// Exit status when the backend stayed unreachable for the whole budget.
pub const EXIT_RETRIES_EXHAUSTED: i32 = 3;
/// Exit status when a one-shot RCON command failed.
pub const EXIT_COMMAND_FAILED: i32 = 2;

const SUPERVISOR_GRACE: Duration = Duration::from_secs(2);

/// Orchestrate one invocation: the bridge, or a single RCON command.
pub async fn run(cli: Cli) -> Result<i32> {
  let use_color_stdout = !cli.plain && io::stdout().is_terminal();
  let use_color_logs = !cli.plain && io::stderr().is_terminal();

  logging::init(cli.verbose, use_color_logs);

  let config = cli.to_config();
  if cli.command.is_empty() {
    run_bridge(config, use_color_stdout).await
  } else {
    run_one_shot(&cli, &config, use_color_stdout).await
  }
}

async fn run_bridge(config: BridgeConfig, use_color: bool) -> Result<i32> {
  config.validate().context(
    "websocket url and token are required; supply --url/--token or set \
     FGATE_URL/FGATE_TOKEN",
  )?;

  let bridge = Bridge::standalone(
    config,
    Some(Arc::new(move |err: &RpcError| ui::render_fatal(err, use_color))),
  )?;
  ui::render_banner(&bridge.stats(), bridge.rcon().is_some(), use_color);

  let mut supervisor = bridge
    .start()
    .context("failed to start the websocket transport")?;
  let reporter = tokio::spawn(report_link_changes(
    Arc::clone(bridge.transport()),
    bridge.transport().subscribe(),
    use_color,
  ));
  bridge.warm_up_rcon().await;

  let finished = tokio::select! {
    signal = tokio::signal::ctrl_c() => {
      signal.context("failed to listen for ctrl-c")?;
      tracing::info!("interrupt received; shutting down");
      None
    }
    finished = &mut supervisor => {
      Some(finished.context("transport supervisor panicked")?)
    }
  };

  bridge.shutdown().await;
  reporter.abort();

  match finished {
    None => {
      if tokio::time::timeout(SUPERVISOR_GRACE, supervisor)
        .await
        .is_err()
      {
        tracing::warn!("transport did not stop in time");
      }
      Ok(0)
    }
    Some(Ok(())) => Ok(0),
    Some(Err(RpcError::RetriesExhausted(failures))) => {
      tracing::error!(failures, "backend unreachable; exiting");
      Ok(EXIT_RETRIES_EXHAUSTED)
    }
    Some(Err(err)) => Err(err).context("websocket transport failed"),
  }
}

async fn report_link_changes(
  transport: Arc<Transport>,
  mut state: watch::Receiver<ConnectionState>,
  use_color: bool,
) {
  let mut was_ready = false;
  while state.changed().await.is_ok() {
    let current = *state.borrow_and_update();
    match current {
      ConnectionState::Authenticated => {
        was_ready = true;
        let remote = transport.remote_version();
        ui::render_link_state(current, remote.as_deref(), use_color);
      }
      ConnectionState::Disconnected if was_ready => {
        was_ready = false;
        ui::render_link_state(current, None, use_color);
      }
      _ => {}
    }
  }
}

async fn run_one_shot(
  cli: &Cli,
  config: &BridgeConfig,
  use_color: bool,
) -> Result<i32> {
  let command_text = cli.command.join(" ");
  let command = command::sanitize(&command_text).ok_or_else(|| {
    anyhow!("command was empty after trimming whitespace")
  })?;
  if !config.rcon.is_configured() {
    return Err(anyhow!(
      "rcon password required; supply --rcon-password or set \
       FGATE_RCON_PASSWORD"
    ));
  }

  let rcon = Rcon::external(config.rcon.clone());
  let outcome = rcon.execute_command(&command).await;
  rcon.shutdown().await;

  match outcome {
    Ok(output) => {
      ui::render_output(&command, &output, use_color);
      Ok(0)
    }
    Err(err) => {
      tracing::debug!(error = %err, "one-shot command failed");
      ui::render_failure(&command, &err.to_string(), use_color);
      Ok(EXIT_COMMAND_FAILED)
    }
  }
}
