use owo_colors::OwoColorize;

use crate::bridge::ConnectionStats;
use crate::error::RpcError;
use crate::rpc::ConnectionState;

/// Print what the bridge is about to connect to.
pub fn render_banner(stats: &ConnectionStats, rcon_enabled: bool, use_color: bool) {
  let url = stats.url.as_deref().unwrap_or("<unset>");
  let rcon = if rcon_enabled { "enabled" } else { "disabled" };

  if use_color {
    println!("{} {}", "⇢".bright_cyan(), url.bold());
    println!(
      "  api {}  rcon {}",
      stats.client_version.bright_magenta(),
      rcon.cyan()
    );
  } else {
    println!("{url}");
    println!("  api {}  rcon {rcon}", stats.client_version);
  }

  println!();
}

/// Report a transition of the backend link that an operator cares about.
pub fn render_link_state(
  state: ConnectionState,
  remote_version: Option<&str>,
  use_color: bool,
) {
  match state {
    ConnectionState::Authenticated => {
      let version = remote_version.unwrap_or("unknown");
      if use_color {
        println!(
          "{} backend ready (api {})",
          "✔".green().bold(),
          version.bold()
        );
      } else {
        println!("backend ready (api {version})");
      }
    }
    ConnectionState::Disconnected => {
      if use_color {
        println!("{} backend link down", "⚠".yellow().bold());
      } else {
        println!("backend link down");
      }
    }
    _ => {}
  }
}

/// The reconnect budget ran out.
pub fn render_fatal(err: &RpcError, use_color: bool) {
  if use_color {
    eprintln!("{} {}", "✖ FATAL".red().bold(), err.to_string().red());
  } else {
    eprintln!("FATAL {err}");
  }
}

/// Show the output of a one-shot RCON command.
pub fn render_output(command: &str, output: &str, use_color: bool) {
  if use_color {
    println!("{} {command}", "✔ OK".green().bold());
  } else {
    println!("OK {command}");
  }

  for line in output.lines() {
    if use_color {
      println!("  {}", line.cyan());
    } else {
      println!("  {line}");
    }
  }

  println!();
}

pub fn render_failure(command: &str, error: &str, use_color: bool) {
  if use_color {
    println!("{} {command}", "✖ ERR".red().bold());
    println!("  {} {}", "⚠ ERROR".yellow().bold(), error.red().bold());
  } else {
    println!("ERR {command}");
    println!("  ERROR {error}");
  }

  println!();
}
