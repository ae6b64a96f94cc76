use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::rcon::Rcon;
use crate::rpc::{Call, Handler, Replier, codes, require_str};
use crate::util::command::sanitize;

/// `execute.rcon`: run a console command and return its output.
pub struct ExecuteRcon {
  rcon: Option<Arc<Rcon>>,
}

impl ExecuteRcon {
  pub fn new(rcon: Option<Arc<Rcon>>) -> Self {
    Self { rcon }
  }
}

#[async_trait]
impl Handler for ExecuteRcon {
  async fn handle(&self, call: Call, replier: Replier) -> anyhow::Result<()> {
    if call.is_notification() {
      tracing::warn!("execute.rcon sent without an id; ignoring");
      return Ok(());
    }

    let raw = match require_str(&call, "command") {
      Ok(raw) => raw,
      Err(error) => return Ok(replier.fail(&call, error)?),
    };
    let Some(command) = sanitize(raw) else {
      replier.error(&call, codes::INVALID_PARAMS, "argument 'command' is blank")?;
      return Ok(());
    };
    let Some(rcon) = &self.rcon else {
      replier.error(&call, codes::SERVER_ERROR, "RCON service is unavailable.")?;
      return Ok(());
    };

    match rcon.execute_command(&command).await {
      Ok(output) => {
        tracing::info!(command = %command, "executed rcon command");
        replier.ok(&call, json!({ "output": output, "success": true }))?;
      }
      Err(err) => {
        tracing::warn!(command = %command, error = %err, "rcon command failed");
        replier.error(
          &call,
          codes::SERVER_ERROR,
          format!("Failed to execute RCON command: {err}"),
        )?;
      }
    }
    Ok(())
  }
}
