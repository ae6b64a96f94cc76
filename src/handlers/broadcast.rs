use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::host::Broadcaster;
use crate::rpc::{Call, Handler, Replier, codes, require_str};

/// `broadcast.message`: show a message to every online player.
pub struct BroadcastMessage {
  broadcaster: Arc<dyn Broadcaster>,
}

impl BroadcastMessage {
  pub fn new(broadcaster: Arc<dyn Broadcaster>) -> Self {
    Self { broadcaster }
  }
}

#[async_trait]
impl Handler for BroadcastMessage {
  async fn handle(&self, call: Call, replier: Replier) -> anyhow::Result<()> {
    let message = match require_str(&call, "message") {
      Ok(message) => message,
      Err(error) => {
        tracing::warn!("broadcast.message without a message");
        return Ok(replier.fail(&call, error)?);
      }
    };

    match self.broadcaster.broadcast(message).await {
      Ok(()) => replier.ok(&call, json!({ "success": true }))?,
      Err(err) => {
        tracing::warn!(error = %err, "broadcast failed");
        replier.error(
          &call,
          codes::SERVER_ERROR,
          format!("Failed to broadcast message: {err}"),
        )?;
      }
    }
    Ok(())
  }
}
