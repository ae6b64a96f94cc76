use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::host::PlayerDirectory;
use crate::rpc::{Call, Handler, Replier, codes, optional_str};

pub const DEFAULT_KICK_REASON: &str = "You are kicked from this server.";

/// `kick.player`: disconnect a player by name or uuid.
pub struct KickPlayer {
  players: Arc<dyn PlayerDirectory>,
}

impl KickPlayer {
  pub fn new(players: Arc<dyn PlayerDirectory>) -> Self {
    Self { players }
  }
}

#[async_trait]
impl Handler for KickPlayer {
  async fn handle(&self, call: Call, replier: Replier) -> anyhow::Result<()> {
    let Some(target) =
      optional_str(&call, "player").or_else(|| optional_str(&call, "uuid"))
    else {
      tracing::warn!("kick.player without a player or uuid");
      replier.error(
        &call,
        codes::INVALID_PARAMS,
        "argument 'player' or 'uuid' is required but missing",
      )?;
      return Ok(());
    };
    let reason = optional_str(&call, "reason").unwrap_or(DEFAULT_KICK_REASON);

    match self.players.kick(target, reason).await {
      Ok(kicked) => replier.ok(&call, json!({ "success": kicked }))?,
      Err(err) => {
        tracing::warn!(player = %target, error = %err, "kick failed");
        replier.error(
          &call,
          codes::SERVER_ERROR,
          format!("Failed to kick {target}: {err}"),
        )?;
      }
    }
    Ok(())
  }
}
