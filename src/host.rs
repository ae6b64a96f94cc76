//! Narrow interfaces onto the game server hosting the bridge.
//!
//! Implementations that touch live game state must hop onto the server's own
//! thread themselves; the bridge calls them from worker tasks.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ServerIdentity;
use crate::rcon::Rcon;

/// Runs a console command as the server operator.
#[async_trait]
pub trait ConsoleDispatcher: Send + Sync {
  /// Returns whether the server accepted the command.
  async fn dispatch(&self, command: &str) -> anyhow::Result<bool>;
}

/// Finds online players by name or uuid.
#[async_trait]
pub trait PlayerDirectory: Send + Sync {
  /// Returns `false` when no such player is online.
  async fn kick(&self, identifier: &str, reason: &str) -> anyhow::Result<bool>;
}

/// Sends a message to everyone on the server.
#[async_trait]
pub trait Broadcaster: Send + Sync {
  async fn broadcast(&self, message: &str) -> anyhow::Result<()>;
}

/// Static facts about the hosting server.
pub trait ServerInfo: Send + Sync {
  fn identity(&self) -> ServerIdentity;
}

impl ServerInfo for ServerIdentity {
  fn identity(&self) -> ServerIdentity {
    self.clone()
  }
}

/// Host used when the bridge runs beside the server instead of inside it.
///
/// Player-facing actions become vanilla console commands over RCON.
pub struct RconHost {
  rcon: Option<Arc<Rcon>>,
}

impl RconHost {
  pub fn new(rcon: Option<Arc<Rcon>>) -> Self {
    Self { rcon }
  }

  async fn run(&self, command: &str) -> anyhow::Result<Option<String>> {
    let Some(rcon) = &self.rcon else {
      tracing::warn!(command, "rcon is not configured; dropping command");
      return Ok(None);
    };
    Ok(Some(rcon.execute_command(command).await?))
  }
}

#[async_trait]
impl PlayerDirectory for RconHost {
  async fn kick(&self, identifier: &str, reason: &str) -> anyhow::Result<bool> {
    let reason = single_line(reason);
    let Some(output) = self.run(&format!("kick {identifier} {reason}")).await?
    else {
      return Ok(false);
    };

    // Vanilla servers answer "No player was found" for unknown targets.
    let found = !output.to_ascii_lowercase().contains("no player");
    if found {
      tracing::info!(player = identifier, reason, "kicked player");
    } else {
      tracing::warn!(player = identifier, "no such player to kick");
    }
    Ok(found)
  }
}

#[async_trait]
impl Broadcaster for RconHost {
  async fn broadcast(&self, message: &str) -> anyhow::Result<()> {
    let message = single_line(message);
    if self.run(&format!("say {message}")).await?.is_some() {
      tracing::info!(message, "broadcasted message");
    }
    Ok(())
  }
}

/// Console commands are line oriented.
fn single_line(text: &str) -> String {
  text
    .lines()
    .map(str::trim)
    .filter(|line| !line.is_empty())
    .collect::<Vec<_>>()
    .join(" ")
}
