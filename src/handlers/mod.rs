//! Handlers for methods the backend calls on us.

mod broadcast;
mod client_info;
mod execute_rcon;
mod kick_player;

use std::sync::Arc;

pub use broadcast::BroadcastMessage;
pub use client_info::ClientInfo;
pub use execute_rcon::ExecuteRcon;
pub use kick_player::{DEFAULT_KICK_REASON, KickPlayer};

use crate::error::RegistryError;
use crate::host::{Broadcaster, PlayerDirectory, ServerInfo};
use crate::rcon::Rcon;
use crate::rpc::HandlerRegistry;

pub const GET_CLIENT_INFO: &str = "get.client.info";
pub const EXECUTE_RCON: &str = "execute.rcon";
pub const KICK_PLAYER: &str = "kick.player";
pub const BROADCAST_MESSAGE: &str = "broadcast.message";

/// Collaborators the default handlers delegate to.
#[derive(Clone)]
pub struct HandlerDeps {
  pub server: Arc<dyn ServerInfo>,
  pub rcon: Option<Arc<Rcon>>,
  pub players: Arc<dyn PlayerDirectory>,
  pub broadcaster: Arc<dyn Broadcaster>,
}

/// Register the four built-in methods.
pub fn register_defaults(
  registry: &mut HandlerRegistry,
  deps: HandlerDeps,
) -> Result<(), RegistryError> {
  registry
    .register(
      GET_CLIENT_INFO,
      Arc::new(ClientInfo::new(deps.server, deps.rcon.clone())),
    )?
    .register(EXECUTE_RCON, Arc::new(ExecuteRcon::new(deps.rcon)))?
    .register(KICK_PLAYER, Arc::new(KickPlayer::new(deps.players)))?
    .register(
      BROADCAST_MESSAGE,
      Arc::new(BroadcastMessage::new(deps.broadcaster)),
    )?;
  Ok(())
}
