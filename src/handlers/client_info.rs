use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::host::ServerInfo;
use crate::rcon::Rcon;
use crate::rpc::{Call, Handler, Replier};

/// `get.client.info`: what server software we run beside.
pub struct ClientInfo {
  server: Arc<dyn ServerInfo>,
  rcon: Option<Arc<Rcon>>,
}

impl ClientInfo {
  pub fn new(server: Arc<dyn ServerInfo>, rcon: Option<Arc<Rcon>>) -> Self {
    Self { server, rcon }
  }
}

#[async_trait]
impl Handler for ClientInfo {
  async fn handle(&self, call: Call, replier: Replier) -> anyhow::Result<()> {
    if call.is_notification() {
      tracing::warn!("get.client.info sent without an id; ignoring");
      return Ok(());
    }

    let identity = self.server.identity();
    let supports_rcon = self.rcon.as_deref().is_some_and(Rcon::is_available);
    replier.ok(
      &call,
      json!({
        "data": {
          "minecraft_version": identity.version,
          "minecraft_software": identity.software,
          "supports_papi": identity.supports_placeholders,
          "supports_rcon": supports_rcon,
        }
      }),
    )?;
    Ok(())
  }
}
