use std::time::Duration;

use crate::error::RpcError;

/// Version this build speaks on the wire.
pub const CLIENT_API_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_RETRIES: u32 = 10;
pub const DEFAULT_RCON_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_RCON_PORT: u16 = 25_575;

/// Everything the bridge needs to run.
#[derive(Debug, Clone, Default)]
pub struct BridgeConfig {
  pub websocket: WebSocketConfig,
  pub rcon: RconConfig,
  pub identity: ServerIdentity,
  /// Admit players while the backend link is down.
  pub allow_join_without_link: bool,
}

impl BridgeConfig {
  pub fn validate(&self) -> Result<(), RpcError> {
    self.websocket.endpoint().map(|_| ())
  }
}

/// Settings of the backend WebSocket link.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
  pub url: Option<String>,
  pub token: Option<String>,
  pub client_version: String,
  pub request_timeout: Duration,
  pub reconnect_delay: Duration,
  pub max_retries: u32,
  /// Log every inbound and outbound frame.
  pub debug: bool,
}

impl Default for WebSocketConfig {
  fn default() -> Self {
    Self {
      url: None,
      token: None,
      client_version: CLIENT_API_VERSION.to_string(),
      request_timeout: DEFAULT_REQUEST_TIMEOUT,
      reconnect_delay: DEFAULT_RECONNECT_DELAY,
      max_retries: DEFAULT_MAX_RETRIES,
      debug: false,
    }
  }
}

impl WebSocketConfig {
  /// Returns the URL and token, rejecting absent or blank values.
  pub fn endpoint(&self) -> Result<(&str, &str), RpcError> {
    let url = non_blank(self.url.as_deref())
      .ok_or_else(|| RpcError::Config("websocket url must be set".into()))?;
    let token = non_blank(self.token.as_deref())
      .ok_or_else(|| RpcError::Config("websocket token must be set".into()))?;
    Ok((url, token))
  }
}

/// Settings of the external Source RCON server.
#[derive(Debug, Clone)]
pub struct RconConfig {
  pub host: String,
  pub port: u16,
  /// RCON is considered unconfigured without a password.
  pub password: Option<String>,
  pub timeout: Duration,
}

impl Default for RconConfig {
  fn default() -> Self {
    Self {
      host: "127.0.0.1".to_string(),
      port: DEFAULT_RCON_PORT,
      password: None,
      timeout: DEFAULT_RCON_TIMEOUT,
    }
  }
}

impl RconConfig {
  pub fn is_configured(&self) -> bool {
    non_blank(self.password.as_deref()).is_some()
  }
}

/// What `get.client.info` reports about the hosting server.
#[derive(Debug, Clone)]
pub struct ServerIdentity {
  pub software: String,
  pub version: String,
  pub supports_placeholders: bool,
}

impl Default for ServerIdentity {
  fn default() -> Self {
    Self {
      software: "unknown".to_string(),
      version: "unknown".to_string(),
      supports_placeholders: false,
    }
  }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
  value.map(str::trim).filter(|value| !value.is_empty())
}
