use std::time::Duration;

use clap::{ArgAction, Parser};

use crate::config::{
  BridgeConfig, CLIENT_API_VERSION, DEFAULT_RCON_PORT, RconConfig,
  ServerIdentity, WebSocketConfig,
};

/// Command-line arguments for the FGate client.
#[derive(Parser, Debug, Clone)]
#[command(
  author,
  version,
  about = "Bridge a game server to the FGate management backend",
  trailing_var_arg = true
)]
pub struct Cli {
  /// WebSocket endpoint of the backend, e.g. ws://host:port/ws.
  #[arg(long, env = "FGATE_URL")]
  pub url: Option<String>,

  /// Bearer token presented during the upgrade.
  #[arg(long, env = "FGATE_TOKEN", hide_env_values = true)]
  pub token: Option<String>,

  /// API version advertised to the backend.
  #[arg(long, default_value = CLIENT_API_VERSION)]
  pub api_version: String,

  /// How long an outbound request waits for its response.
  #[arg(long, default_value_t = 5_000, value_name = "MILLISECONDS")]
  pub request_timeout_ms: u64,

  /// Pause between reconnect attempts.
  #[arg(long, default_value_t = 1_000, value_name = "MILLISECONDS")]
  pub reconnect_delay_ms: u64,

  /// Consecutive connection failures tolerated before giving up.
  #[arg(long, default_value_t = 10)]
  pub max_retries: u32,

  /// Admit players while the backend link is down.
  #[arg(long)]
  pub allow_join_without_link: bool,

  /// Hostname or IP address of the game server's RCON listener.
  #[arg(long, env = "FGATE_RCON_HOST", default_value = "127.0.0.1")]
  pub rcon_host: String,

  /// RCON port.
  #[arg(long, env = "FGATE_RCON_PORT", default_value_t = DEFAULT_RCON_PORT)]
  pub rcon_port: u16,

  /// RCON password; RCON stays disabled without one.
  #[arg(long, env = "FGATE_RCON_PASSWORD", hide_env_values = true)]
  pub rcon_password: Option<String>,

  /// RCON I/O timeout.
  #[arg(long, default_value_t = 10_000, value_name = "MILLISECONDS")]
  pub rcon_timeout_ms: u64,

  /// Server software reported by `get.client.info`.
  #[arg(long, default_value = "unknown")]
  pub server_software: String,

  /// Server version reported by `get.client.info`.
  #[arg(long, default_value = "unknown")]
  pub server_version: String,

  /// Increase logging verbosity (repeat for TRACE).
  #[arg(short, long, action = ArgAction::Count)]
  pub verbose: u8,

  /// Disable ANSI color output.
  #[arg(long)]
  pub plain: bool,

  /// Log every WebSocket frame.
  #[arg(long)]
  pub debug: bool,

  /// One-shot RCON command executed instead of starting the bridge.
  #[arg(value_name = "COMMAND")]
  pub command: Vec<String>,
}

impl Cli {
  pub fn to_config(&self) -> BridgeConfig {
    BridgeConfig {
      websocket: WebSocketConfig {
        url: self.url.clone(),
        token: self.token.clone(),
        client_version: self.api_version.clone(),
        request_timeout: Duration::from_millis(self.request_timeout_ms),
        reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
        max_retries: self.max_retries,
        debug: self.debug,
      },
      rcon: RconConfig {
        host: self.rcon_host.clone(),
        port: self.rcon_port,
        password: self.rcon_password.clone(),
        timeout: Duration::from_millis(self.rcon_timeout_ms),
      },
      identity: ServerIdentity {
        software: self.server_software.clone(),
        version: self.server_version.clone(),
        supports_placeholders: false,
      },
      allow_join_without_link: self.allow_join_without_link,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use clap::CommandFactory;

  #[test]
  fn arguments_are_consistent() {
    Cli::command().debug_assert();
  }

  #[test]
  fn flags_map_onto_the_bridge_config() {
    let cli = Cli::try_parse_from([
      "fgate-client",
      "--url",
      "ws://backend:8080/ws",
      "--token",
      "t0ken",
      "--api-version",
      "2.1.0",
      "--max-retries",
      "3",
      "--reconnect-delay-ms",
      "250",
      "--rcon-password",
      "pw",
      "--debug",
    ])
    .unwrap();
    let config = cli.to_config();

    assert_eq!(config.websocket.endpoint().unwrap(), ("ws://backend:8080/ws", "t0ken"));
    assert_eq!(config.websocket.client_version, "2.1.0");
    assert_eq!(config.websocket.max_retries, 3);
    assert_eq!(config.websocket.reconnect_delay, Duration::from_millis(250));
    assert_eq!(config.websocket.request_timeout, Duration::from_secs(5));
    assert!(config.websocket.debug);
    assert!(config.rcon.is_configured());
    assert_eq!(config.rcon.port, 25_575);
    assert!(cli.command.is_empty());
  }

  #[test]
  fn trailing_words_form_a_one_shot_command() {
    let cli = Cli::try_parse_from(["fgate-client", "--rcon-password", "pw", "say", "hello"])
      .unwrap();
    assert_eq!(cli.command.join(" "), "say hello");
  }
}
