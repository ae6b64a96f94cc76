pub mod bridge;
pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod handlers;
pub mod host;
pub mod logging;
pub mod outbound;
pub mod rcon;
pub mod rpc;
pub mod runtime;
pub mod ui;
pub mod util;

pub use bridge::{Bridge, ConnectionStats, HostServices};
pub use cli::Cli;
pub use config::{BridgeConfig, RconConfig, ServerIdentity, WebSocketConfig};
pub use core::run;
pub use error::{RconError, RegistryError, RpcError};
pub use outbound::{Backend, JoinDecision, PlayerLogin};
pub use rcon::Rcon;
pub use runtime::Runtime;
pub use util::command;
