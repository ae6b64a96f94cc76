//! JSON-RPC over a single WebSocket connection.

mod correlator;
mod envelope;
mod registry;
mod router;
mod transport;
mod version;

use std::fmt;

pub use correlator::{Correlator, ResponseHandle};
pub use envelope::{
  Envelope, ErrorObject, JSONRPC_VERSION, Malformed, Notification, Request,
  RequestId, Response, SystemMessage, codes,
};
pub use registry::{
  Call, Handler, HandlerRegistry, Replier, optional_str, require_str,
};
pub use router::Router;
pub use transport::{API_VERSION_HEADER, FatalHandler, Transport};
pub use version::{ApiVersion, ParseVersionError, compare_versions};

use crate::error::RpcError;

/// Lifecycle of the backend connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
  Disconnected,
  Connecting,
  /// Socket is up but the welcome handshake has not passed yet.
  Open,
  Authenticated,
  Closing,
}

impl ConnectionState {
  pub const fn as_str(self) -> &'static str {
    match self {
      Self::Disconnected => "disconnected",
      Self::Connecting => "connecting",
      Self::Open => "open",
      Self::Authenticated => "authenticated",
      Self::Closing => "closing",
    }
  }
}

impl fmt::Display for ConnectionState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Anything that can put an envelope on the wire.
pub trait Outbound: Send + Sync {
  fn send(&self, envelope: &Envelope) -> Result<(), RpcError>;
}
