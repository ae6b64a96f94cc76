use std::io;
use std::time::Duration;

use thiserror::Error;

/// Failures surfaced by the WebSocket RPC core.
#[derive(Error, Debug, Clone)]
pub enum RpcError {
  /// Required connection settings are missing or invalid.
  #[error("invalid configuration: {0}")]
  Config(String),

  /// DNS, TCP or WebSocket handshake failure.
  #[error("connection failed: {0}")]
  Connect(String),

  /// The transport is not authenticated, so nothing can be sent.
  #[error("websocket is not connected")]
  NotConnected,

  /// The peer advertised an API version older than ours.
  #[error("remote api version {remote} is older than required {required}")]
  ProtocolVersion { remote: String, required: String },

  /// An inbound frame could not be decoded.
  #[error("malformed payload: {0}")]
  Parse(String),

  /// No handler is registered for the method.
  #[error("unknown method `{0}`")]
  UnknownMethod(String),

  /// No response arrived before the deadline.
  #[error("{method} request {id} timed out after {} ms", .after.as_millis())]
  Timeout {
    method: String,
    id: String,
    after: Duration,
  },

  /// The connection went away while the request was pending.
  #[error("connection closed before a response arrived")]
  ConnectionClosed,

  /// The reconnect budget is spent.
  #[error("gave up after {0} consecutive connection failures")]
  RetriesExhausted(u32),

  /// Outbound serialisation failed.
  #[error("serialization error: {0}")]
  Serialization(String),

  /// The peer answered with a JSON-RPC error object.
  #[error("remote error {code}: {message}")]
  Remote { code: i64, message: String },
}

impl From<serde_json::Error> for RpcError {
  fn from(err: serde_json::Error) -> Self {
    Self::Serialization(err.to_string())
  }
}

/// Failures of the RCON side channel.
#[derive(Error, Debug)]
pub enum RconError {
  /// Socket level failure (connect, read, write).
  #[error("rcon i/o error: {0}")]
  Io(#[from] io::Error),

  /// The server rejected the password (echoed id -1).
  #[error("rcon authentication rejected")]
  Auth,

  /// The server answered with an id other than the one we sent.
  #[error("rcon response id {actual} does not match request id {expected}")]
  IdMismatch { expected: i32, actual: i32 },

  /// A packet violated the wire format.
  #[error("rcon protocol violation: {0}")]
  Protocol(String),

  /// A read, write or dispatch exceeded its deadline.
  #[error("rcon {0} timed out after {ms} ms", ms = .1.as_millis())]
  Timeout(&'static str, Duration),

  /// RCON is not configured for this bridge.
  #[error("rcon service is unavailable")]
  Unavailable,

  /// The host console dispatcher failed.
  #[error("console dispatch failed: {0}")]
  Dispatch(String),
}

impl RconError {
  /// Whether this failure leaves the session unusable.
  pub fn is_fatal_to_session(&self) -> bool {
    !matches!(self, Self::Unavailable | Self::Dispatch(_))
  }
}

/// Configuration mistakes while wiring handlers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
  #[error("a handler for `{0}` is already registered")]
  DuplicateMethod(String),
}
