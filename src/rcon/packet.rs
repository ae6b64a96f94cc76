use std::fmt;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::RconError;

/// Bytes that follow the length prefix besides the body: id, type, two NULs.
const HEADER_AND_TRAILER: usize = 4 + 4 + 2;

/// Upper bound accepted for the length prefix of an inbound packet.
pub const MAX_PACKET_LEN: usize = 1 << 20;

/// Source RCON packet types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
  /// `SERVERDATA_RESPONSE_VALUE`.
  ResponseValue,
  /// `SERVERDATA_EXECCOMMAND` outbound, `SERVERDATA_AUTH_RESPONSE` inbound.
  ExecCommand,
  /// `SERVERDATA_AUTH`.
  Auth,
  /// Anything a server sends that we do not model.
  Other(i32),
}

impl PacketType {
  pub const AUTH_RESPONSE: Self = Self::ExecCommand;

  pub const fn as_i32(self) -> i32 {
    match self {
      Self::ResponseValue => 0,
      Self::ExecCommand => 2,
      Self::Auth => 3,
      Self::Other(raw) => raw,
    }
  }

  pub const fn from_i32(raw: i32) -> Self {
    match raw {
      0 => Self::ResponseValue,
      2 => Self::ExecCommand,
      3 => Self::Auth,
      other => Self::Other(other),
    }
  }
}

impl fmt::Display for PacketType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::ResponseValue => f.write_str("RESPONSE_VALUE"),
      Self::ExecCommand => f.write_str("EXECCOMMAND"),
      Self::Auth => f.write_str("AUTH"),
      Self::Other(raw) => write!(f, "type {raw}"),
    }
  }
}

/// One RCON frame.
///
/// On the wire: `i32 LE length` (counting everything after itself),
/// `i32 LE id`, `i32 LE type`, UTF-8 body, two NUL bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RconPacket {
  pub id: i32,
  pub kind: PacketType,
  pub body: String,
}

impl RconPacket {
  pub fn new(id: i32, kind: PacketType, body: impl Into<String>) -> Self {
    Self {
      id,
      kind,
      body: body.into(),
    }
  }

  /// Serialise the packet including its length prefix.
  pub fn encode(&self) -> Vec<u8> {
    let body = self.body.as_bytes();
    let length = HEADER_AND_TRAILER + body.len();

    let mut buffer = Vec::with_capacity(4 + length);
    buffer.extend_from_slice(&(length as i32).to_le_bytes());
    buffer.extend_from_slice(&self.id.to_le_bytes());
    buffer.extend_from_slice(&self.kind.as_i32().to_le_bytes());
    buffer.extend_from_slice(body);
    buffer.extend_from_slice(&[0, 0]);
    buffer
  }

  /// Decode a complete frame, length prefix included.
  pub fn decode(bytes: &[u8]) -> Result<Self, RconError> {
    let (prefix, rest) = bytes.split_at_checked(4).ok_or_else(|| {
      RconError::Protocol("packet shorter than its length prefix".to_string())
    })?;
    let length = checked_length(read_i32(prefix))?;
    if rest.len() != length {
      return Err(RconError::Protocol(format!(
        "length prefix says {length} bytes but {} followed",
        rest.len()
      )));
    }
    Self::decode_payload(rest)
  }

  /// Decode the bytes that follow the length prefix.
  fn decode_payload(payload: &[u8]) -> Result<Self, RconError> {
    if payload.len() < HEADER_AND_TRAILER {
      return Err(RconError::Protocol(format!(
        "packet of {} bytes is below the {HEADER_AND_TRAILER} byte minimum",
        payload.len()
      )));
    }

    let id = read_i32(&payload[0..4]);
    let kind = PacketType::from_i32(read_i32(&payload[4..8]));
    let body_bytes = &payload[8..payload.len() - 2];
    let body = String::from_utf8_lossy(body_bytes)
      .trim_end_matches('\0')
      .to_string();

    Ok(Self { id, kind, body })
  }

  /// Read exactly one frame from `reader`.
  pub async fn read_from<R>(reader: &mut R) -> Result<Self, RconError>
  where
    R: AsyncRead + Unpin,
  {
    let mut prefix = [0u8; 4];
    reader.read_exact(&mut prefix).await?;
    let length = checked_length(i32::from_le_bytes(prefix))?;

    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await?;
    Self::decode_payload(&payload)
  }

  /// Write the encoded frame to `writer` and flush it.
  pub async fn write_to<W>(&self, writer: &mut W) -> Result<(), RconError>
  where
    W: AsyncWrite + Unpin,
  {
    writer.write_all(&self.encode()).await?;
    writer.flush().await?;
    Ok(())
  }
}

fn read_i32(bytes: &[u8]) -> i32 {
  let mut raw = [0u8; 4];
  raw.copy_from_slice(&bytes[..4]);
  i32::from_le_bytes(raw)
}

fn checked_length(raw: i32) -> Result<usize, RconError> {
  let length = usize::try_from(raw).map_err(|_| {
    RconError::Protocol(format!("negative packet length {raw}"))
  })?;
  if !(HEADER_AND_TRAILER..=MAX_PACKET_LEN).contains(&length) {
    return Err(RconError::Protocol(format!(
      "packet length {length} outside {HEADER_AND_TRAILER}..={MAX_PACKET_LEN}"
    )));
  }
  Ok(length)
}
