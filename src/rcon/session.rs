use std::future::Future;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout as await_timeout;

use super::packet::{PacketType, RconPacket};
use crate::error::RconError;

/// How many frames we tolerate before the AUTH_RESPONSE shows up.
const MAX_AUTH_FRAMES: usize = 4;

/// One authenticated Source RCON connection.
///
/// The wire protocol has no way to match concurrent responses beyond the
/// echoed id, so callers must serialise [`RconSession::exec`].
#[derive(Debug)]
pub struct RconSession<S> {
  stream: S,
  timeout: Duration,
  next_id: i32,
  authenticated: bool,
  /// Sentinel of the previous exec; some servers echo it twice.
  stale_sentinel: Option<i32>,
}

impl RconSession<TcpStream> {
  /// Open a TCP connection and run the AUTH handshake.
  pub async fn connect(
    host: &str,
    port: u16,
    password: &str,
    deadline: Duration,
  ) -> Result<Self, RconError> {
    let stream = await_timeout(deadline, TcpStream::connect((host, port)))
      .await
      .map_err(|_| RconError::Timeout("connect", deadline))??;
    stream.set_nodelay(true)?;

    let mut session = Self::new(stream, deadline);
    session.authenticate(password).await?;
    Ok(session)
  }
}

impl<S> RconSession<S>
where
  S: AsyncRead + AsyncWrite + Unpin,
{
  /// Wrap an already connected stream. Call [`Self::authenticate`] next.
  pub fn new(stream: S, timeout: Duration) -> Self {
    Self {
      stream,
      timeout,
      next_id: 1,
      authenticated: false,
      stale_sentinel: None,
    }
  }

  pub fn is_authenticated(&self) -> bool {
    self.authenticated
  }

  /// Send the AUTH packet and wait for the AUTH_RESPONSE.
  ///
  /// An echoed id of `-1` means the password was rejected; the session is
  /// then useless and must be dropped.
  pub async fn authenticate(&mut self, password: &str) -> Result<(), RconError> {
    if self.authenticated {
      return Err(RconError::Protocol(
        "session is already authenticated".to_string(),
      ));
    }

    let id = self.allocate_id();
    tracing::debug!(id, "--> AUTH <redacted>");
    self
      .send(&RconPacket::new(id, PacketType::Auth, password))
      .await?;

    // Source servers send an empty RESPONSE_VALUE ahead of the real answer.
    for _ in 0..MAX_AUTH_FRAMES {
      let reply = self.receive().await?;
      if reply.id == -1 {
        return Err(RconError::Auth);
      }
      match reply.kind {
        PacketType::ResponseValue => continue,
        PacketType::ExecCommand if reply.id == id => {
          self.authenticated = true;
          tracing::debug!(id, "<-- AUTH_RESPONSE accepted");
          return Ok(());
        }
        _ => {
          return Err(RconError::IdMismatch {
            expected: id,
            actual: reply.id,
          });
        }
      }
    }

    Err(RconError::Protocol(
      "server never sent an AUTH_RESPONSE".to_string(),
    ))
  }

  /// Execute one command and return the response body.
  ///
  /// Long output arrives split over several RESPONSE_VALUE packets with the
  /// command's id. An empty RESPONSE_VALUE with a fresh id follows the
  /// command; the server answers it only after the whole output, so its
  /// echo marks the end of the body.
  pub async fn exec(&mut self, command: &str) -> Result<String, RconError> {
    if !self.authenticated {
      return Err(RconError::Protocol(
        "exec before authentication".to_string(),
      ));
    }

    let id = self.allocate_id();
    let sentinel = self.allocate_id();
    tracing::debug!(id, "--> {}", command);
    self
      .send(&RconPacket::new(id, PacketType::ExecCommand, command))
      .await?;
    self
      .send(&RconPacket::new(sentinel, PacketType::ResponseValue, ""))
      .await?;

    let mut body = String::new();
    let mut fragments = 0usize;
    loop {
      let reply = self.receive().await?;
      if reply.id == id {
        body.push_str(&reply.body);
        fragments += 1;
      } else if reply.id == sentinel {
        break;
      } else if Some(reply.id) == self.stale_sentinel {
        continue;
      } else {
        return Err(RconError::IdMismatch {
          expected: id,
          actual: reply.id,
        });
      }
    }
    self.stale_sentinel = Some(sentinel);

    let body = body.trim().to_string();
    tracing::debug!(id, fragments, bytes = body.len(), "<-- response");
    Ok(body)
  }

  /// Hand out the next request id, wrapping back to 1 after `i32::MAX`.
  fn allocate_id(&mut self) -> i32 {
    let id = self.next_id;
    self.next_id = if id == i32::MAX { 1 } else { id + 1 };
    id
  }

  async fn send(&mut self, packet: &RconPacket) -> Result<(), RconError> {
    with_timeout(self.timeout, "write", packet.write_to(&mut self.stream))
      .await
  }

  async fn receive(&mut self) -> Result<RconPacket, RconError> {
    with_timeout(self.timeout, "read", RconPacket::read_from(&mut self.stream))
      .await
  }
}

async fn with_timeout<F, T>(
  duration: Duration,
  operation: &'static str,
  future: F,
) -> Result<T, RconError>
where
  F: Future<Output = Result<T, RconError>>,
{
  match await_timeout(duration, future).await {
    Ok(result) => result,
    Err(_) => Err(RconError::Timeout(operation, duration)),
  }
}
