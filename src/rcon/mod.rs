//! Command execution side channel.
//!
//! Commands either go to the host's own console dispatcher (built-in mode) or
//! over a Source RCON socket to an external server (external mode).

mod packet;
mod session;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout as await_timeout;

use crate::config::RconConfig;
use crate::error::RconError;
use crate::host::ConsoleDispatcher;

pub use packet::{MAX_PACKET_LEN, PacketType, RconPacket};
pub use session::RconSession;

/// Entry point used by handlers to run console commands.
pub enum Rcon {
  Builtin(BuiltinConsole),
  External(ExternalRcon),
}

impl Rcon {
  pub fn builtin(
    dispatcher: Arc<dyn ConsoleDispatcher>,
    timeout: Duration,
  ) -> Self {
    Self::Builtin(BuiltinConsole::new(dispatcher, timeout))
  }

  pub fn external(config: RconConfig) -> Self {
    Self::External(ExternalRcon::new(config))
  }

  pub fn is_available(&self) -> bool {
    match self {
      Self::Builtin(_) => true,
      Self::External(external) => external.is_connected(),
    }
  }

  pub async fn execute_command(
    &self,
    command: &str,
  ) -> Result<String, RconError> {
    match self {
      Self::Builtin(console) => console.execute(command).await,
      Self::External(external) => external.execute(command).await,
    }
  }

  /// Establish the external session ahead of the first command.
  pub async fn warm_up(&self) -> Result<(), RconError> {
    match self {
      Self::Builtin(_) => Ok(()),
      Self::External(external) => external.ensure_session().await,
    }
  }

  pub async fn shutdown(&self) {
    if let Self::External(external) = self {
      external.close().await;
    }
  }
}

/// Runs commands through the host process itself.
pub struct BuiltinConsole {
  dispatcher: Arc<dyn ConsoleDispatcher>,
  timeout: Duration,
}

impl BuiltinConsole {
  pub fn new(dispatcher: Arc<dyn ConsoleDispatcher>, timeout: Duration) -> Self {
    Self {
      dispatcher,
      timeout,
    }
  }

  /// The host dispatcher may block on its main thread, hence the deadline.
  pub async fn execute(&self, command: &str) -> Result<String, RconError> {
    let accepted = await_timeout(self.timeout, self.dispatcher.dispatch(command))
      .await
      .map_err(|_| RconError::Timeout("console dispatch", self.timeout))?
      .map_err(|err| RconError::Dispatch(format!("{err:#}")))?;

    Ok(if accepted { "Success" } else { "Failed" }.to_string())
  }
}

/// Lazily connected Source RCON client.
///
/// The session slot doubles as the per-session exec lock: holding the mutex
/// across send-then-read keeps responses in request order.
pub struct ExternalRcon {
  config: RconConfig,
  session: Mutex<Option<RconSession<TcpStream>>>,
  connected: AtomicBool,
}

impl ExternalRcon {
  pub fn new(config: RconConfig) -> Self {
    Self {
      config,
      session: Mutex::new(None),
      connected: AtomicBool::new(false),
    }
  }

  pub fn is_connected(&self) -> bool {
    self.connected.load(Ordering::SeqCst)
  }

  pub async fn ensure_session(&self) -> Result<(), RconError> {
    let mut slot = self.session.lock().await;
    self.open_if_needed(&mut slot).await
  }

  pub async fn execute(&self, command: &str) -> Result<String, RconError> {
    let mut slot = self.session.lock().await;
    self.open_if_needed(&mut slot).await?;

    let Some(session) = slot.as_mut() else {
      return Err(RconError::Unavailable);
    };

    match session.exec(command).await {
      Ok(body) => Ok(body),
      Err(err) => {
        if err.is_fatal_to_session() {
          tracing::warn!(error = %err, "dropping rcon session");
          *slot = None;
          self.connected.store(false, Ordering::SeqCst);
        }
        Err(err)
      }
    }
  }

  pub async fn close(&self) {
    let mut slot = self.session.lock().await;
    if slot.take().is_some() {
      tracing::info!("rcon session closed");
    }
    self.connected.store(false, Ordering::SeqCst);
  }

  async fn open_if_needed(
    &self,
    slot: &mut Option<RconSession<TcpStream>>,
  ) -> Result<(), RconError> {
    if slot.is_some() {
      return Ok(());
    }

    let Some(password) = self.config.password.as_deref() else {
      return Err(RconError::Unavailable);
    };

    let session = RconSession::connect(
      &self.config.host,
      self.config.port,
      password,
      self.config.timeout,
    )
    .await
    .inspect_err(|err| {
      tracing::warn!(
        host = %self.config.host,
        port = self.config.port,
        error = %err,
        "failed to open rcon session"
      );
    })?;

    tracing::info!(
      host = %self.config.host,
      port = self.config.port,
      "rcon session authenticated"
    );
    *slot = Some(session);
    self.connected.store(true, Ordering::SeqCst);
    Ok(())
  }
}
