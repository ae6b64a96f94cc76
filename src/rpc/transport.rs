use std::cmp::Ordering as VersionOrdering;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::{SinkExt, StreamExt};
use tokio::sync::{Notify, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request as HandshakeRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use super::envelope::{Envelope, SystemMessage};
use super::router::Router;
use super::version::{ApiVersion, compare_versions};
use super::{ConnectionState, Outbound};
use crate::config::WebSocketConfig;
use crate::error::RpcError;

pub const API_VERSION_HEADER: &str = "x-api-version";

/// Close code used when the peer's API version is too old.
const CLOSE_POLICY: u16 = 1008;

/// Invoked once when the reconnect budget runs out.
pub type FatalHandler = Arc<dyn Fn(&RpcError) + Send + Sync>;

enum Outgoing {
  Frame(String),
  Close {
    code: u16,
    reason: String,
    /// `Some` when the close is a failure that should count toward retries.
    failure: Option<RpcError>,
  },
}

/// How one connection ended.
enum SessionEnd {
  /// Closed on our request; never reconnect.
  Local,
  /// Peer closed or the socket failed.
  Lost(RpcError),
}

/// Owns the WebSocket connection to the backend.
///
/// A single supervisor task connects, runs the session and reconnects after
/// failures until the retry budget is spent. Pending requests are not touched
/// here; the correlator observes [`Transport::subscribe`] for that.
pub struct Transport {
  config: WebSocketConfig,
  state: watch::Sender<ConnectionState>,
  outbound: Mutex<Option<mpsc::UnboundedSender<Outgoing>>>,
  remote_version: Mutex<Option<String>>,
  retries: AtomicU32,
  running: AtomicBool,
  stopping: AtomicBool,
  /// Replaced on every `start` so a close from an earlier run cannot leak
  /// into the next one.
  stop_signal: Mutex<Arc<Notify>>,
  on_fatal: Option<FatalHandler>,
}

impl Transport {
  pub fn new(config: WebSocketConfig) -> Self {
    let (state, _) = watch::channel(ConnectionState::Disconnected);
    Self {
      config,
      state,
      outbound: Mutex::new(None),
      remote_version: Mutex::new(None),
      retries: AtomicU32::new(0),
      running: AtomicBool::new(false),
      stopping: AtomicBool::new(false),
      stop_signal: Mutex::new(Arc::new(Notify::new())),
      on_fatal: None,
    }
  }

  pub fn with_fatal_handler(mut self, handler: FatalHandler) -> Self {
    self.on_fatal = Some(handler);
    self
  }

  pub fn config(&self) -> &WebSocketConfig {
    &self.config
  }

  pub fn state(&self) -> ConnectionState {
    *self.state.borrow()
  }

  pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
    self.state.subscribe()
  }

  pub fn is_connected(&self) -> bool {
    self.state() == ConnectionState::Authenticated
  }

  pub fn retry_count(&self) -> u32 {
    self.retries.load(Ordering::SeqCst)
  }

  pub fn remote_version(&self) -> Option<String> {
    lock(&self.remote_version).clone()
  }

  /// Validate settings and launch the connection supervisor.
  ///
  /// The returned task finishes with `Ok(())` after [`Transport::close`] or
  /// with [`RpcError::RetriesExhausted`].
  pub fn start(
    self: &Arc<Self>,
    router: Arc<Router>,
  ) -> Result<JoinHandle<Result<(), RpcError>>, RpcError> {
    let _ = self.handshake_request()?;
    self
      .config
      .client_version
      .parse::<ApiVersion>()
      .map_err(|err| RpcError::Config(err.to_string()))?;

    if self.running.swap(true, Ordering::SeqCst) {
      return Err(RpcError::Config("transport is already running".into()));
    }
    let stop = Arc::new(Notify::new());
    *lock(&self.stop_signal) = Arc::clone(&stop);
    self.stopping.store(false, Ordering::SeqCst);
    self.retries.store(0, Ordering::SeqCst);

    let transport = Arc::clone(self);
    Ok(tokio::spawn(async move {
      let outcome = transport.supervise(router, &stop).await;
      transport.running.store(false, Ordering::SeqCst);
      outcome
    }))
  }

  /// Close gracefully; no reconnect follows.
  pub fn close(&self, code: u16, reason: &str) {
    self.stopping.store(true, Ordering::SeqCst);
    self.push(Outgoing::Close {
      code,
      reason: reason.to_string(),
      failure: None,
    });
    lock(&self.stop_signal).notify_one();
  }

  /// Send and swallow the error; for callers that do not care.
  pub fn send_or_drop(&self, envelope: &Envelope) {
    if let Err(err) = self.send(envelope) {
      tracing::debug!(error = %err, "dropped outbound frame");
    }
  }

  /// Apply the welcome/version gate for the current connection.
  pub(crate) fn accept_welcome(
    &self,
    welcome: &SystemMessage,
  ) -> Result<(), RpcError> {
    match self.state() {
      ConnectionState::Open => {}
      ConnectionState::Authenticated => {
        tracing::warn!("ignoring repeated welcome on an authenticated link");
        return Ok(());
      }
      other => {
        tracing::debug!(state = %other, "ignoring welcome outside handshake");
        return Ok(());
      }
    }

    let required = self.config.client_version.clone();
    let remote = welcome.api_version().map(str::to_string);
    let compatible = remote
      .as_deref()
      .map(|remote| compare_versions(remote, &required))
      .is_some_and(|verdict| {
        matches!(
          verdict,
          Ok(VersionOrdering::Equal | VersionOrdering::Greater)
        )
      });

    if !compatible {
      let err = RpcError::ProtocolVersion {
        remote: remote.unwrap_or_else(|| "unknown".to_string()),
        required,
      };
      tracing::warn!(error = %err, "closing connection");
      self.push(Outgoing::Close {
        code: CLOSE_POLICY,
        reason: "api version too old".to_string(),
        failure: Some(err.clone()),
      });
      return Err(err);
    }

    *lock(&self.remote_version) = remote.clone();
    self.retries.store(0, Ordering::SeqCst);
    self.set_state(ConnectionState::Authenticated);
    tracing::info!(
      api_version = remote.as_deref().unwrap_or_default(),
      message = welcome.message().unwrap_or_default(),
      "backend welcomed us"
    );
    Ok(())
  }

  async fn supervise(
    &self,
    router: Arc<Router>,
    stop: &Notify,
  ) -> Result<(), RpcError> {
    loop {
      if self.stopping.load(Ordering::SeqCst) {
        return Ok(());
      }

      self.set_state(ConnectionState::Connecting);
      let end = self.run_connection(&router, stop).await;
      self.detach();

      let cause = match end {
        SessionEnd::Local => {
          tracing::info!("connection closed locally");
          return Ok(());
        }
        SessionEnd::Lost(cause) => cause,
      };
      if self.stopping.load(Ordering::SeqCst) {
        return Ok(());
      }

      let failures = self.retries.fetch_add(1, Ordering::SeqCst) + 1;
      if failures >= self.config.max_retries {
        let err = RpcError::RetriesExhausted(failures);
        tracing::error!(
          failures,
          last_error = %cause,
          "reached max retry count; giving up on the backend"
        );
        if let Some(handler) = &self.on_fatal {
          handler(&err);
        }
        return Err(err);
      }

      tracing::warn!(
        attempt = failures,
        max = self.config.max_retries,
        error = %cause,
        delay_ms = self.config.reconnect_delay.as_millis() as u64,
        "connection lost; reconnecting"
      );
      tokio::select! {
        _ = tokio::time::sleep(self.config.reconnect_delay) => {}
        _ = stop.notified() => {}
      }
    }
  }

  async fn run_connection(
    &self,
    router: &Arc<Router>,
    stop: &Notify,
  ) -> SessionEnd {
    let request = match self.handshake_request() {
      Ok(request) => request,
      Err(err) => return SessionEnd::Lost(err),
    };

    let connected = tokio::select! {
      connected = connect_async(request) => connected,
      _ = stop.notified() => return SessionEnd::Local,
    };
    let socket = match connected {
      Ok((socket, _)) => socket,
      Err(err) => return SessionEnd::Lost(RpcError::Connect(err.to_string())),
    };

    let (sender, mut outgoing) = mpsc::unbounded_channel();
    *lock(&self.outbound) = Some(sender);
    self.set_state(ConnectionState::Open);
    tracing::info!(url = %self.endpoint_url(), "websocket open; awaiting welcome");

    // Frames are routed in arrival order on a separate task so a slow
    // handler or parse never stalls the socket.
    let (frames, inbound) = mpsc::unbounded_channel::<String>();
    let _worker = tokio::spawn(Arc::clone(router).run(inbound));

    let (mut sink, mut stream) = socket.split();
    loop {
      tokio::select! {
        next = outgoing.recv() => match next {
          Some(Outgoing::Frame(text)) => {
            if let Err(err) = sink.send(Message::Text(text.into())).await {
              return SessionEnd::Lost(RpcError::Connect(err.to_string()));
            }
          }
          Some(Outgoing::Close { code, reason, failure }) => {
            self.set_state(ConnectionState::Closing);
            let frame = CloseFrame {
              code: CloseCode::from(code),
              reason: reason.into(),
            };
            if let Err(err) = sink.send(Message::Close(Some(frame))).await {
              tracing::debug!(error = %err, "close frame not delivered");
            }
            return match failure {
              Some(err) => SessionEnd::Lost(err),
              None => SessionEnd::Local,
            };
          }
          None => return SessionEnd::Local,
        },
        frame = stream.next() => match frame {
          Some(Ok(Message::Text(text))) => {
            self.log_frame("<--", text.as_str());
            let _ = frames.send(text.as_str().to_owned());
          }
          Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
            Ok(text) => {
              self.log_frame("<--", &text);
              let _ = frames.send(text);
            }
            Err(_) => tracing::warn!(len = bytes.len(), "dropping non-UTF-8 binary frame"),
          },
          Some(Ok(Message::Close(frame))) => {
            let (code, reason) = frame
              .map(|frame| (u16::from(frame.code), frame.reason.as_str().to_owned()))
              .unwrap_or((1005, String::new()));
            let reason = if reason.is_empty() { "Connection closed.".to_string() } else { reason };
            tracing::warn!(code, reason = %reason, "backend closed the connection");
            return SessionEnd::Lost(RpcError::Connect(format!("closed by peer ({code}): {reason}")));
          }
          Some(Ok(_)) => {}
          Some(Err(err)) => return SessionEnd::Lost(RpcError::Connect(err.to_string())),
          None => return SessionEnd::Lost(RpcError::Connect("connection reset".into())),
        },
      }
    }
  }

  /// Build the upgrade request carrying the bearer token and our version.
  fn handshake_request(&self) -> Result<HandshakeRequest, RpcError> {
    let (url, token) = self.config.endpoint()?;
    let mut request = url
      .into_client_request()
      .map_err(|err| RpcError::Config(format!("invalid websocket url: {err}")))?;

    let bearer = HeaderValue::from_str(&format!("Bearer {token}"))
      .map_err(|_| RpcError::Config("token is not a valid header".into()))?;
    let version = HeaderValue::from_str(&self.config.client_version)
      .map_err(|_| RpcError::Config("api version is not a valid header".into()))?;

    let headers = request.headers_mut();
    let _ = headers.insert(AUTHORIZATION, bearer);
    let _ = headers.insert(HeaderName::from_static(API_VERSION_HEADER), version);
    Ok(request)
  }

  fn endpoint_url(&self) -> &str {
    self.config.url.as_deref().unwrap_or_default()
  }

  fn push(&self, outgoing: Outgoing) {
    if let Some(sender) = lock(&self.outbound).as_ref() {
      let _ = sender.send(outgoing);
    }
  }

  fn detach(&self) {
    let _ = lock(&self.outbound).take();
    self.set_state(ConnectionState::Disconnected);
  }

  pub(crate) fn set_state(&self, next: ConnectionState) {
    let previous = self.state.send_replace(next);
    if previous != next {
      tracing::debug!(from = %previous, to = %next, "connection state changed");
    }
  }

  fn log_frame(&self, direction: &str, text: &str) {
    if self.config.debug {
      tracing::info!("{direction} {text}");
    } else {
      tracing::trace!("{direction} {text}");
    }
  }
}

impl Outbound for Transport {
  fn send(&self, envelope: &Envelope) -> Result<(), RpcError> {
    if !self.is_connected() {
      return Err(RpcError::NotConnected);
    }

    let text = envelope.to_json()?;
    self.log_frame("-->", &text);
    match lock(&self.outbound).as_ref() {
      Some(sender) => sender
        .send(Outgoing::Frame(text))
        .map_err(|_| RpcError::NotConnected),
      None => Err(RpcError::NotConnected),
    }
  }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
