//! Explicit wiring of transport, correlator, router, handlers and RCON.

use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context;
use tokio::task::JoinHandle;

use crate::config::BridgeConfig;
use crate::error::RpcError;
use crate::handlers::{self, HandlerDeps};
use crate::host::{Broadcaster, PlayerDirectory, RconHost, ServerInfo};
use crate::outbound::Backend;
use crate::rcon::Rcon;
use crate::rpc::{
  ConnectionState, Correlator, FatalHandler, HandlerRegistry, Replier, Router,
  Transport,
};

/// Host collaborators handed to the handlers.
#[derive(Clone)]
pub struct HostServices {
  pub server: Arc<dyn ServerInfo>,
  pub players: Arc<dyn PlayerDirectory>,
  pub broadcaster: Arc<dyn Broadcaster>,
  pub rcon: Option<Arc<Rcon>>,
}

/// Point-in-time view of the backend link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStats {
  pub connected: bool,
  pub state: ConnectionState,
  pub retry_count: u32,
  pub pending_requests: usize,
  pub client_version: String,
  pub remote_version: Option<String>,
  pub url: Option<String>,
}

pub struct Bridge {
  config: BridgeConfig,
  transport: Arc<Transport>,
  correlator: Arc<Correlator>,
  router: Arc<Router>,
  backend: Backend,
  rcon: Option<Arc<Rcon>>,
  observer: Mutex<Option<JoinHandle<()>>>,
}

impl Bridge {
  /// Wire a bridge around the given host services.
  pub fn new(
    config: BridgeConfig,
    host: HostServices,
    on_fatal: Option<FatalHandler>,
  ) -> anyhow::Result<Self> {
    let mut transport = Transport::new(config.websocket.clone());
    if let Some(on_fatal) = on_fatal {
      transport = transport.with_fatal_handler(on_fatal);
    }
    let transport = Arc::new(transport);

    let correlator = Arc::new(Correlator::new(
      transport.clone(),
      config.websocket.request_timeout,
    ));

    let mut registry = HandlerRegistry::new();
    handlers::register_defaults(
      &mut registry,
      HandlerDeps {
        server: host.server,
        rcon: host.rcon.clone(),
        players: host.players,
        broadcaster: host.broadcaster,
      },
    )
    .context("failed to register handlers")?;

    let router = Arc::new(Router::new(
      transport.clone(),
      correlator.clone(),
      Arc::new(registry),
      Replier::new(transport.clone()),
    ));
    let backend = Backend::new(
      correlator.clone(),
      transport.clone(),
      config.allow_join_without_link,
    );

    Ok(Self {
      config,
      transport,
      correlator,
      router,
      backend,
      rcon: host.rcon,
      observer: Mutex::new(None),
    })
  }

  /// Bridge running beside the game server: kicks and broadcasts become
  /// console commands over external RCON, when configured.
  pub fn standalone(
    config: BridgeConfig,
    on_fatal: Option<FatalHandler>,
  ) -> anyhow::Result<Self> {
    let rcon = config
      .rcon
      .is_configured()
      .then(|| Arc::new(Rcon::external(config.rcon.clone())));
    let console = Arc::new(RconHost::new(rcon.clone()));
    let host = HostServices {
      server: Arc::new(config.identity.clone()),
      players: console.clone(),
      broadcaster: console,
      rcon,
    };
    Self::new(config, host, on_fatal)
  }

  /// Start the connection supervisor and the pending-request observer.
  pub fn start(&self) -> Result<JoinHandle<Result<(), RpcError>>, RpcError> {
    self.config.validate()?;
    let supervisor = self.transport.start(self.router.clone())?;

    let observer = self.correlator.observe(self.transport.subscribe());
    if let Some(previous) = self
      .observer
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .replace(observer)
    {
      previous.abort();
    }
    Ok(supervisor)
  }

  /// Open the RCON session early so the first command is fast.
  pub async fn warm_up_rcon(&self) {
    let Some(rcon) = &self.rcon else {
      tracing::info!("rcon is not configured; execute.rcon will be refused");
      return;
    };
    if let Err(err) = rcon.warm_up().await {
      tracing::warn!(error = %err, "rcon warm-up failed; will retry on demand");
    }
  }

  /// Close the link, fail whatever is still pending and drop RCON.
  pub async fn shutdown(&self) {
    self.transport.close(1000, "client shutting down");
    let _ = self.correlator.fail_all(&RpcError::ConnectionClosed);
    if let Some(observer) = self
      .observer
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .take()
    {
      observer.abort();
    }
    if let Some(rcon) = &self.rcon {
      rcon.shutdown().await;
    }
    tracing::info!("bridge shut down");
  }

  pub fn stats(&self) -> ConnectionStats {
    let websocket = self.transport.config();
    ConnectionStats {
      connected: self.transport.is_connected(),
      state: self.transport.state(),
      retry_count: self.transport.retry_count(),
      pending_requests: self.correlator.pending_count(),
      client_version: websocket.client_version.clone(),
      remote_version: self.transport.remote_version(),
      url: websocket.url.clone(),
    }
  }

  /// Round-trip a `ping`; false while disconnected.
  pub async fn health_check(&self) -> bool {
    if !self.transport.is_connected() {
      return false;
    }
    self
      .correlator
      .ping(self.config.websocket.request_timeout)
      .await
  }

  pub fn backend(&self) -> &Backend {
    &self.backend
  }

  pub fn correlator(&self) -> &Arc<Correlator> {
    &self.correlator
  }

  pub fn transport(&self) -> &Arc<Transport> {
    &self.transport
  }

  pub fn rcon(&self) -> Option<&Arc<Rcon>> {
    self.rcon.as_ref()
  }
}
