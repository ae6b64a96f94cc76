use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::mpsc;

use super::correlator::Correlator;
use super::envelope::{Envelope, ErrorObject, Response, SystemMessage, codes};
use super::registry::{Call, HandlerRegistry, Replier};
use super::transport::Transport;

/// Sorts inbound frames into welcome handling, response completion and
/// handler dispatch.
pub struct Router {
  transport: Arc<Transport>,
  correlator: Arc<Correlator>,
  registry: Arc<HandlerRegistry>,
  replier: Replier,
}

impl Router {
  pub fn new(
    transport: Arc<Transport>,
    correlator: Arc<Correlator>,
    registry: Arc<HandlerRegistry>,
    replier: Replier,
  ) -> Self {
    Self {
      transport,
      correlator,
      registry,
      replier,
    }
  }

  /// Route frames in arrival order until the connection drops the sender.
  pub async fn run(self: Arc<Self>, mut frames: mpsc::UnboundedReceiver<String>) {
    while let Some(frame) = frames.recv().await {
      self.route_frame(&frame);
    }
  }

  /// Route one text frame holding an object or a batch array.
  pub fn route_frame(&self, text: &str) {
    let value = match serde_json::from_str::<Value>(text) {
      Ok(value) => value,
      Err(err) => {
        tracing::warn!(error = %err, "dropping unparseable frame");
        return;
      }
    };

    match value {
      Value::Object(object) => self.route_object(object),
      Value::Array(items) => {
        for item in items {
          match item {
            Value::Object(object) => self.route_object(object),
            other => tracing::warn!(
              element = %other,
              "dropping non-object batch element"
            ),
          }
        }
      }
      other => tracing::warn!(frame = %other, "dropping non-object frame"),
    }
  }

  fn route_object(&self, object: Map<String, Value>) {
    let envelope = match Envelope::classify(object) {
      Ok(envelope) => envelope,
      Err(malformed) => {
        tracing::warn!(
          id = ?malformed.id,
          reason = %malformed.reason,
          "malformed message"
        );
        if let Some(id) = malformed.id {
          self.reply(Response::failure(
            id,
            ErrorObject::new(
              codes::PARSE_ERROR,
              format!("Parse error: {}", malformed.reason),
            ),
          ));
        }
        return;
      }
    };

    match envelope {
      Envelope::System(system) => self.on_system(&system),
      other if !self.transport.is_connected() => {
        tracing::debug!(
          method = other.method().unwrap_or_default(),
          "dropping frame received before the welcome"
        );
      }
      Envelope::Response(response) => {
        let _ = self.correlator.complete_response(response);
      }
      Envelope::Request(request) => self.dispatch(Call::from(request)),
      Envelope::Notification(notification) => {
        self.dispatch(Call::from(notification))
      }
    }
  }

  fn on_system(&self, system: &SystemMessage) {
    if system.is_welcome() {
      // The transport logs and closes on rejection.
      let _ = self.transport.accept_welcome(system);
    } else {
      tracing::info!(kind = %system.kind, "system message");
    }
  }

  fn dispatch(&self, call: Call) {
    let id = call.id.clone();
    let method = call.method.clone();
    if let Err(err) = self.registry.dispatch(call, self.replier.clone()) {
      tracing::warn!(error = %err, "no handler for inbound call");
      if let Some(id) = id {
        self.reply(Response::failure(
          id,
          ErrorObject::new(
            codes::METHOD_NOT_FOUND,
            format!("Method not found: {method}"),
          ),
        ));
      }
    }
  }

  fn reply(&self, response: Response) {
    if let Err(err) = self.replier.respond(response) {
      tracing::debug!(error = %err, "reply not sent");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::WebSocketConfig;
  use crate::error::RpcError;
  use crate::rpc::registry::Handler;
  use crate::rpc::{ConnectionState, Outbound, RequestId};
  use async_trait::async_trait;
  use serde_json::json;
  use std::sync::Mutex;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::time::Duration;

  #[derive(Default)]
  struct Recorder {
    sent: Mutex<Vec<Envelope>>,
  }

  impl Recorder {
    fn responses(&self) -> Vec<Response> {
      self
        .sent
        .lock()
        .unwrap()
        .iter()
        .filter_map(|envelope| match envelope {
          Envelope::Response(response) => Some(response.clone()),
          _ => None,
        })
        .collect()
    }
  }

  impl Outbound for Recorder {
    fn send(&self, envelope: &Envelope) -> Result<(), RpcError> {
      self.sent.lock().unwrap().push(envelope.clone());
      Ok(())
    }
  }

  #[derive(Default)]
  struct Counting {
    calls: AtomicUsize,
  }

  #[async_trait]
  impl Handler for Counting {
    async fn handle(&self, _call: Call, _replier: Replier) -> anyhow::Result<()> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      Ok(())
    }
  }

  struct Fixture {
    router: Router,
    transport: Arc<Transport>,
    correlator: Arc<Correlator>,
    recorder: Arc<Recorder>,
    counting: Arc<Counting>,
  }

  fn fixture() -> Fixture {
    let transport = Arc::new(Transport::new(WebSocketConfig {
      client_version: "1.0.0".to_string(),
      ..WebSocketConfig::default()
    }));
    let recorder = Arc::new(Recorder::default());
    let correlator = Arc::new(Correlator::new(recorder.clone(), Duration::from_secs(5)));
    let counting = Arc::new(Counting::default());
    let mut registry = HandlerRegistry::new();
    registry.register("get.client.info", counting.clone()).unwrap();

    let router = Router::new(
      transport.clone(),
      correlator.clone(),
      Arc::new(registry),
      Replier::new(recorder.clone()),
    );
    Fixture {
      router,
      transport,
      correlator,
      recorder,
      counting,
    }
  }

  fn welcomed() -> Fixture {
    let fixture = fixture();
    fixture.transport.set_state(ConnectionState::Open);
    fixture
      .router
      .route_frame(r#"{"type":"welcome","api_version":"1.0.0","message":"hi"}"#);
    assert!(fixture.transport.is_connected());
    fixture
  }

  #[tokio::test]
  async fn frames_before_the_welcome_are_dropped() {
    let fixture = fixture();
    fixture.transport.set_state(ConnectionState::Open);
    fixture
      .router
      .route_frame(r#"{"jsonrpc":"2.0","id":"1","method":"unknown.thing"}"#);

    assert!(fixture.recorder.responses().is_empty());
    assert!(!fixture.transport.is_connected());
  }

  #[tokio::test]
  async fn unknown_methods_get_method_not_found() {
    let fixture = welcomed();
    fixture
      .router
      .route_frame(r#"{"jsonrpc":"2.0","id":"9","method":"nope"}"#);
    // Notifications for unknown methods stay silent.
    fixture.router.route_frame(r#"{"jsonrpc":"2.0","method":"nope"}"#);

    let responses = fixture.recorder.responses();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].id, RequestId::from("9"));
    assert!(matches!(
      &responses[0].outcome,
      Err(error) if error.code == codes::METHOD_NOT_FOUND
    ));
  }

  #[tokio::test]
  async fn batches_route_each_element() {
    let fixture = welcomed();
    let handle = fixture
      .correlator
      .send_request("player.join", json!({"player": "Alex"}))
      .unwrap();
    let id = handle.id().clone();

    let batch = json!([
      {"id": id, "jsonrpc": "2.0", "result": {"action": "allow"}},
      {"jsonrpc": "2.0", "method": "get.client.info"},
      42
    ]);
    fixture.router.route_frame(&batch.to_string());

    let response = handle.await.unwrap();
    assert_eq!(response.into_result().unwrap()["action"], "allow");

    tokio::task::yield_now().await;
    for _ in 0..10 {
      if fixture.counting.calls.load(Ordering::SeqCst) == 1 {
        break;
      }
      tokio::task::yield_now().await;
    }
    assert_eq!(fixture.counting.calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn malformed_objects_with_ids_get_parse_errors() {
    let fixture = welcomed();
    fixture.router.route_frame(r#"{"id":"x","jsonrpc":"2.0"}"#);
    fixture.router.route_frame(r#"{"jsonrpc":"2.0"}"#);
    fixture.router.route_frame("not json at all");
    fixture.router.route_frame("17");

    let responses = fixture.recorder.responses();
    assert_eq!(responses.len(), 1);
    assert!(matches!(
      &responses[0].outcome,
      Err(error) if error.code == codes::PARSE_ERROR
    ));
  }

  #[tokio::test]
  async fn old_welcome_keeps_the_gate_closed() {
    let fixture = fixture();
    fixture.transport.set_state(ConnectionState::Open);
    fixture
      .router
      .route_frame(r#"{"type":"welcome","api_version":"0.9.9"}"#);
    assert!(!fixture.transport.is_connected());
  }
}
