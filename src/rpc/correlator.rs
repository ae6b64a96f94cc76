use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::{Value, json};
use tokio::sync::{oneshot, watch};
use tokio::task::{AbortHandle, JoinHandle};

use super::envelope::{Envelope, Notification, Request, RequestId, Response};
use super::{ConnectionState, Outbound};
use crate::error::RpcError;

type Slot = oneshot::Sender<Result<Response, RpcError>>;

/// A request waiting for its response.
struct PendingRequest {
  method: String,
  created_at: Instant,
  deadline: Instant,
  slot: Slot,
  timer: Option<AbortHandle>,
}

impl PendingRequest {
  /// Resolve the slot; the receiver may already be gone.
  fn resolve(self, outcome: Result<Response, RpcError>) {
    if let Some(timer) = &self.timer {
      timer.abort();
    }
    let _ = self.slot.send(outcome);
  }
}

/// Matches outbound request ids to inbound responses.
///
/// Every registered request resolves exactly once: with its response, with a
/// timeout, or with a connection error when the link drops.
pub struct Correlator {
  outbound: Arc<dyn Outbound>,
  pending: Arc<DashMap<RequestId, PendingRequest>>,
  timeout: Duration,
}

impl Correlator {
  pub fn new(outbound: Arc<dyn Outbound>, timeout: Duration) -> Self {
    Self {
      outbound,
      pending: Arc::new(DashMap::new()),
      timeout,
    }
  }

  /// Send a request and return immediately with a handle to its response.
  pub fn send_request(
    &self,
    method: &str,
    params: Value,
  ) -> Result<ResponseHandle, RpcError> {
    let id = RequestId::generate();
    let envelope = Envelope::Request(Request {
      id: id.clone(),
      method: method.to_string(),
      params,
    });

    let (slot, receiver) = oneshot::channel();
    let created_at = Instant::now();
    let _ = self.pending.insert(
      id.clone(),
      PendingRequest {
        method: method.to_string(),
        created_at,
        deadline: created_at + self.timeout,
        slot,
        timer: None,
      },
    );
    // The entry must exist before the timer can fire.
    let timer = self.arm_timer(id.clone(), method.to_string());
    match self.pending.get_mut(&id) {
      Some(mut entry) => entry.timer = Some(timer),
      None => timer.abort(),
    }

    if let Err(err) = self.outbound.send(&envelope) {
      if let Some((_, entry)) = self.pending.remove(&id) {
        if let Some(timer) = entry.timer {
          timer.abort();
        }
      }
      return Err(err);
    }

    tracing::debug!(%id, method, "sent request");
    Ok(ResponseHandle {
      id,
      method: method.to_string(),
      receiver,
    })
  }

  /// Fire-and-forget; nothing is registered and no reply is expected.
  pub fn send_notification(
    &self,
    method: &str,
    params: Value,
  ) -> Result<(), RpcError> {
    let envelope = Envelope::Notification(Notification {
      method: method.to_string(),
      params,
    });
    self.outbound.send(&envelope)?;
    tracing::debug!(method, "sent notification");
    Ok(())
  }

  /// Resolve the pending request matching `response.id`.
  ///
  /// Unknown ids, including late answers to timed out requests, are dropped.
  pub fn complete_response(&self, response: Response) -> bool {
    match self.pending.remove(&response.id) {
      Some((id, entry)) => {
        tracing::debug!(
          %id,
          method = %entry.method,
          elapsed_ms = entry.created_at.elapsed().as_millis() as u64,
          "response completed"
        );
        entry.resolve(Ok(response));
        true
      }
      None => {
        tracing::warn!(id = %response.id, "response for unknown request id");
        false
      }
    }
  }

  /// Fail every pending request, returning how many there were.
  pub fn fail_all(&self, error: &RpcError) -> usize {
    let ids: Vec<RequestId> =
      self.pending.iter().map(|entry| entry.key().clone()).collect();

    let mut failed = 0;
    for id in ids {
      if let Some((_, entry)) = self.pending.remove(&id) {
        entry.resolve(Err(error.clone()));
        failed += 1;
      }
    }

    if failed > 0 {
      tracing::warn!(failed, error = %error, "failed pending requests");
    }
    failed
  }

  /// Watch the connection state and fail pending requests whenever the
  /// link is not authenticated.
  pub fn observe(
    self: &Arc<Self>,
    mut state: watch::Receiver<ConnectionState>,
  ) -> JoinHandle<()> {
    let correlator = Arc::clone(self);
    tokio::spawn(async move {
      while state.changed().await.is_ok() {
        let current = *state.borrow_and_update();
        if current != ConnectionState::Authenticated {
          let _ = correlator.fail_all(&RpcError::ConnectionClosed);
        }
      }
    })
  }

  pub fn pending_count(&self) -> usize {
    self.pending.len()
  }

  /// Earliest deadline among pending requests.
  pub fn next_deadline(&self) -> Option<Instant> {
    self.pending.iter().map(|entry| entry.deadline).min()
  }

  /// Send a `ping` and report whether the peer answered without an error.
  pub async fn ping(&self, bound: Duration) -> bool {
    let params = json!({ "timestamp": unix_millis() });
    let handle = match self.send_request("ping", params) {
      Ok(handle) => handle,
      Err(err) => {
        tracing::warn!(error = %err, "health check could not be sent");
        return false;
      }
    };

    match handle.wait_for(bound).await {
      Ok(response) => response.outcome.is_ok(),
      Err(err) => {
        tracing::warn!(error = %err, "health check failed");
        false
      }
    }
  }

  fn arm_timer(&self, id: RequestId, method: String) -> AbortHandle {
    let pending = Arc::clone(&self.pending);
    let after = self.timeout;
    tokio::spawn(async move {
      tokio::time::sleep(after).await;
      if let Some((id, entry)) = pending.remove(&id) {
        tracing::warn!(%id, %method, "request timed out");
        let _ = entry.slot.send(Err(RpcError::Timeout {
          method,
          id: id.to_string(),
          after,
        }));
      }
    })
    .abort_handle()
  }
}

fn unix_millis() -> u64 {
  std::time::SystemTime::now()
    .duration_since(std::time::UNIX_EPOCH)
    .map(|elapsed| elapsed.as_millis() as u64)
    .unwrap_or_default()
}

/// Future resolving to the response of one request.
#[derive(Debug)]
pub struct ResponseHandle {
  id: RequestId,
  method: String,
  receiver: oneshot::Receiver<Result<Response, RpcError>>,
}

impl ResponseHandle {
  pub fn id(&self) -> &RequestId {
    &self.id
  }

  /// Wait at most `bound`, on top of the correlator's own timeout.
  pub async fn wait_for(self, bound: Duration) -> Result<Response, RpcError> {
    let id = self.id.to_string();
    let method = self.method.clone();
    tokio::time::timeout(bound, self)
      .await
      .map_err(|_| RpcError::Timeout {
        method,
        id,
        after: bound,
      })?
  }
}

impl Future for ResponseHandle {
  type Output = Result<Response, RpcError>;

  fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    Pin::new(&mut self.receiver)
      .poll(cx)
      .map(|received| received.unwrap_or(Err(RpcError::ConnectionClosed)))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Mutex;

  #[derive(Default)]
  struct RecordingOutbound {
    sent: Mutex<Vec<Envelope>>,
    refuse: bool,
  }

  impl RecordingOutbound {
    fn last_request_id(&self) -> RequestId {
      match self.sent.lock().unwrap().last() {
        Some(Envelope::Request(request)) => request.id.clone(),
        other => panic!("expected a request, got {other:?}"),
      }
    }
  }

  impl Outbound for RecordingOutbound {
    fn send(&self, envelope: &Envelope) -> Result<(), RpcError> {
      if self.refuse {
        return Err(RpcError::NotConnected);
      }
      self.sent.lock().unwrap().push(envelope.clone());
      Ok(())
    }
  }

  fn correlator(timeout: Duration) -> (Arc<Correlator>, Arc<RecordingOutbound>) {
    let outbound = Arc::new(RecordingOutbound::default());
    let correlator = Arc::new(Correlator::new(outbound.clone(), timeout));
    (correlator, outbound)
  }

  #[tokio::test]
  async fn response_completes_the_matching_request() {
    let (correlator, outbound) = correlator(Duration::from_secs(5));
    let handle = correlator
      .send_request("player.join", json!({"player": "Steve"}))
      .unwrap();
    let id = outbound.last_request_id();
    assert_eq!(handle.id(), &id);
    assert_eq!(correlator.pending_count(), 1);

    assert!(correlator.complete_response(Response::success(id.clone(), json!({"action": "allow"}))));
    let response = handle.await.unwrap();
    assert_eq!(response.id, id);
    assert_eq!(correlator.pending_count(), 0);

    // A duplicate answer finds nothing to resolve.
    assert!(!correlator.complete_response(Response::success(id, json!(null))));
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn zero_timeout_still_resolves_and_clears_the_entry() {
    let (correlator, _) = correlator(Duration::ZERO);
    let handle = correlator.send_request("player.join", json!({})).unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(2), handle)
      .await
      .expect("resolved by its own timer");
    assert!(matches!(outcome, Err(RpcError::Timeout { .. })));
    assert_eq!(correlator.pending_count(), 0);
  }

  #[tokio::test]
  async fn unknown_ids_are_discarded() {
    let (correlator, _) = correlator(Duration::from_secs(5));
    assert!(!correlator.complete_response(Response::success("ghost".into(), json!({}))));
  }

  #[tokio::test(start_paused = true)]
  async fn silence_resolves_with_a_timeout_once() {
    let (correlator, outbound) = correlator(Duration::from_secs(5));
    let handle = correlator.send_request("player.bindQuery", json!({})).unwrap();
    let id = outbound.last_request_id();

    let err = handle.await.unwrap_err();
    assert!(matches!(err, RpcError::Timeout { ref method, .. } if method == "player.bindQuery"));
    assert_eq!(correlator.pending_count(), 0);

    // The late answer is dropped.
    assert!(!correlator.complete_response(Response::success(id, json!({}))));
  }

  #[tokio::test]
  async fn refused_send_registers_nothing() {
    let outbound = Arc::new(RecordingOutbound {
      refuse: true,
      ..Default::default()
    });
    let correlator = Correlator::new(outbound, Duration::from_secs(5));
    assert!(matches!(
      correlator.send_request("player.join", json!({})),
      Err(RpcError::NotConnected)
    ));
    assert_eq!(correlator.pending_count(), 0);
  }

  #[tokio::test]
  async fn connection_loss_fails_everything_pending() {
    let (correlator, _) = correlator(Duration::from_secs(5));
    let (state_tx, state_rx) = watch::channel(ConnectionState::Authenticated);
    let observer = correlator.observe(state_rx);

    let first = correlator.send_request("a", json!({})).unwrap();
    let second = correlator.send_request("b", json!({})).unwrap();
    assert!(correlator.next_deadline().is_some());

    state_tx.send(ConnectionState::Disconnected).unwrap();
    assert!(matches!(first.await, Err(RpcError::ConnectionClosed)));
    assert!(matches!(second.await, Err(RpcError::ConnectionClosed)));
    assert_eq!(correlator.pending_count(), 0);
    observer.abort();
  }

  #[tokio::test]
  async fn notifications_register_nothing() {
    let (correlator, outbound) = correlator(Duration::from_secs(5));
    correlator.send_notification("mc.chat", json!({"message": "hi"})).unwrap();
    assert_eq!(correlator.pending_count(), 0);
    assert!(matches!(
      outbound.sent.lock().unwrap().as_slice(),
      [Envelope::Notification(n)] if n.method == "mc.chat"
    ));
  }

  #[tokio::test(start_paused = true)]
  async fn wait_for_bounds_the_caller() {
    let (correlator, _) = correlator(Duration::from_secs(30));
    let handle = correlator.send_request("player.bind", json!({})).unwrap();
    let err = handle.wait_for(Duration::from_secs(1)).await.unwrap_err();
    assert!(matches!(err, RpcError::Timeout { after, .. } if after == Duration::from_secs(1)));
  }
}
