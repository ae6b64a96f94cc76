use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;
use tokio::task::JoinHandle;

use super::Outbound;
use super::envelope::{
  Envelope, ErrorObject, Notification, Request, RequestId, Response, codes,
};
use crate::error::{RegistryError, RpcError};

/// An inbound request or notification as seen by a handler.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
  /// `None` for notifications, which never get a reply.
  pub id: Option<RequestId>,
  pub method: String,
  pub params: Value,
}

impl Call {
  pub fn is_notification(&self) -> bool {
    self.id.is_none()
  }
}

impl From<Request> for Call {
  fn from(request: Request) -> Self {
    Self {
      id: Some(request.id),
      method: request.method,
      params: request.params,
    }
  }
}

impl From<Notification> for Call {
  fn from(notification: Notification) -> Self {
    Self {
      id: None,
      method: notification.method,
      params: notification.params,
    }
  }
}

/// String parameter `key`, if present.
pub fn optional_str<'a>(call: &'a Call, key: &str) -> Option<&'a str> {
  call.params.get(key).and_then(Value::as_str)
}

/// String parameter `key`, or the invalid-params error to answer with.
pub fn require_str<'a>(call: &'a Call, key: &str) -> Result<&'a str, ErrorObject> {
  optional_str(call, key).ok_or_else(|| {
    ErrorObject::new(
      codes::INVALID_PARAMS,
      format!("argument '{key}' is required but missing"),
    )
  })
}

/// Sends replies on behalf of handlers.
///
/// Every helper is a no-op for notifications.
#[derive(Clone)]
pub struct Replier {
  outbound: Arc<dyn Outbound>,
}

impl Replier {
  pub fn new(outbound: Arc<dyn Outbound>) -> Self {
    Self { outbound }
  }

  pub fn ok(&self, call: &Call, result: Value) -> Result<(), RpcError> {
    match &call.id {
      Some(id) => self.respond(Response::success(id.clone(), result)),
      None => Ok(()),
    }
  }

  pub fn fail(&self, call: &Call, error: ErrorObject) -> Result<(), RpcError> {
    match &call.id {
      Some(id) => self.respond(Response::failure(id.clone(), error)),
      None => Ok(()),
    }
  }

  pub fn error(
    &self,
    call: &Call,
    code: i64,
    message: impl Into<String>,
  ) -> Result<(), RpcError> {
    self.fail(call, ErrorObject::new(code, message))
  }

  pub fn respond(&self, response: Response) -> Result<(), RpcError> {
    self.outbound.send(&Envelope::Response(response))
  }
}

/// Capability behind one RPC method.
///
/// Handlers produce their own replies through the [`Replier`]; nothing is
/// answered automatically.
#[async_trait]
pub trait Handler: Send + Sync {
  async fn handle(&self, call: Call, replier: Replier) -> anyhow::Result<()>;
}

/// Method-name keyed handler table.
#[derive(Default)]
pub struct HandlerRegistry {
  handlers: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register `handler` for `method`; a second registration is an error.
  pub fn register(
    &mut self,
    method: impl Into<String>,
    handler: Arc<dyn Handler>,
  ) -> Result<&mut Self, RegistryError> {
    let method = method.into();
    if self.handlers.contains_key(&method) {
      return Err(RegistryError::DuplicateMethod(method));
    }
    tracing::debug!(method = %method, "registered handler");
    let _ = self.handlers.insert(method, handler);
    Ok(self)
  }

  pub fn contains(&self, method: &str) -> bool {
    self.handlers.contains_key(method)
  }

  pub fn len(&self) -> usize {
    self.handlers.len()
  }

  pub fn is_empty(&self) -> bool {
    self.handlers.is_empty()
  }

  pub fn methods(&self) -> Vec<&str> {
    let mut methods: Vec<&str> =
      self.handlers.keys().map(String::as_str).collect();
    methods.sort_unstable();
    methods
  }

  /// Run the handler for `call.method` on its own task.
  ///
  /// Handler errors and panics are logged here and never reach the caller.
  pub fn dispatch(
    &self,
    call: Call,
    replier: Replier,
  ) -> Result<JoinHandle<()>, RpcError> {
    let Some(handler) = self.handlers.get(&call.method).cloned() else {
      return Err(RpcError::UnknownMethod(call.method));
    };

    Ok(tokio::spawn(async move {
      let method = call.method.clone();
      let id = call.id.clone();
      let outcome = AssertUnwindSafe(handler.handle(call, replier))
        .catch_unwind()
        .await;

      match outcome {
        Ok(Ok(())) => tracing::trace!(method = %method, "handler finished"),
        Ok(Err(err)) => tracing::error!(
          method = %method,
          id = ?id,
          error = %format!("{err:#}"),
          "handler failed"
        ),
        Err(_) => tracing::error!(method = %method, id = ?id, "handler panicked"),
      }
    }))
  }
}
