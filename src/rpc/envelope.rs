use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use uuid::Uuid;

use crate::error::RpcError;

pub const JSONRPC_VERSION: &str = "2.0";

/// Standard JSON-RPC error codes used by the bridge.
pub mod codes {
  pub const PARSE_ERROR: i64 = -32_700;
  pub const INVALID_REQUEST: i64 = -32_600;
  pub const METHOD_NOT_FOUND: i64 = -32_601;
  pub const INVALID_PARAMS: i64 = -32_602;
  pub const SERVER_ERROR: i64 = -32_000;
}

/// Correlation token of a request.
///
/// Outbound ids are UUID strings; peers may also use numbers, which are echoed
/// back unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
  Text(String),
  Number(i64),
}

impl RequestId {
  pub fn generate() -> Self {
    Self::Text(Uuid::new_v4().to_string())
  }

  /// `None` for null or structurally invalid ids.
  pub fn from_value(value: &Value) -> Option<Self> {
    match value {
      Value::String(text) => Some(Self::Text(text.clone())),
      Value::Number(number) => number.as_i64().map(Self::Number),
      _ => None,
    }
  }
}

impl From<&str> for RequestId {
  fn from(value: &str) -> Self {
    Self::Text(value.to_string())
  }
}

impl fmt::Display for RequestId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Text(text) => f.write_str(text),
      Self::Number(number) => write!(f, "{number}"),
    }
  }
}

/// The `error` member of a failed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
  pub code: i64,
  pub message: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub data: Option<Value>,
}

impl ErrorObject {
  pub fn new(code: i64, message: impl Into<String>) -> Self {
    Self {
      code,
      message: message.into(),
      data: None,
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
  pub id: RequestId,
  pub method: String,
  pub params: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
  pub method: String,
  pub params: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
  pub id: RequestId,
  pub outcome: Result<Value, ErrorObject>,
}

impl Response {
  pub fn success(id: RequestId, result: Value) -> Self {
    Self {
      id,
      outcome: Ok(result),
    }
  }

  pub fn failure(id: RequestId, error: ErrorObject) -> Self {
    Self {
      id,
      outcome: Err(error),
    }
  }

  /// Turn a remote error object into [`RpcError::Remote`].
  pub fn into_result(self) -> Result<Value, RpcError> {
    self.outcome.map_err(|error| RpcError::Remote {
      code: error.code,
      message: error.message,
    })
  }
}

/// Out-of-band frame such as the welcome handshake.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemMessage {
  pub kind: String,
  pub payload: Map<String, Value>,
}

impl SystemMessage {
  pub const WELCOME: &'static str = "welcome";

  pub fn is_welcome(&self) -> bool {
    self.kind == Self::WELCOME
  }

  pub fn api_version(&self) -> Option<&str> {
    self.payload.get("api_version").and_then(Value::as_str)
  }

  pub fn message(&self) -> Option<&str> {
    self.payload.get("message").and_then(Value::as_str)
  }
}

/// One JSON-RPC shaped message.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
  Request(Request),
  Response(Response),
  Notification(Notification),
  System(SystemMessage),
}

/// An object that could not be classified.
#[derive(Debug, Clone, PartialEq)]
pub struct Malformed {
  /// Present when the object carried a usable id, so the peer can be told.
  pub id: Option<RequestId>,
  pub reason: String,
}

impl Malformed {
  fn new(id: Option<RequestId>, reason: impl Into<String>) -> Self {
    Self {
      id,
      reason: reason.into(),
    }
  }
}

impl Envelope {
  /// Classify one decoded JSON object.
  ///
  /// Precedence: `type`, then `method`, then `id` with `result`/`error`.
  /// An object carrying both `method` and `result` is a request.
  pub fn classify(object: Map<String, Value>) -> Result<Self, Malformed> {
    let id = object.get("id").and_then(RequestId::from_value);

    if let Some(kind) = object.get("type") {
      let Some(kind) = kind.as_str() else {
        return Err(Malformed::new(id, "`type` must be a string"));
      };
      return Ok(Self::System(SystemMessage {
        kind: kind.to_string(),
        payload: object,
      }));
    }

    if let Some(method) = object.get("method") {
      let Some(method) = method.as_str() else {
        return Err(Malformed::new(id, "`method` must be a string"));
      };
      let params = object.get("params").cloned().unwrap_or(Value::Null);
      if !matches!(params, Value::Null | Value::Object(_) | Value::Array(_)) {
        return Err(Malformed::new(id, "`params` must be an object or array"));
      }
      let method = method.to_string();

      return Ok(match id {
        Some(id) => Self::Request(Request { id, method, params }),
        None if has_non_null(&object, "id") => {
          return Err(Malformed::new(None, "request id must be a string or integer"));
        }
        None => Self::Notification(Notification { method, params }),
      });
    }

    let Some(id) = id else {
      return Err(Malformed::new(None, "object has neither an id nor a method"));
    };

    if let Some(error) = object.get("error").filter(|error| !error.is_null()) {
      let error = serde_json::from_value::<ErrorObject>(error.clone())
        .unwrap_or_else(|_| {
          ErrorObject::new(codes::SERVER_ERROR, error.to_string())
        });
      return Ok(Self::Response(Response::failure(id, error)));
    }

    if let Some(result) = object.get("result") {
      return Ok(Self::Response(Response::success(id, result.clone())));
    }

    Err(Malformed::new(
      Some(id),
      "object has an id but no method, result or error",
    ))
  }

  /// Wire form of the envelope.
  pub fn to_value(&self) -> Value {
    match self {
      Self::Request(request) => {
        let mut value = json!({
          "jsonrpc": JSONRPC_VERSION,
          "id": request.id,
          "method": request.method,
        });
        if !request.params.is_null() {
          value["params"] = request.params.clone();
        }
        value
      }
      Self::Notification(notification) => {
        let mut value = json!({
          "jsonrpc": JSONRPC_VERSION,
          "method": notification.method,
        });
        if !notification.params.is_null() {
          value["params"] = notification.params.clone();
        }
        value
      }
      Self::Response(response) => match &response.outcome {
        Ok(result) => json!({
          "id": response.id,
          "jsonrpc": JSONRPC_VERSION,
          "result": result,
        }),
        Err(error) => json!({
          "id": response.id,
          "jsonrpc": JSONRPC_VERSION,
          "error": error,
        }),
      },
      Self::System(system) => {
        let mut payload = system.payload.clone();
        payload.insert("type".to_string(), Value::String(system.kind.clone()));
        Value::Object(payload)
      }
    }
  }

  pub fn to_json(&self) -> Result<String, RpcError> {
    Ok(serde_json::to_string(&self.to_value())?)
  }

  pub fn method(&self) -> Option<&str> {
    match self {
      Self::Request(request) => Some(&request.method),
      Self::Notification(notification) => Some(&notification.method),
      _ => None,
    }
  }
}

fn has_non_null(object: &Map<String, Value>, key: &str) -> bool {
  object.get(key).is_some_and(|value| !value.is_null())
}
