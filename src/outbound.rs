//! Calls we make to the backend.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RpcError;
use crate::rpc::{Correlator, Transport};

pub const PLAYER_JOIN: &str = "player.join";
pub const PLAYER_BIND_QUERY: &str = "player.bindQuery";
pub const PLAYER_BIND: &str = "player.bind";
pub const PLAYER_UNBIND: &str = "player.unbind";
pub const MC_CHAT: &str = "mc.chat";

/// Upper bound on how long a joining player is held at the door.
pub const JOIN_DECISION_TIMEOUT: Duration = Duration::from_secs(5);

pub const NOT_READY_REASON: &str =
  "The server is not ready yet. Please try again later.";
pub const DEFAULT_DENY_REASON: &str = "You are not allowed to join this server.";

/// A player at the login gate.
#[derive(Debug, Clone, Serialize)]
pub struct PlayerLogin {
  pub player: String,
  pub uuid: String,
  pub ip: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinDecision {
  Allow,
  Deny { reason: String },
}

impl JoinDecision {
  pub fn is_allowed(&self) -> bool {
    matches!(self, Self::Allow)
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnbindOutcome {
  pub success: bool,
  pub message: Option<String>,
}

#[derive(Serialize)]
struct JoinParams<'a> {
  #[serde(flatten)]
  login: &'a PlayerLogin,
  timestamp: u64,
}

#[derive(Deserialize)]
struct JoinVerdict {
  #[serde(default)]
  action: Option<String>,
  #[serde(default)]
  reason: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BindParams<'a> {
  player_name: &'a str,
  #[serde(rename = "playerUUID")]
  player_uuid: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BindQuery {
  is_bind: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BindIssued {
  auth_code: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Unbound {
  is_success: bool,
  #[serde(default)]
  message: Option<String>,
}

#[derive(Serialize)]
struct ChatParams<'a> {
  player: &'a str,
  uuid: &'a str,
  message: &'a str,
  timestamp: u64,
}

/// Typed client for the backend's methods.
pub struct Backend {
  correlator: Arc<Correlator>,
  transport: Arc<Transport>,
  allow_join_without_link: bool,
}

impl Backend {
  pub fn new(
    correlator: Arc<Correlator>,
    transport: Arc<Transport>,
    allow_join_without_link: bool,
  ) -> Self {
    Self {
      correlator,
      transport,
      allow_join_without_link,
    }
  }

  /// Ask the backend whether `login` may join.
  ///
  /// Without a live link the configured policy decides. Timeouts and remote
  /// errors let the player in.
  pub async fn player_join(&self, login: &PlayerLogin) -> JoinDecision {
    if !self.transport.is_connected() {
      if self.allow_join_without_link {
        return JoinDecision::Allow;
      }
      tracing::warn!(player = %login.player, "backend unavailable; denying join");
      return JoinDecision::Deny {
        reason: NOT_READY_REASON.to_string(),
      };
    }

    let params = JoinParams {
      login,
      timestamp: unix_millis(),
    };
    let verdict = self
      .call::<JoinVerdict>(PLAYER_JOIN, to_params(&params), JOIN_DECISION_TIMEOUT)
      .await;

    match verdict {
      Ok(verdict)
        if verdict
          .action
          .as_deref()
          .is_some_and(|action| action.eq_ignore_ascii_case("kick")) =>
      {
        let reason = verdict
          .reason
          .unwrap_or_else(|| DEFAULT_DENY_REASON.to_string());
        tracing::info!(player = %login.player, reason = %reason, "backend denied join");
        JoinDecision::Deny { reason }
      }
      Ok(_) => JoinDecision::Allow,
      Err(err) => {
        tracing::warn!(player = %login.player, error = %err, "player.join failed; allowing");
        JoinDecision::Allow
      }
    }
  }

  /// Whether the player already has a linked account.
  pub async fn bind_query(
    &self,
    player_name: &str,
    player_uuid: &str,
  ) -> Result<bool, RpcError> {
    let params = BindParams {
      player_name,
      player_uuid,
    };
    let query: BindQuery = self
      .call(PLAYER_BIND_QUERY, to_params(&params), self.request_bound())
      .await?;
    Ok(query.is_bind)
  }

  /// Start linking and return the code the player types on the web side.
  pub async fn bind(
    &self,
    player_name: &str,
    player_uuid: &str,
  ) -> Result<String, RpcError> {
    let params = BindParams {
      player_name,
      player_uuid,
    };
    let issued: BindIssued = self
      .call(PLAYER_BIND, to_params(&params), self.request_bound())
      .await?;
    Ok(issued.auth_code)
  }

  pub async fn unbind(
    &self,
    player_name: &str,
    player_uuid: &str,
  ) -> Result<UnbindOutcome, RpcError> {
    let params = BindParams {
      player_name,
      player_uuid,
    };
    let unbound: Unbound = self
      .call(PLAYER_UNBIND, to_params(&params), self.request_bound())
      .await?;
    Ok(UnbindOutcome {
      success: unbound.is_success,
      message: unbound.message,
    })
  }

  /// Forward a chat line; silently skipped while the link is down.
  pub fn chat(&self, player: &str, uuid: &str, message: &str) {
    if !self.transport.is_connected() {
      return;
    }
    let params = ChatParams {
      player,
      uuid,
      message,
      timestamp: unix_millis(),
    };
    if let Err(err) = self.correlator.send_notification(MC_CHAT, to_params(&params)) {
      tracing::warn!(error = %err, "failed to send chat notification");
    }
  }

  fn request_bound(&self) -> Duration {
    self.transport.config().request_timeout
  }

  async fn call<T: DeserializeOwned>(
    &self,
    method: &str,
    params: Value,
    bound: Duration,
  ) -> Result<T, RpcError> {
    let result = self
      .correlator
      .send_request(method, params)?
      .wait_for(bound)
      .await?
      .into_result()?;
    serde_json::from_value(result)
      .map_err(|err| RpcError::Parse(format!("{method} result: {err}")))
  }
}

fn to_params<T: Serialize>(params: &T) -> Value {
  // Plain structs of strings and numbers always serialise.
  serde_json::to_value(params).unwrap_or(Value::Null)
}

fn unix_millis() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|elapsed| elapsed.as_millis() as u64)
    .unwrap_or_default()
}
