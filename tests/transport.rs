use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use fgate_client::bridge::{Bridge, HostServices};
use fgate_client::config::{BridgeConfig, ServerIdentity, WebSocketConfig};
use fgate_client::host::RconHost;
use fgate_client::outbound::{JoinDecision, PlayerLogin};
use fgate_client::rpc::{ConnectionState, FatalHandler, Transport};
use fgate_client::RpcError;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{
  ErrorResponse, Request, Response,
};
use tokio_tungstenite::tungstenite::http::HeaderMap;
use tokio_tungstenite::{WebSocketStream, accept_hdr_async};

type ServerSocket = WebSocketStream<TcpStream>;

async fn accept(listener: &TcpListener) -> (ServerSocket, HeaderMap) {
  let (stream, _) = listener.accept().await.expect("accept");
  let mut headers = HeaderMap::new();
  let socket = accept_hdr_async(
    stream,
    |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
      headers = request.headers().clone();
      Ok(response)
    },
  )
  .await
  .expect("upgrade");
  (socket, headers)
}

async fn send_json(socket: &mut ServerSocket, value: Value) {
  socket
    .send(Message::Text(value.to_string().into()))
    .await
    .expect("server send");
}

async fn next_json(socket: &mut ServerSocket) -> Value {
  loop {
    match socket.next().await.expect("frame").expect("read") {
      Message::Text(text) => return serde_json::from_str(text.as_str()).expect("json"),
      Message::Close(_) => panic!("client closed unexpectedly"),
      _ => {}
    }
  }
}

fn config(port: u16, max_retries: u32) -> BridgeConfig {
  BridgeConfig {
    websocket: WebSocketConfig {
      url: Some(format!("ws://127.0.0.1:{port}/ws")),
      token: Some("secret".to_string()),
      client_version: "1.0.0".to_string(),
      request_timeout: Duration::from_secs(5),
      reconnect_delay: Duration::from_millis(10),
      max_retries,
      debug: true,
    },
    identity: ServerIdentity {
      software: "Paper".to_string(),
      version: "1.21.4".to_string(),
      supports_placeholders: false,
    },
    ..BridgeConfig::default()
  }
}

fn bridge(config: BridgeConfig, on_fatal: Option<FatalHandler>) -> Bridge {
  let console = Arc::new(RconHost::new(None));
  let host = HostServices {
    server: Arc::new(config.identity.clone()),
    players: console.clone(),
    broadcaster: console,
    rcon: None,
  };
  Bridge::new(config, host, on_fatal).expect("bridge")
}

fn counting_fatal() -> (FatalHandler, Arc<AtomicUsize>) {
  let count = Arc::new(AtomicUsize::new(0));
  let seen = count.clone();
  let handler: FatalHandler = Arc::new(move |_: &RpcError| {
    seen.fetch_add(1, Ordering::SeqCst);
  });
  (handler, count)
}

async fn wait_for_state(transport: &Transport, want: ConnectionState) {
  let mut state = transport.subscribe();
  tokio::time::timeout(Duration::from_secs(5), async {
    loop {
      if *state.borrow_and_update() == want {
        return;
      }
      state.changed().await.expect("state channel");
    }
  })
  .await
  .expect("state reached in time");
}

#[tokio::test]
async fn welcome_unlocks_requests_in_both_directions() {
  let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
  let port = listener.local_addr().expect("addr").port();

  let server = tokio::spawn(async move {
    let (mut socket, headers) = accept(&listener).await;
    send_json(
      &mut socket,
      json!({"type": "welcome", "api_version": "1.2.0", "message": "hi"}),
    )
    .await;

    send_json(
      &mut socket,
      json!({"jsonrpc": "2.0", "id": "srv-1", "method": "get.client.info"}),
    )
    .await;
    // The handler reply and the client's own request may arrive either way
    // round.
    let (mut info, mut join) = (None, None);
    while info.is_none() || join.is_none() {
      let frame = next_json(&mut socket).await;
      if frame["method"] == "player.join" {
        send_json(
          &mut socket,
          json!({"id": frame["id"], "jsonrpc": "2.0", "result": {"action": "kick", "reason": "not linked"}}),
        )
        .await;
        join = Some(frame);
      } else {
        info = Some(frame);
      }
    }

    (socket, headers, info.unwrap(), join.unwrap())
  });

  let bridge = bridge(config(port, 3), None);
  let supervisor = bridge.start().expect("start");
  wait_for_state(bridge.transport(), ConnectionState::Authenticated).await;

  let login = PlayerLogin {
    player: "Alex".to_string(),
    uuid: "ec561538-f3fd-461d-aff5-086b22154bce".to_string(),
    ip: None,
  };
  let decision = bridge.backend().player_join(&login).await;
  assert_eq!(
    decision,
    JoinDecision::Deny {
      reason: "not linked".to_string()
    }
  );

  // Keep the server end open until the bridge closes it.
  let (_socket, headers, info, join) = server.await.expect("server task");
  assert_eq!(headers["authorization"], "Bearer secret");
  assert_eq!(headers["x-api-version"], "1.0.0");

  assert_eq!(info["id"], "srv-1");
  assert_eq!(info["jsonrpc"], "2.0");
  assert_eq!(info["result"]["data"]["minecraft_software"], "Paper");
  assert_eq!(info["result"]["data"]["supports_rcon"], false);

  assert_eq!(join["method"], "player.join");
  assert_eq!(join["params"]["player"], "Alex");

  let stats = bridge.stats();
  assert_eq!(stats.remote_version.as_deref(), Some("1.2.0"));
  assert_eq!(stats.retry_count, 0);

  bridge.shutdown().await;
  let outcome = tokio::time::timeout(Duration::from_secs(5), supervisor)
    .await
    .expect("supervisor stops")
    .expect("supervisor task");
  assert!(outcome.is_ok());
}

#[tokio::test]
async fn old_backend_is_closed_and_counted_as_a_failure() {
  let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
  let port = listener.local_addr().expect("addr").port();
  let connections = Arc::new(AtomicUsize::new(0));
  let close_codes = Arc::new(std::sync::Mutex::new(Vec::new()));

  let server = {
    let connections = connections.clone();
    let close_codes = close_codes.clone();
    tokio::spawn(async move {
      loop {
        let (mut socket, _) = accept(&listener).await;
        connections.fetch_add(1, Ordering::SeqCst);
        send_json(&mut socket, json!({"type": "welcome", "api_version": "0.9"}))
          .await;
        while let Some(Ok(message)) = socket.next().await {
          if let Message::Close(Some(frame)) = message {
            close_codes.lock().unwrap().push(u16::from(frame.code));
            break;
          }
        }
      }
    })
  };

  let (on_fatal, fatal_calls) = counting_fatal();
  let bridge = bridge(config(port, 2), Some(on_fatal));
  let supervisor = bridge.start().expect("start");

  let outcome = tokio::time::timeout(Duration::from_secs(10), supervisor)
    .await
    .expect("supervisor gives up")
    .expect("supervisor task");
  server.abort();

  assert!(matches!(outcome, Err(RpcError::RetriesExhausted(2))));
  assert_eq!(fatal_calls.load(Ordering::SeqCst), 1);
  assert_eq!(connections.load(Ordering::SeqCst), 2);
  assert!(close_codes.lock().unwrap().iter().all(|code| *code == 1008));
  assert!(!bridge.stats().connected);
}

#[tokio::test]
async fn unreachable_backend_exhausts_the_budget_once() {
  let port = {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    listener.local_addr().expect("addr").port()
  };

  let (on_fatal, fatal_calls) = counting_fatal();
  let bridge = bridge(config(port, 3), Some(on_fatal));
  let supervisor = bridge.start().expect("start");

  let outcome = tokio::time::timeout(Duration::from_secs(10), supervisor)
    .await
    .expect("supervisor gives up")
    .expect("supervisor task");

  assert!(matches!(outcome, Err(RpcError::RetriesExhausted(3))));
  assert_eq!(fatal_calls.load(Ordering::SeqCst), 1);
  assert_eq!(bridge.stats().state, ConnectionState::Disconnected);
}

#[tokio::test]
async fn local_close_fails_pending_and_never_reconnects() {
  let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
  let port = listener.local_addr().expect("addr").port();
  let connections = Arc::new(AtomicUsize::new(0));

  let server = {
    let connections = connections.clone();
    tokio::spawn(async move {
      loop {
        let (mut socket, _) = accept(&listener).await;
        connections.fetch_add(1, Ordering::SeqCst);
        send_json(&mut socket, json!({"type": "welcome", "api_version": "1.0.0"}))
          .await;
        // Swallow everything without answering.
        while let Some(Ok(_)) = socket.next().await {}
      }
    })
  };

  let bridge = bridge(config(port, 5), None);
  let supervisor = bridge.start().expect("start");
  assert!(matches!(bridge.start(), Err(RpcError::Config(_))));
  wait_for_state(bridge.transport(), ConnectionState::Authenticated).await;

  let pending = bridge
    .correlator()
    .send_request("player.bindQuery", json!({"playerName": "Alex"}))
    .expect("request sent");
  assert_eq!(bridge.stats().pending_requests, 1);

  bridge.shutdown().await;
  assert!(matches!(pending.await, Err(RpcError::ConnectionClosed)));

  let outcome = tokio::time::timeout(Duration::from_secs(5), supervisor)
    .await
    .expect("supervisor stops")
    .expect("supervisor task");
  assert!(outcome.is_ok());

  tokio::time::sleep(Duration::from_millis(100)).await;
  assert_eq!(connections.load(Ordering::SeqCst), 1);
  server.abort();
}

#[tokio::test]
async fn bridge_reconnects_after_a_shutdown_and_restart() {
  let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
  let port = listener.local_addr().expect("addr").port();
  let connections = Arc::new(AtomicUsize::new(0));

  let server = {
    let connections = connections.clone();
    tokio::spawn(async move {
      loop {
        let (mut socket, _) = accept(&listener).await;
        connections.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
          send_json(&mut socket, json!({"type": "welcome", "api_version": "1.0.0"}))
            .await;
          while let Some(Ok(_)) = socket.next().await {}
        });
      }
    })
  };

  let bridge = bridge(config(port, 5), None);
  let first = bridge.start().expect("first start");
  wait_for_state(bridge.transport(), ConnectionState::Authenticated).await;

  bridge.shutdown().await;
  let outcome = tokio::time::timeout(Duration::from_secs(5), first)
    .await
    .expect("first run stops")
    .expect("supervisor task");
  assert!(outcome.is_ok());
  assert_eq!(bridge.stats().state, ConnectionState::Disconnected);

  let second = bridge.start().expect("second start");
  wait_for_state(bridge.transport(), ConnectionState::Authenticated).await;
  assert_eq!(connections.load(Ordering::SeqCst), 2);
  assert!(!second.is_finished());

  bridge.shutdown().await;
  let outcome = tokio::time::timeout(Duration::from_secs(5), second)
    .await
    .expect("second run stops")
    .expect("supervisor task");
  assert!(outcome.is_ok());
  server.abort();
}
