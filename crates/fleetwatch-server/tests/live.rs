use std::{net::SocketAddr, sync::Arc, time::Duration};

use fleetwatch_api::{AccountConfig, IdentityProvider};
use fleetwatch_core::{Session, vehicle::Position};
use fleetwatch_server::{AppState, ServerConfig};
use fleetwatch_store_sqlite::SqliteStore;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite;

type WsStream =
  tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

const PASSWORD: &str = "hunter2";

// ── Helpers ──────────────────────────────────────────────────────────

async fn start_server() -> (SocketAddr, AppState<SqliteStore>) {
  let store = SqliteStore::open_in_memory().await.unwrap();
  let config = ServerConfig {
    accounts: vec![AccountConfig {
      uid:           "alice".into(),
      email:         "alice@example.com".into(),
      password_hash: IdentityProvider::hash_password(PASSWORD).unwrap(),
      display_name:  None,
      admin:         false,
      device:        false,
    }],
    ..ServerConfig::default()
  };
  let state = AppState::new(Arc::new(store), config);
  let app = fleetwatch_server::router(state.clone());

  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();
  tokio::spawn(async move {
    axum::serve(listener, app).await.unwrap();
  });

  (addr, state)
}

fn login(state: &AppState<SqliteStore>) -> String {
  let (_, token) = state
    .api
    .identity
    .login("alice@example.com", PASSWORD)
    .unwrap();
  token
}

async fn connect(addr: SocketAddr, token: &str) -> WsStream {
  let url = format!("ws://{addr}/live?token={token}");
  let (stream, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
  stream
}

/// Read the next text message as JSON, skipping control frames.
async fn next_json(ws: &mut WsStream) -> Value {
  loop {
    let message = tokio::time::timeout(Duration::from_secs(5), ws.next())
      .await
      .expect("timed out waiting for a message");
    match message {
      Some(Ok(tungstenite::Message::Text(t))) => return serde_json::from_str(&t).unwrap(),
      Some(Ok(tungstenite::Message::Ping(data))) => {
        let _ = ws.send(tungstenite::Message::Pong(data)).await;
      }
      Some(Ok(tungstenite::Message::Pong(_))) => continue,
      Some(Ok(other)) => panic!("unexpected message: {other:?}"),
      Some(Err(e)) => panic!("ws error: {e}"),
      None => panic!("ws stream ended unexpectedly"),
    }
  }
}

async fn send_json(ws: &mut WsStream, value: Value) {
  ws.send(tungstenite::Message::Text(value.to_string().into()))
    .await
    .unwrap();
}

// ── Tests ────────────────────────────────────────────────────────────

#[tokio::test]
async fn get_vehicles_replies_with_a_snapshot() {
  let (addr, state) = start_server().await;
  state
    .api
    .fleet
    .update_vehicle_location(&Session::service(), "V1", Position {
      latitude:  35.0,
      longitude: -80.0,
    })
    .await
    .unwrap();

  let mut ws = connect(addr, &login(&state)).await;
  // The standing subscription delivers the current collection first.
  let initial = next_json(&mut ws).await;
  assert_eq!(initial["type"], "vehicleUpdates");

  send_json(&mut ws, json!({ "type": "getVehicles" })).await;
  let reply = next_json(&mut ws).await;
  assert_eq!(reply["type"], "vehicleUpdates");
  assert_eq!(reply["vehicles"]["V1"]["latitude"], 35.0);
  assert_eq!(reply["vehicles"]["V1"]["sos"], false);
}

#[tokio::test]
async fn location_updates_are_pushed() {
  let (addr, state) = start_server().await;
  let mut ws = connect(addr, &login(&state)).await;

  let initial = next_json(&mut ws).await;
  assert_eq!(initial, json!({ "type": "vehicleUpdates", "vehicles": {} }));

  state
    .api
    .fleet
    .update_vehicle_location(&Session::service(), "ESP32_1", Position {
      latitude:  29.904322,
      longitude: 77.839668,
    })
    .await
    .unwrap();

  let update = next_json(&mut ws).await;
  assert_eq!(update["type"], "vehicleUpdates");
  assert_eq!(update["vehicles"]["ESP32_1"]["isActive"], true);
  assert_eq!(state.relay.client_count(), 1);
}

#[tokio::test]
async fn unrecognised_messages_get_an_error() {
  let (addr, state) = start_server().await;
  let mut ws = connect(addr, &login(&state)).await;
  next_json(&mut ws).await;

  send_json(&mut ws, json!({ "type": "subscribeEverything" })).await;
  let reply = next_json(&mut ws).await;
  assert_eq!(reply["type"], "error");
  assert!(reply["message"].is_string());
}

#[tokio::test]
async fn upgrade_requires_credentials() {
  let (addr, _state) = start_server().await;

  for url in [
    format!("ws://{addr}/live"),
    format!("ws://{addr}/live?token=not-a-token"),
  ] {
    match tokio_tungstenite::connect_async(&url).await {
      Err(tungstenite::Error::Http(resp)) => assert_eq!(resp.status(), 401),
      Err(e) => panic!("expected 401, got {e}"),
      Ok(_) => panic!("upgrade accepted without credentials"),
    }
  }
}
