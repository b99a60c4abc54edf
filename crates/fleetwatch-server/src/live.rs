//! The `/live` WebSocket channel.
//!
//! Browsers cannot set an `Authorization` header on a WebSocket handshake,
//! so a bearer token may also be passed as `?token=`.

use axum::{
  extract::{
    State,
    ws::{Message, WebSocket, WebSocketUpgrade},
  },
  http::HeaderMap,
  response::{IntoResponse, Response},
};
use fleetwatch_api::{
  ApiError, Principal,
  auth::authenticate,
  extract::ApiQuery,
};
use fleetwatch_core::store::StateStore;
use futures::{SinkExt as _, StreamExt as _, stream::SplitSink};
use serde::Deserialize;

use crate::{
  AppState,
  relay::{ClientMessage, LiveRelay, ServerMessage},
};

#[derive(Debug, Default, Deserialize)]
pub struct LiveParams {
  pub token: Option<String>,
}

/// `GET /live`
pub async fn upgrade<S>(
  State(state): State<AppState<S>>,
  ApiQuery(params): ApiQuery<LiveParams>,
  headers: HeaderMap,
  ws: WebSocketUpgrade,
) -> Response
where
  S: StateStore + 'static,
{
  let token = params.token.as_deref().map(str::trim).filter(|t| !t.is_empty());
  let principal = match token {
    Some(token) => state.api.identity.resolve_token(token).map_err(ApiError::from),
    None => authenticate(&headers, &state.api.identity),
  };
  let principal = match principal {
    Ok(principal) => principal,
    Err(e) => {
      tracing::warn!(error = %e, "live upgrade rejected");
      return e.into_response();
    }
  };

  tracing::info!(uid = %principal.uid, "live upgrade accepted");
  let relay = state.relay.clone();
  ws.on_upgrade(move |socket| run_connection(socket, relay, principal))
    .into_response()
}

async fn run_connection<S>(socket: WebSocket, relay: LiveRelay<S>, principal: Principal)
where
  S: StateStore + 'static,
{
  let session = principal.session();
  let mut client = relay.connect();
  let (mut sink, mut stream) = socket.split();

  loop {
    tokio::select! {
      incoming = stream.next() => match incoming {
        Some(Ok(Message::Text(text))) => {
          let reply = match serde_json::from_str::<ClientMessage>(&text) {
            Ok(ClientMessage::GetVehicles) => relay.snapshot(&session).await,
            Err(e) => ServerMessage::Error {
              message: format!("unrecognised message: {e}"),
            },
          };
          if send(&mut sink, &reply).await.is_err() {
            break;
          }
        }
        Some(Ok(Message::Close(_))) | None => break,
        // Pings are answered by axum; binary frames are ignored.
        Some(Ok(_)) => {}
        Some(Err(e)) => {
          tracing::debug!(error = %e, "live socket error");
          break;
        }
      },
      outgoing = client.recv() => match outgoing {
        Some(message) => {
          if send(&mut sink, &message).await.is_err() {
            break;
          }
        }
        None => break,
      },
    }
  }

  tracing::info!(uid = %principal.uid, client = %client.id(), "live connection closed");
}

async fn send(
  sink: &mut SplitSink<WebSocket, Message>,
  message: &ServerMessage,
) -> Result<(), axum::Error> {
  let json = serde_json::to_string(message).map_err(axum::Error::new)?;
  sink.send(Message::Text(json.into())).await
}
