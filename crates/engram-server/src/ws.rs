//! WebSocket handler for the live event stream.
//!
//! Clients connect to `/ws` and receive every core event as JSON, plus a
//! heartbeat with store counts every few seconds.

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tracing::debug;

use crate::state::AppState;

const HEARTBEAT_PERIOD: std::time::Duration = std::time::Duration::from_secs(5);

/// WebSocket upgrade handler for GET /ws
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = state.core.subscribe_events();

    debug!("websocket client connected");

    let welcome = serde_json::json!({
        "type": "connected",
        "data": {
            "version": engram_core::VERSION,
            "timestamp": Utc::now().to_rfc3339(),
        }
    });
    if sender
        .send(Message::Text(welcome.to_string().into()))
        .await
        .is_err()
    {
        return;
    }

    let mut heartbeat = tokio::time::interval(HEARTBEAT_PERIOD);

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(record) => {
                        let payload = serde_json::json!({"type": "event", "data": record});
                        if sender.send(Message::Text(payload.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "websocket client lagged behind the event stream");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            _ = heartbeat.tick() => {
                let counts = state.core.health().map(|h| h.counts).unwrap_or_default();
                let payload = serde_json::json!({
                    "type": "heartbeat",
                    "data": {
                        "uptimeSecs": state.uptime_secs(),
                        "facts": counts.facts,
                        "links": counts.links,
                        "tempPending": counts.temp_pending,
                        "timestamp": Utc::now().to_rfc3339(),
                    }
                });
                if sender.send(Message::Text(payload.to_string().into())).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // Clients have nothing to say; ignore
                    Some(Err(_)) => break,
                }
            }
        }
    }

    debug!("websocket client disconnected");
}
