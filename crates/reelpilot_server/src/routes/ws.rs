use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    routing::get,
    Router,
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use reelpilot_core::sync::{ClientMessage, Envelope, SyncEvent};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;
use uuid::Uuid;

use crate::hub::SyncHub;
use crate::AppState;

/// Client silence after which the server sends a heartbeat.
pub const HEARTBEAT_AFTER: Duration = Duration::from_secs(30);

pub fn router() -> Router<AppState> {
    Router::new().route("/ws", get(sync_ws))
}

async fn sync_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

async fn send_envelope(
    sender: &mut SplitSink<WebSocket, Message>,
    envelope: &Envelope,
) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(envelope) {
        Ok(t) => t,
        Err(e) => {
            tracing::warn!("failed to serialize sync event: {e}");
            return Ok(());
        }
    };
    sender.send(Message::Text(text.into())).await
}

async fn handle_socket(socket: WebSocket, hub: SyncHub) {
    let client_id = Uuid::new_v4().to_string();
    // Subscribe before the greeting so nothing published in between is lost.
    let mut rx = hub.subscribe();
    let (mut sender, mut receiver) = socket.split();

    let hello = Envelope::now(SyncEvent::Connected {
        client_id: client_id.clone(),
    });
    if send_envelope(&mut sender, &hello).await.is_err() {
        return;
    }
    tracing::info!(client_id = %client_id, "sync client connected");

    let mut last_seen = Instant::now();
    loop {
        let idle = tokio::time::sleep_until(last_seen + HEARTBEAT_AFTER);
        tokio::select! {
            event = rx.recv() => match event {
                Ok(envelope) => {
                    if send_envelope(&mut sender, &envelope).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(client_id = %client_id, skipped, "sync client lagged, dropping old events");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    last_seen = Instant::now();
                    match serde_json::from_str::<ClientMessage>(text.as_str()) {
                        Ok(ClientMessage::Ping) => {
                            let pong = Envelope::now(SyncEvent::Pong {});
                            if send_envelope(&mut sender, &pong).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => tracing::debug!(client_id = %client_id, "ignoring client message: {e}"),
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => last_seen = Instant::now(),
                Some(Err(e)) => {
                    tracing::debug!(client_id = %client_id, "websocket receive error: {e}");
                    break;
                }
            },
            _ = idle => {
                let beat = Envelope::now(SyncEvent::Heartbeat {});
                if send_envelope(&mut sender, &beat).await.is_err() {
                    break;
                }
                last_seen = Instant::now();
            }
        }
    }

    tracing::info!(client_id = %client_id, "sync client disconnected");
}
