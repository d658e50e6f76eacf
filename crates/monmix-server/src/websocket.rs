/// Telemetry stream for UI sessions.
///
///   /ws/telemetry — snapshot on join, then telemetry and connection messages
///
/// Each socket is one fan-out subscriber. The server pings on a fixed
/// period; any inbound frame counts as proof of life for pruning.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use tracing::{debug, info};

use crate::fanout::snapshot_message;
use crate::state::AppState;

const PING_INTERVAL: Duration = Duration::from_secs(10);

/// Handler for /ws/telemetry
pub async fn ws_telemetry_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_telemetry_ws(socket, state))
}

async fn handle_telemetry_ws(mut socket: WebSocket, state: AppState) {
    let fanout = state.inner.fanout.clone();
    let greeting = snapshot_message(&fanout, state.client(), state.watchdog());
    let mut subscription = fanout.subscribe(Some(&greeting));
    let id = subscription.id;
    info!(id, subscribers = fanout.subscriber_count(), "Telemetry client connected");

    let mut ping = tokio::time::interval(PING_INTERVAL);
    ping.tick().await;

    loop {
        tokio::select! {
            outbound = subscription.rx.recv() => {
                match outbound {
                    Some(text) => {
                        if socket.send(Message::Text(text.to_string())).await.is_err() {
                            break;
                        }
                    }
                    // Pruned by the liveness loop
                    None => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(Message::Ping(data))) => {
                        fanout.touch(id);
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => fanout.touch(id),
                }
            }
            _ = ping.tick() => {
                if socket.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    fanout.unsubscribe(id);
    debug!(id, "Telemetry client disconnected");
}
