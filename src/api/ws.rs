//! Per-machine WebSocket namespace.
//!
//! A client connects to `/api/v1/machines/:name/ws` and receives JSON
//! `{"event": ..., "data": ...}` frames: `initialize` first, then `update`
//! and `anomaly` as they happen. Sending the text `initialize` re-requests the
//! replay snapshot. The stream ends when the machine disconnects.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use super::ApiState;
use crate::fanout::{FanoutEvent, HubHandle, Subscription};

/// Client text requesting a fresh `initialize` frame
pub const INITIALIZE_REQUEST: &str = "initialize";

/// GET /api/v1/machines/:name/ws
pub async fn machine_ws(
    ws: WebSocketUpgrade,
    Path(machine): Path<String>,
    State(state): State<ApiState>,
) -> Response {
    let subscription = match state.hub.subscribe(&machine).await {
        Ok(Some(subscription)) => subscription,
        Ok(None) => {
            return (StatusCode::NOT_FOUND, format!("machine {machine} is not connected")).into_response();
        }
        Err(e) => {
            warn!(machine = %machine, error = %e, "Subscribe failed");
            return StatusCode::SERVICE_UNAVAILABLE.into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_socket(socket, machine, subscription, state))
}

fn to_text(event: &FanoutEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Message::Text(json)),
        Err(e) => {
            warn!(error = %e, "Failed to encode fan-out event");
            None
        }
    }
}

async fn snapshot(hub: &HubHandle, machine: &str) -> Option<FanoutEvent> {
    match hub.snapshot(machine).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            debug!(machine, error = %e, "Snapshot unavailable");
            None
        }
    }
}

async fn handle_socket(socket: WebSocket, machine: String, subscription: Subscription, state: ApiState) {
    info!(machine = %machine, "WebSocket subscriber joined");

    let (mut sender, mut receiver) = socket.split();
    let Subscription { initialize, mut events } = subscription;

    if let Some(msg) = to_text(&initialize) {
        if sender.send(msg).await.is_err() {
            return;
        }
    }

    let period = state.ping_interval;
    let mut ping = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        if let Some(msg) = to_text(&event) {
                            if sender.send(msg).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        debug!(machine = %machine, missed, "WebSocket subscriber lagged");
                    }
                    Err(RecvError::Closed) => {
                        // namespace closed: the machine disconnected
                        let _ = sender.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            _ = ping.tick() => {
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) if text.trim() == INITIALIZE_REQUEST => {
                        if let Some(msg) = snapshot(&state.hub, &machine).await.as_ref().and_then(to_text) {
                            if sender.send(msg).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    info!(machine = %machine, "WebSocket subscriber left");
}
