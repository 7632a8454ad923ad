use std::time::Duration;

use axum::{
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::debug;

use super::api::{ApiError, SharedState};
use crate::pipeline::state::StepStatus;
use crate::pipeline::{ProgressEvent, RunRecord};

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

// ── WebSocket message types ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum WsMessage {
    /// First frame on every connection.
    Snapshot { run: RunRecord },
    Progress(ProgressEvent),
}

impl WsMessage {
    fn to_text(&self) -> Option<String> {
        serde_json::to_string(self)
            .map_err(|e| debug!("Failed to serialize WsMessage: {}", e))
            .ok()
    }
}

/// A run-level event after which nothing more is published.
pub fn is_terminal_event(event: &ProgressEvent) -> bool {
    let status = event.status.as_str();
    event.step == status
        && (status == StepStatus::Completed.as_str() || status == StepStatus::Failed.as_str())
}

// ── WebSocket handler ────────────────────────────────────────────────

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(id): Path<String>,
    State(state): State<SharedState>,
) -> Result<impl IntoResponse, ApiError> {
    // Subscribe before the snapshot so nothing falls between the two.
    let rx = state
        .store
        .subscribe(&id)
        .ok_or_else(|| ApiError::NotFound(format!("Run {} not found", id)))?;
    let snapshot = state
        .store
        .get(&id)
        .ok_or_else(|| ApiError::NotFound(format!("Run {} not found", id)))?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, snapshot, rx)))
}

async fn handle_socket(
    socket: WebSocket,
    snapshot: RunRecord,
    rx: broadcast::Receiver<ProgressEvent>,
) {
    let (mut sender, receiver) = socket.split();
    let finished = snapshot.is_finished() || snapshot.status.is_terminal();

    let Some(text) = (WsMessage::Snapshot { run: snapshot }).to_text() else {
        return;
    };
    if sender.send(Message::Text(text.into())).await.is_err() {
        return;
    }
    if finished {
        let _ = sender.send(Message::Close(None)).await;
        return;
    }
    run_socket_loop(sender, receiver, rx).await;
}

/// Forward run events with ping/pong keepalive.
///
/// Ends on the run's terminal event, when the run's channel closes, when
/// the client goes away, or when no Pong arrives within [`PONG_TIMEOUT`]
/// of a Ping.
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut rx: broadcast::Receiver<ProgressEvent>,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // The first tick completes immediately
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    break;
                }
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            result = rx.recv() => {
                match result {
                    Ok(event) => {
                        let terminal = is_terminal_event(&event);
                        if let Some(text) = WsMessage::Progress(event).to_text()
                            && sender.send(Message::Text(text.into())).await.is_err()
                        {
                            break;
                        }
                        if terminal {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        debug!(missed, "WebSocket subscriber lagged");
                        continue;
                    }
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    // Best-effort close frame
    let _ = sender.send(Message::Close(None)).await;
}
