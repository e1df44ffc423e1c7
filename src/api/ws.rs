//! src/api/ws.rs
//!
//! WebSocket transport for the session fabric. Each connection gets its own
//! session ID and a pair of concurrent tasks: a read loop that feeds raw
//! frames to `FabricHandle::handle_raw`, and a write loop that drains the
//! session's bounded outbound queue. Mirrors the teacher's
//! upgrade-then-split-into-two-loops shape in `handle_socket`, generalized
//! from a one-way state push to the bidirectional envelope fabric.

use crate::api::ApiState;
use crate::session::session::OutboundItem;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<ApiState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: ApiState) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel(state.outbound_queue_depth);

    let session_id = state.fabric.accept(outbound_tx).await;
    tracing::info!(session_id, "session connected");

    let write_task = tokio::spawn(async move {
        while let Some(item) = outbound_rx.recv().await {
            match item {
                OutboundItem::Envelope(envelope) => {
                    let json = match serde_json::to_string(&envelope) {
                        Ok(j) => j,
                        Err(e) => {
                            tracing::error!(error = %e, "failed to serialize outbound envelope");
                            continue;
                        }
                    };
                    if sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                OutboundItem::Close(reason) => {
                    tracing::info!(reason, "closing session");
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    let fabric = state.fabric.clone();
    let read_session_id = session_id.clone();
    let read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => fabric.handle_raw(&read_session_id, &text).await,
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    let _ = tokio::join!(write_task, read_task);
    state.fabric.remove_session(&session_id).await;
    tracing::info!(session_id, "session disconnected");
}
