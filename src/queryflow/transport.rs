//! Chat transport: frame vocabulary and the WebSocket adapter.
//!
//! The session orchestrator is framework-agnostic — it talks in
//! [`ClientFrame`]/[`ServerFrame`] values over channels, which is also how
//! the tests drive it. This module defines that vocabulary and provides the
//! production adapter: an axum WebSocket handler that decodes inbound text
//! frames (enforcing the size limit), encodes outbound frames, and bridges
//! both onto the orchestrator's channels.
//!
//! Framing is JSON with a `type` tag. Unknown client message types are
//! ignored with a log, never rejected; malformed JSON gets an `error`
//! frame. Outbound frames are written by a single task, preserving the
//! order the orchestrator produced them.

use crate::queryflow::session::SessionOrchestrator;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Buffer size of the outbound frame channel. Deliberately small: when the
/// client cannot drain frames, the workflow run is paused at its next event
/// emission instead of frames being dropped.
pub(crate) const OUTBOUND_BUFFER: usize = 32;

/// Buffer size of the inbound frame channel.
pub(crate) const INBOUND_BUFFER: usize = 16;

/// Frames a client may send.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// A user message; produces exactly one terminal frame with the same id.
    Chat {
        content: String,
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context: Option<HashMap<String, Value>>,
    },
    /// Merge new entries into the session context (last write wins per key).
    ContextUpdate { context: HashMap<String, Value> },
    /// Liveness probe; answered immediately with `pong`.
    Ping,
    /// Anything with an unrecognized `type` tag.
    #[serde(other)]
    Unknown,
}

/// Frames the server may send.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// First frame on every connection; carries the (new or resumed)
    /// session id the client should present on reconnect.
    ConnectionEstablished { session_id: String },
    /// The chat message was accepted and a run is starting.
    MessageReceived { id: String },
    /// A workflow node began executing for the given chat id.
    WorkflowProgress { node: String, id: String },
    /// A piece of the answer text.
    StreamChunk { content: String, id: String },
    /// Terminal success frame; no further chunks follow for this id.
    StreamComplete { id: String },
    /// Terminal failure frame (or a connection-level error when `id` is
    /// absent). The message is kind-level only.
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    /// Answer to a client `ping`.
    Pong,
    /// Server-side keepalive after outbound idleness.
    Ping,
    /// Decorative: a filter derived from the answer, for UI chips.
    FilterGenerated { id: String, filter: Value },
    /// Decorative: a chart specification derived from the answer.
    Visualization { id: String, spec: Value },
}

/// Build the axum router exposing the chat stream at `/ws`.
///
/// Clients reconnect by passing their previous session id as a query
/// parameter: `/ws?session_id=<id>`.
pub fn router(orchestrator: Arc<SessionOrchestrator>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(orchestrator)
}

/// Bind and serve the chat transport until the process is stopped.
pub async fn serve(
    orchestrator: Arc<SessionOrchestrator>,
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("chat transport listening on {}", addr);
    axum::serve(listener, router(orchestrator)).await?;
    Ok(())
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(orchestrator): State<Arc<SessionOrchestrator>>,
) -> impl IntoResponse {
    let resume = params.get("session_id").cloned();
    ws.on_upgrade(move |socket| handle_socket(socket, orchestrator, resume))
}

/// Bridge one WebSocket onto the orchestrator's channel pair.
async fn handle_socket(
    socket: WebSocket,
    orchestrator: Arc<SessionOrchestrator>,
    resume: Option<String>,
) {
    let max_frame_bytes = orchestrator.config().max_frame_bytes;
    let (mut ws_tx, mut ws_rx) = socket.split();

    let (out_tx, mut out_rx) = mpsc::channel::<ServerFrame>(OUTBOUND_BUFFER);
    let (in_tx, in_rx) = mpsc::channel::<ClientFrame>(INBOUND_BUFFER);
    let reader_errors = out_tx.clone();

    // Single writer task: outbound frames hit the wire in channel order.
    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            match serde_json::to_string(&frame) {
                Ok(json) => {
                    if ws_tx.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(err) => log::error!("failed to encode outbound frame: {}", err),
            }
        }
    });

    let reader = tokio::spawn(async move {
        while let Some(Ok(message)) = ws_rx.next().await {
            match message {
                Message::Text(text) => {
                    if text.len() > max_frame_bytes {
                        log::warn!(
                            "dropping oversized frame ({} > {} bytes)",
                            text.len(),
                            max_frame_bytes
                        );
                        let _ = reader_errors
                            .send(ServerFrame::Error {
                                message: "frame exceeds the size limit".to_string(),
                                id: None,
                            })
                            .await;
                        continue;
                    }
                    match serde_json::from_str::<ClientFrame>(&text) {
                        Ok(frame) => {
                            if in_tx.send(frame).await.is_err() {
                                break;
                            }
                        }
                        Err(err) => {
                            log::warn!("malformed client frame: {}", err);
                            let _ = reader_errors
                                .send(ServerFrame::Error {
                                    message: "malformed frame".to_string(),
                                    id: None,
                                })
                                .await;
                        }
                    }
                }
                Message::Close(_) => break,
                // Protocol-level ping/pong is handled by the library.
                _ => {}
            }
        }
    });

    orchestrator.run_connection(in_rx, out_tx, resume).await;

    reader.abort();
    let _ = writer.await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_frames_decode_by_type_tag() {
        let chat: ClientFrame =
            serde_json::from_str(r#"{"type":"chat","content":"hi","id":"m1"}"#).unwrap();
        assert!(matches!(chat, ClientFrame::Chat { ref id, .. } if id == "m1"));

        let update: ClientFrame =
            serde_json::from_str(r#"{"type":"context_update","context":{"region":"emea"}}"#)
                .unwrap();
        assert!(matches!(update, ClientFrame::ContextUpdate { .. }));

        let ping: ClientFrame = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(ping, ClientFrame::Ping));
    }

    #[test]
    fn unknown_client_types_map_to_unknown() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"telemetry_blob"}"#).unwrap();
        assert!(matches!(frame, ClientFrame::Unknown));
    }

    #[test]
    fn server_frames_encode_with_snake_case_tags() {
        let frame = ServerFrame::ConnectionEstablished {
            session_id: "s1".to_string(),
        };
        let encoded = serde_json::to_value(&frame).unwrap();
        assert_eq!(encoded["type"], json!("connection_established"));
        assert_eq!(encoded["session_id"], json!("s1"));

        let error = ServerFrame::Error {
            message: "m".to_string(),
            id: None,
        };
        let encoded = serde_json::to_value(&error).unwrap();
        assert!(encoded.get("id").is_none());
    }

    #[test]
    fn chat_context_is_optional() {
        let chat: ClientFrame = serde_json::from_str(
            r#"{"type":"chat","content":"hi","id":"m1","context":{"team":"sre"}}"#,
        )
        .unwrap();
        match chat {
            ClientFrame::Chat { context, .. } => {
                assert_eq!(context.unwrap()["team"], json!("sre"));
            }
            _ => panic!("expected chat frame"),
        }
    }
}
