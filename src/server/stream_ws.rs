use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use serde::Deserialize;
use tracing::{debug, warn};
use vstream_core_types::util::epoch_secs;
use vstream_core_types::{SessionId, WireErrorKind};
use vstream_streamer::{ServerFrame, StreamFrame};

use crate::server::AppState;

/// Close code for malformed session ids.
pub const CLOSE_INVALID_SESSION: u16 = 4400;

#[derive(Deserialize)]
struct ClientMessage {
    #[serde(rename = "type")]
    kind: String,
}

pub async fn stream_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        handle_stream(socket, state, session_id).await;
    })
}

async fn handle_stream(mut socket: WebSocket, state: AppState, raw_id: String) {
    let session_id = match SessionId::parse(&raw_id) {
        Ok(id) => id,
        Err(_) => {
            close_invalid(socket).await;
            return;
        }
    };

    let Some(entry) = state.registry.lookup(&session_id) else {
        let kind = lookup_failure_kind(&state, &session_id);
        let frame = StreamFrame::Control(ServerFrame::Error { error_type: kind });
        let _ = socket.send(Message::Text(frame.to_json())).await;
        let _ = socket.close().await;
        return;
    };

    let welcome = StreamFrame::Control(ServerFrame::ConnectionEstablished {
        session_id: session_id.clone(),
        timestamp: epoch_secs(),
    });
    if socket.send(Message::Text(welcome.to_json())).await.is_err() {
        return;
    }

    let (client_id, mut frames) = entry.streamer.register_client().await;
    debug!(target: "stream-ws", session = %session_id, client = %client_id, "stream client connected");

    loop {
        tokio::select! {
            frame = frames.recv() => {
                match frame {
                    Some(frame) => {
                        let expired = matches!(
                            frame,
                            StreamFrame::Control(ServerFrame::SessionExpired)
                        );
                        if socket.send(Message::Text(frame.to_json())).await.is_err() {
                            break;
                        }
                        if expired {
                            let _ = socket.close().await;
                            break;
                        }
                    }
                    None => {
                        let _ = socket.close().await;
                        break;
                    }
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = handle_client_text(&entry, &client_id, &text).await {
                            if socket.send(Message::Text(reply.to_json())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = socket.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!(target: "stream-ws", ?frame, "stream client closed");
                        break;
                    }
                    Some(Ok(Message::Binary(_))) | Some(Ok(Message::Pong(_))) => {}
                    Some(Err(err)) => {
                        warn!(target: "stream-ws", ?err, "stream socket error");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    entry.streamer.deregister_client(&client_id).await;
    debug!(target: "stream-ws", session = %session_id, client = %client_id, "stream client disconnected");
}

/// Client→server control messages: ping, client_ready,
/// sequence_reset_request. Anything else is answered with a non-fatal
/// `invalid_message` error frame.
async fn handle_client_text(
    entry: &vstream_registry::SessionEntry,
    client_id: &str,
    text: &str,
) -> Option<StreamFrame> {
    let Ok(message) = serde_json::from_str::<ClientMessage>(text) else {
        return Some(StreamFrame::Control(ServerFrame::Error {
            error_type: WireErrorKind::InvalidMessage,
        }));
    };
    match message.kind.as_str() {
        "ping" => Some(StreamFrame::Control(ServerFrame::Pong {
            timestamp: epoch_secs(),
        })),
        "client_ready" => {
            entry.streamer.client_ready(client_id).await;
            None
        }
        "sequence_reset_request" => {
            entry.streamer.request_sequence_reset(client_id).await;
            None
        }
        other => {
            debug!(target: "stream-ws", kind = other, "unknown stream client message");
            Some(StreamFrame::Control(ServerFrame::Error {
                error_type: WireErrorKind::InvalidMessage,
            }))
        }
    }
}

pub(crate) fn lookup_failure_kind(state: &AppState, session_id: &SessionId) -> WireErrorKind {
    match state.manager.phase(session_id) {
        Some(phase) if !phase.is_terminal() => WireErrorKind::BrowserNotReady,
        _ => WireErrorKind::SessionNotFound,
    }
}

pub(crate) async fn close_invalid(mut socket: WebSocket) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: CLOSE_INVALID_SESSION,
            reason: WireErrorKind::InvalidMessage.as_str().into(),
        })))
        .await;
}
