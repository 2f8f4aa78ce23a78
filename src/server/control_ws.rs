use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use tokio::time::{timeout, Instant};
use tracing::{debug, warn};
use vstream_core_types::util::epoch_secs;
use vstream_core_types::{SessionId, WireErrorKind};
use vstream_registry::SessionEntry;
use vstream_streamer::{ServerFrame, StreamFrame};

use crate::metrics;
use crate::server::control_messages::{ControlEnvelope, ControlMessage};
use crate::server::rate_limit::RateLimiter;
use crate::server::stream_ws::{close_invalid, lookup_failure_kind};
use crate::server::AppState;

/// Close code for a control channel that reached its lifetime cap.
pub const CLOSE_SESSION_EXPIRED: u16 = 4408;

/// Browser command execution budget per control message.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

pub async fn control_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        handle_control(socket, state, session_id).await;
    })
}

async fn handle_control(mut socket: WebSocket, state: AppState, raw_id: String) {
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

    // workflow input steps hold off while a viewer is interacting
    entry.controls.raise_pause();
    debug!(target: "control-ws", session = %session_id, "control client connected");

    let deadline = Instant::now() + state.config.control_max_duration;
    let mut limiter = RateLimiter::new(state.config.control_rate_per_sec, Duration::from_secs(1));

    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {
                let frame = StreamFrame::Control(ServerFrame::SessionExpired);
                let _ = socket.send(Message::Text(frame.to_json())).await;
                let _ = socket
                    .send(Message::Close(Some(CloseFrame {
                        code: CLOSE_SESSION_EXPIRED,
                        reason: WireErrorKind::SessionExpired.as_str().into(),
                    })))
                    .await;
                debug!(target: "control-ws", session = %session_id, "control channel lifetime reached");
                break;
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let reply = handle_control_text(&entry, &session_id, &mut limiter, &text).await;
                        if socket.send(Message::Text(reply.to_json())).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = socket.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!(target: "control-ws", ?frame, "control client closed");
                        break;
                    }
                    Some(Ok(Message::Binary(_))) | Some(Ok(Message::Pong(_))) => {}
                    Some(Err(err)) => {
                        warn!(target: "control-ws", ?err, "control socket error");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    entry.controls.release_pause();
    debug!(target: "control-ws", session = %session_id, "control client disconnected");
}

async fn handle_control_text(
    entry: &SessionEntry,
    session_id: &SessionId,
    limiter: &mut RateLimiter,
    text: &str,
) -> StreamFrame {
    let Ok(envelope) = serde_json::from_str::<ControlEnvelope>(text) else {
        metrics::record_control_command("invalid");
        return error_frame(WireErrorKind::InvalidMessage);
    };
    if let Some(supplied) = &envelope.session_id {
        if SessionId::parse(supplied).ok().as_ref() != Some(session_id) {
            metrics::record_control_command("invalid");
            return error_frame(WireErrorKind::InvalidMessage);
        }
    }
    let Ok(message) = serde_json::from_value::<ControlMessage>(envelope.message) else {
        metrics::record_control_command("invalid");
        return error_frame(WireErrorKind::InvalidMessage);
    };
    if let Err(reason) = message.validate() {
        metrics::record_control_command("invalid");
        debug!(target: "control-ws", session = %session_id, reason, "invalid control message");
        return error_frame(WireErrorKind::InvalidMessage);
    }

    // only valid messages count against the limit
    if !limiter.allow(Instant::now()) {
        metrics::record_control_command("rate_limited");
        return error_frame(WireErrorKind::RateLimitExceeded);
    }

    let action = message.describe();
    match timeout(COMMAND_TIMEOUT, message.execute(entry.browser.as_ref())).await {
        Ok(Ok(())) => {
            metrics::record_control_command("ack");
            debug!(target: "control-ws", session = %session_id, action = %action, "control command executed");
            StreamFrame::Control(ServerFrame::Ack {
                timestamp: epoch_secs(),
            })
        }
        Ok(Err(err)) => {
            metrics::record_control_command("failed");
            warn!(target: "control-ws", session = %session_id, action = %action, %err, "control command failed");
            error_frame(WireErrorKind::ExecutionFailed)
        }
        Err(_) => {
            metrics::record_control_command("timeout");
            warn!(target: "control-ws", session = %session_id, action = %action, "control command timed out");
            error_frame(WireErrorKind::ExecutionFailed)
        }
    }
}

fn error_frame(kind: WireErrorKind) -> StreamFrame {
    StreamFrame::Control(ServerFrame::Error { error_type: kind })
}
