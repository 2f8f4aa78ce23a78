use std::sync::Arc;

use serde::Serialize;
use tracing::error;
use vstream_core_types::{SessionId, WireEvent, WireErrorKind};

/// Non-event frames a channel can push to a client. Tagged by `type` so
/// clients can discriminate them from wire events.
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    ConnectionEstablished {
        session_id: SessionId,
        timestamp: f64,
    },
    SequenceReset {
        base: u64,
    },
    SessionExpired,
    Pong {
        timestamp: f64,
    },
    Ack {
        timestamp: f64,
    },
    Error {
        error_type: WireErrorKind,
    },
}

/// One outbound frame on a stream channel.
#[derive(Clone, Debug)]
pub enum StreamFrame {
    Event(Arc<WireEvent>),
    Control(ServerFrame),
}

impl StreamFrame {
    pub fn to_json(&self) -> String {
        let serialized = match self {
            StreamFrame::Event(event) => serde_json::to_string(event.as_ref()),
            StreamFrame::Control(frame) => serde_json::to_string(frame),
        };
        serialized.unwrap_or_else(|err| {
            error!(target: "streamer", %err, "frame serialization failed");
            "{}".to_string()
        })
    }
}
