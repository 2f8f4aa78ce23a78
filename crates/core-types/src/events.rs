use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::ids::SessionId;

/// Recorder event type carrying a complete serialized DOM.
pub const FULL_SNAPSHOT_TYPE: i64 = 2;

#[derive(Debug, Error)]
pub enum RecorderEventError {
    #[error("recorder payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("recorder payload is not a JSON object")]
    NotAnObject,
}

/// Opaque JSON object produced by the in-page recorder.
///
/// Only `type` and `timestamp` are interpreted by the host; every other field
/// is preserved verbatim. Shape variations beyond those two fields belong to
/// the recorder library and must not change host behavior.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct RecorderEvent(Value);

impl RecorderEvent {
    /// Parse a raw bridge payload into an event.
    pub fn parse(payload: &str) -> Result<Self, RecorderEventError> {
        let value: Value = serde_json::from_str(payload)?;
        if !value.is_object() {
            return Err(RecorderEventError::NotAnObject);
        }
        Ok(Self(value))
    }

    pub fn from_value(value: Value) -> Result<Self, RecorderEventError> {
        if !value.is_object() {
            return Err(RecorderEventError::NotAnObject);
        }
        Ok(Self(value))
    }

    pub fn event_type(&self) -> Option<i64> {
        self.0.get("type").and_then(Value::as_i64)
    }

    pub fn timestamp_ms(&self) -> Option<i64> {
        self.0.get("timestamp").and_then(Value::as_i64)
    }

    pub fn is_full_snapshot(&self) -> bool {
        self.event_type() == Some(FULL_SNAPSHOT_TYPE)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

/// Optional host-assigned fields attached to a wire event.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct EventMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_snapshot: Option<bool>,
}

impl EventMetadata {
    pub fn is_empty(&self) -> bool {
        self.origin_url.is_none() && self.is_snapshot.is_none()
    }
}

/// Host envelope placed on the stream channel.
///
/// `sequence_id` values for a session form the exact sequence `0,1,2,...`
/// with no gaps. The payload key is `event`; viewers key on it and on
/// `sequence_id`, so both names are part of the wire contract.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WireEvent {
    pub session_id: SessionId,
    /// Host-assigned seconds since epoch at enqueue time.
    pub timestamp: f64,
    pub event: RecorderEvent,
    pub sequence_id: u64,
    #[serde(default, skip_serializing_if = "EventMetadata::is_empty")]
    pub metadata: EventMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_snapshot_and_incremental_types() {
        let snapshot = RecorderEvent::parse(r#"{"type":2,"timestamp":1000,"data":{}}"#).unwrap();
        assert!(snapshot.is_full_snapshot());
        assert_eq!(snapshot.timestamp_ms(), Some(1000));

        let incremental = RecorderEvent::parse(r#"{"type":3,"data":{"source":1}}"#).unwrap();
        assert!(!incremental.is_full_snapshot());
    }

    #[test]
    fn rejects_non_object_payloads() {
        assert!(RecorderEvent::parse("[1,2,3]").is_err());
        assert!(RecorderEvent::parse("not json").is_err());
    }

    #[test]
    fn preserves_unknown_fields_verbatim() {
        let raw = json!({"type": 3, "timestamp": 5, "custom": {"nested": [1, 2]}});
        let event = RecorderEvent::from_value(raw.clone()).unwrap();
        let wire = WireEvent {
            session_id: SessionId::new(),
            timestamp: 12.5,
            event,
            sequence_id: 0,
            metadata: EventMetadata::default(),
        };
        let value = serde_json::to_value(&wire).unwrap();
        assert_eq!(value["event"], raw);
        assert!(value.get("event_data").is_none());
        assert!(value.get("metadata").is_none());
    }

    #[test]
    fn serializes_metadata_when_present() {
        let wire = WireEvent {
            session_id: SessionId::new(),
            timestamp: 1.0,
            event: RecorderEvent::from_value(json!({"type": 2})).unwrap(),
            sequence_id: 7,
            metadata: EventMetadata {
                origin_url: Some("https://example.com".into()),
                is_snapshot: Some(true),
            },
        };
        let value = serde_json::to_value(&wire).unwrap();
        assert_eq!(value["metadata"]["is_snapshot"], json!(true));
        assert_eq!(value["sequence_id"], json!(7));
    }
}
