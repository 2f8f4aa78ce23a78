//! Per-session event streaming: sequencing, snapshot-anchored buffering and
//! client fan-out.
//!
//! Each session owns exactly one streamer task. Raw recorder payloads enter
//! through a bounded ingest channel, get stamped with a strictly monotone
//! `sequence_id`, and fan out to every registered client over per-client
//! bounded queues. A client that cannot keep up is resynced from the newest
//! buffered full snapshot instead of ever back-pressuring ingest.

pub mod buffer;
pub mod frames;
pub mod metrics;
pub mod streamer;

pub use buffer::EventBuffer;
pub use frames::{ServerFrame, StreamFrame};
pub use streamer::{StreamerConfig, StreamerHandle, StreamerStatus};
