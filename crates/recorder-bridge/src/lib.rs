//! In-page recorder bootstrap.
//!
//! The recorder library itself is a vendored black box; this crate only
//! builds the bootstrap script that starts it, binds the page-side emit
//! function to the host bridge, and re-injects the whole thing after every
//! navigation. Event bodies are never interpreted here.

pub mod bridge;
pub mod options;

pub use bridge::RecorderBridge;
pub use options::{injection_script, RecorderOptions, BRIDGE_FUNCTION, RECORDER_BUNDLE_PATH};
