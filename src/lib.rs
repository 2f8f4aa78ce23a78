//! Visual streaming backend for automated browser workflows.
//!
//! The library wires the workspace crates into a running service: an HTTP/WS
//! surface (stream, control, status and storage-state endpoints), the session
//! manager driving each browser session through its lifecycle, and the
//! workflow runner executing scripted actions against the shared browser
//! handle.

pub mod cli;
pub mod config;
pub mod metrics;
pub mod server;
pub mod session;
