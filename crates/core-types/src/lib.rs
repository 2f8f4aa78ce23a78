//! Shared identifiers and wire-level data model for the vstream core.
//!
//! Everything that crosses a crate boundary more than once lives here: the
//! canonical session id, the recorder event wrapper, the wire envelope placed
//! on stream channels, the storage-state plaintext model, and the error kinds
//! observable on user-facing channels.

pub mod events;
pub mod ids;
pub mod state;
pub mod util;
pub mod wire_errors;

pub use events::{EventMetadata, RecorderEvent, WireEvent, FULL_SNAPSHOT_TYPE};
pub use ids::{SessionId, SessionIdError};
pub use state::{Cookie, EnvMetadata, OriginState, StorageItem, StorageStateBlob, Viewport};
pub use wire_errors::WireErrorKind;
