//! Encrypted persistence of browser session state.
//!
//! A snapshot (cookies plus per-origin local storage) is sealed through the
//! crypto envelope and written as a [`StorageStateRecord`]. Records are
//! auto-verified against a static site allowlist so that a later run can ask
//! for "the freshest record that is still logged into google" without ever
//! decrypting candidates it will not use.
//!
//! Known limitation: the browser API used for extraction does not expose
//! CHIPS partition keys, so partitioned cookies are neither captured nor
//! restored. Sites that depend on them will not resume correctly.

pub mod errors;
pub mod loader;
pub mod model;
pub mod repo;
pub mod store;
pub mod verify;

pub use errors::StoreError;
pub use loader::{PriorityLoader, StateSource};
pub use model::{RecordMetadata, RecordStatus, StorageStateRecord};
pub use repo::{MemoryRepo, StateRepo};
pub use store::StorageStateStore;
pub use verify::{required_cookies, verify_sites, VERIFIED_SITES};
