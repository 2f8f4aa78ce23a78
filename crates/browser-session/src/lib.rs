//! Abstract handle over a controlled browser.
//!
//! The concrete engine (headless Chromium behind a DevTools transport) lives
//! outside the core; everything here is written against the
//! [`BrowserSession`] trait. [`SerialSession`] enforces the single-queue
//! discipline shared by the workflow runner and the control channel, and
//! [`StubBrowser`] is the scripted double the rest of the workspace tests
//! against.

pub mod errors;
pub mod serial;
pub mod session;
pub mod stub;

pub use errors::{BrowserError, BrowserErrorKind};
pub use serial::SerialSession;
pub use session::{
    variant_from_env, BridgeHandler, BrowserSession, BrowserVariant, MouseButton, NavigationEvent,
};
pub use stub::StubBrowser;
