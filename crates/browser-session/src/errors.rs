use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// High-level error categories surfaced by a browser handle.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error, Serialize, Deserialize)]
pub enum BrowserErrorKind {
    #[error("browser not ready")]
    NotReady,
    #[error("navigation timed out")]
    NavTimeout,
    #[error("browser i/o failure")]
    Io,
    #[error("command execution failed")]
    ExecutionFailed,
    #[error("internal error")]
    Internal,
}

/// Enriched error passed back to higher layers.
#[derive(Clone, Debug)]
pub struct BrowserError {
    pub kind: BrowserErrorKind,
    pub hint: Option<String>,
}

impl fmt::Display for BrowserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(hint) = &self.hint {
            write!(f, ": {hint}")?;
        }
        Ok(())
    }
}

impl std::error::Error for BrowserError {}

impl BrowserError {
    pub fn new(kind: BrowserErrorKind) -> Self {
        Self { kind, hint: None }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}
