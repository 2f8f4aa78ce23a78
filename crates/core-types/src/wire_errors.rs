use serde::{Deserialize, Serialize};

/// Error kinds observable on user-facing channels.
///
/// These are wire identifiers, not error types: every internal failure is
/// folded into one of these before it reaches a client.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireErrorKind {
    InvalidMessage,
    SessionNotFound,
    BrowserNotReady,
    ExecutionFailed,
    RateLimitExceeded,
    SessionExpired,
}

impl WireErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WireErrorKind::InvalidMessage => "invalid_message",
            WireErrorKind::SessionNotFound => "session_not_found",
            WireErrorKind::BrowserNotReady => "browser_not_ready",
            WireErrorKind::ExecutionFailed => "execution_failed",
            WireErrorKind::RateLimitExceeded => "rate_limit_exceeded",
            WireErrorKind::SessionExpired => "session_expired",
        }
    }
}
