use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Prefix carried by every canonical session id.
pub const SESSION_ID_PREFIX: &str = "visual-";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("not a valid session id: {input}")]
pub struct SessionIdError {
    pub input: String,
}

/// Canonical identifier for a running visual-streaming session.
///
/// The canonical form is `visual-<uuid-v4>`. Lookups accept a bare UUID and
/// normalize it by prefixing `visual-`; anything else is rejected.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(format!("{SESSION_ID_PREFIX}{}", Uuid::new_v4()))
    }

    /// Parse and normalize a caller-supplied id.
    pub fn parse(input: &str) -> Result<Self, SessionIdError> {
        let trimmed = input.trim();
        if let Some(rest) = trimmed.strip_prefix(SESSION_ID_PREFIX) {
            if Uuid::parse_str(rest).is_ok() {
                return Ok(Self(trimmed.to_string()));
            }
        } else if Uuid::parse_str(trimmed).is_ok() {
            return Ok(Self(format!("{SESSION_ID_PREFIX}{trimmed}")));
        }
        Err(SessionIdError {
            input: input.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_canonical_form() {
        let id = SessionId::new();
        let parsed = SessionId::parse(id.as_str()).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn normalizes_bare_uuid() {
        let uuid = Uuid::new_v4();
        let parsed = SessionId::parse(&uuid.to_string()).unwrap();
        assert_eq!(parsed.as_str(), format!("visual-{uuid}"));
    }

    #[test]
    fn rejects_garbage() {
        assert!(SessionId::parse("abcd-not-a-uuid").is_err());
        assert!(SessionId::parse("visual-abcd").is_err());
        assert!(SessionId::parse("").is_err());
    }
}
