use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::errors::{DomainError, DomainResult};

const MAX_STREAM_ID_LEN: usize = 128;

/// Monotonic counter distinguishing successive sessions that reuse one stream id.
pub type Epoch = u64;

/// Caller-supplied stream identifier. Safe to embed in a URL path segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(String);

impl StreamId {
    pub fn parse(raw: &str) -> DomainResult<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(DomainError::InvalidInput("streamId is required".into()));
        }
        if raw.len() > MAX_STREAM_ID_LEN {
            return Err(DomainError::InvalidInput(format!(
                "streamId longer than {MAX_STREAM_ID_LEN} characters"
            )));
        }
        if let Some(bad) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        {
            return Err(DomainError::InvalidInput(format!(
                "streamId contains unsupported character {bad:?}"
            )));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Registered; the ingestion loop is still opening its source.
    Starting,
    Running,
    /// Stop requested; the loop has not observed it yet.
    Stopping,
}

impl SessionState {
    pub fn is_active(self) -> bool {
        !matches!(self, SessionState::Stopping)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSession {
    pub id: StreamId,
    pub source_uri: String,
    pub state: SessionState,
    pub epoch: Epoch,
    pub created_at: DateTime<Utc>,
}

impl StreamSession {
    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_typical_ids() {
        for raw in ["camA", "cctv-12_preview", "gate.north", "  padded  "] {
            assert!(StreamId::parse(raw).is_ok(), "{raw} should parse");
        }
        assert_eq!(StreamId::parse("  padded ").unwrap().as_str(), "padded");
    }

    #[test]
    fn rejects_empty_and_path_like_ids() {
        assert!(matches!(StreamId::parse(""), Err(DomainError::InvalidInput(_))));
        assert!(matches!(StreamId::parse("   "), Err(DomainError::InvalidInput(_))));
        assert!(StreamId::parse("a/b").is_err());
        assert!(StreamId::parse("with space").is_err());
        assert!(StreamId::parse(&"x".repeat(MAX_STREAM_ID_LEN + 1)).is_err());
    }

    #[test]
    fn stopping_is_not_active() {
        assert!(SessionState::Starting.is_active());
        assert!(SessionState::Running.is_active());
        assert!(!SessionState::Stopping.is_active());
    }
}
