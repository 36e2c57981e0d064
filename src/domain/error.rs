//! Domain error types for the hive-mind coordinator.
//!
//! Every error carries a stable kind label (`store.op`, `task.transient`, …)
//! so callers and logs can classify failures without string matching.

use thiserror::Error;
use uuid::Uuid;

/// Errors from the persistence store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Backing engine missing at open; triggers the in-memory fallback
    #[error("store backend unavailable: {0}")]
    Unavailable(String),

    /// Schema probe or evolution failure; fatal for the component
    #[error("schema error: {0}")]
    Schema(String),

    /// Transient row-level failure, propagated to the caller
    #[error("store operation failed: {0}")]
    Op(String),

    /// Row not found where one was required
    #[error("row not found: {0}")]
    RowNotFound(String),

    /// Serialization of a column value failed
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Stable kind label for logs and typed surfacing.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "store.unavailable",
            Self::Schema(_) => "store.schema",
            Self::Op(_) | Self::RowNotFound(_) | Self::Serialization(_) => "store.op",
        }
    }

    /// Whether a bounded retry may succeed.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Op(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => Self::RowNotFound("query returned no rows".to_string()),
            other => Self::Op(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Errors from worker execution.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// Worker exceeded the configured task timeout
    #[error("task timed out")]
    Timeout,

    /// Recoverable failure; the swarm retry policy applies
    #[error("transient task failure: {0}")]
    Transient(String),

    /// Permanent failure; the task is marked failed
    #[error("task failed: {0}")]
    Fatal(String),

    /// Task with the given id was not found
    #[error("task not found: {0}")]
    NotFound(Uuid),
}

impl TaskError {
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Timeout => "task.timeout",
            Self::Transient(_) => "task.transient",
            Self::Fatal(_) | Self::NotFound(_) => "task.fatal",
        }
    }

    /// Whether the swarm retry policy treats this error as recoverable.
    /// Matches the fixed recoverable-cause list on the error message.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Timeout => true,
            Self::Transient(msg) => is_recoverable_message(msg),
            Self::Fatal(_) | Self::NotFound(_) => false,
        }
    }
}

/// Recoverable-cause check applied to raw worker error messages.
pub fn is_recoverable_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    ["timeout", "network", "temporary", "connection"]
        .iter()
        .any(|needle| lower.contains(needle))
}

/// Errors from the consensus engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConsensusError {
    /// A validator did not vote within the per-validator timeout
    #[error("validator {0} timed out")]
    Timeout(String),

    /// Byzantine path could not reach the two-thirds quorum
    #[error("quorum failed: winner share {share:.2} below {required:.2}")]
    QuorumFailed { share: f64, required: f64 },
}

impl ConsensusError {
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "consensus.timeout",
            Self::QuorumFailed { .. } => "consensus.quorum_failed",
        }
    }
}

/// Errors from the message bus.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    /// No ack arrived before the send timeout
    #[error("message {0} undeliverable: no ack before timeout")]
    Undeliverable(Uuid),

    /// Recipient rejected the envelope
    #[error("message {0} rejected by recipient")]
    Rejected(Uuid),

    /// Payload could not be decrypted; the envelope is dropped
    #[error("message {0} payload decryption failed")]
    DecryptFailed(Uuid),

    /// Recipient is not registered on the bus
    #[error("unknown recipient: {0}")]
    UnknownRecipient(String),
}

impl MessageError {
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Undeliverable(_) | Self::Rejected(_) => "message.undeliverable",
            Self::DecryptFailed(_) => "message.decrypt_failed",
            Self::UnknownRecipient(_) => "message.unknown_recipient",
        }
    }
}

/// Errors from session lifecycle operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Resume/stop/pause of an unknown session id
    #[error("session not found: {0}")]
    NotFound(Uuid),

    /// Operation invalid for the session's current status
    #[error("invalid session transition: {0}")]
    InvalidTransition(String),

    /// Archival requested while running on the in-memory store
    #[error("archival is unsupported in in-memory mode")]
    ArchiveUnsupported,
}

impl SessionError {
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "session.not_found",
            Self::InvalidTransition(_) => "session.invalid_transition",
            Self::ArchiveUnsupported => "session.archive_unsupported",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_kinds() {
        assert_eq!(StoreError::Unavailable("x".into()).kind(), "store.unavailable");
        assert_eq!(StoreError::Schema("x".into()).kind(), "store.schema");
        assert_eq!(StoreError::Op("x".into()).kind(), "store.op");
    }

    #[test]
    fn test_store_error_transience() {
        assert!(StoreError::Op("busy".into()).is_transient());
        assert!(!StoreError::Schema("bad".into()).is_transient());
        assert!(!StoreError::Unavailable("gone".into()).is_transient());
    }

    #[test]
    fn test_recoverable_messages() {
        assert!(is_recoverable_message("network connection reset"));
        assert!(is_recoverable_message("operation TIMEOUT"));
        assert!(is_recoverable_message("temporary glitch"));
        assert!(!is_recoverable_message("segfault in worker"));
    }

    #[test]
    fn test_task_error_recoverability() {
        assert!(TaskError::Timeout.is_recoverable());
        assert!(TaskError::Transient("network down".into()).is_recoverable());
        assert!(!TaskError::Transient("logic bug".into()).is_recoverable());
        assert!(!TaskError::Fatal("network down".into()).is_recoverable());
    }

    #[test]
    fn test_consensus_error_kinds() {
        assert_eq!(ConsensusError::Timeout("v1".into()).kind(), "consensus.timeout");
        assert_eq!(
            ConsensusError::QuorumFailed { share: 0.25, required: 0.67 }.kind(),
            "consensus.quorum_failed"
        );
    }

    #[test]
    fn test_session_error_kind() {
        assert_eq!(SessionError::NotFound(Uuid::new_v4()).kind(), "session.not_found");
    }
}
