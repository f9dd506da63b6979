//! Error types for the sync engine.

use crate::store::StoreError;
use thiserror::Error;
use trivit_sync_protocol::{MessageKind, ProtocolError, Role};

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// The peer is not reachable; the message was not sent.
    #[error("peer is not reachable")]
    NotReachable,

    /// The session has not finished activating.
    #[error("session is not activated")]
    SessionNotActivated,

    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// A payload could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The record store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The record store has not been attached yet.
    #[error("record store is not attached")]
    StoreUnavailable,

    /// A message kind this role does not send or accept.
    #[error("{kind} is not valid for the {role}")]
    UnexpectedMessage {
        /// Message kind.
        kind: MessageKind,
        /// Role that rejected it.
        role: Role,
    },

    /// The runtime task has stopped.
    #[error("sync runtime has stopped")]
    RuntimeStopped,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if the next reachability transition or sync request
    /// may succeed where this failed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::NotReachable
            | SyncError::SessionNotActivated
            | SyncError::StoreUnavailable
            | SyncError::Store(StoreError::Persistence(_)) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::NotReachable.is_retryable());
        assert!(SyncError::SessionNotActivated.is_retryable());
        assert!(SyncError::transport_retryable("connection lost").is_retryable());
        assert!(!SyncError::transport_fatal("peer closed").is_retryable());
        assert!(!SyncError::Protocol(ProtocolError::MissingType).is_retryable());
        assert!(!SyncError::RuntimeStopped.is_retryable());
        assert!(SyncError::Store(StoreError::Persistence("disk full".into())).is_retryable());
        assert!(!SyncError::Store(StoreError::NotFound(trivit_sync_protocol::CounterId::new()))
            .is_retryable());
    }

    #[test]
    fn error_display() {
        assert_eq!(SyncError::NotReachable.to_string(), "peer is not reachable");

        let err = SyncError::UnexpectedMessage {
            kind: MessageKind::TrivitsSync,
            role: Role::Primary,
        };
        assert_eq!(err.to_string(), "trivitsSync is not valid for the primary");
    }
}
