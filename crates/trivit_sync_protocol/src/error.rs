//! Error types for the protocol crate.

use crate::messages::MessageKind;
use thiserror::Error;
use trivit_codec::CodecError;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while turning a payload into a [`SyncMessage`](crate::SyncMessage).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The payload bytes could not be decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The payload is not a key-value map.
    #[error("payload is not a map")]
    NotAMap,

    /// The payload has no `type` discriminator.
    #[error("message has no type")]
    MissingType,

    /// The `type` discriminator names no known message.
    #[error("unknown message type {0:?}")]
    UnknownType(String),

    /// A required field is absent.
    #[error("{kind} message missing field `{field}`")]
    MissingField {
        /// Declared message type.
        kind: MessageKind,
        /// Name of the missing field.
        field: &'static str,
    },

    /// A field is present but has the wrong type or an out-of-range value.
    #[error("{kind} message has invalid field `{field}`: {reason}")]
    InvalidField {
        /// Declared message type.
        kind: MessageKind,
        /// Name of the offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

impl ProtocolError {
    /// Returns the declared message kind, when the payload got that far.
    pub fn kind(&self) -> Option<MessageKind> {
        match self {
            ProtocolError::MissingField { kind, .. } | ProtocolError::InvalidField { kind, .. } => {
                Some(*kind)
            }
            _ => None,
        }
    }

    /// Whether the message encoded past the transport's size limit.
    pub fn is_payload_too_large(&self) -> bool {
        matches!(self, ProtocolError::Codec(CodecError::PayloadTooLarge { .. }))
    }
}
