//! The frozen error code taxonomy (spec.md §7) and the protocol-level
//! error type used by the codec and validator.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable error code strings carried in `error` envelopes and matched on
/// by callers of `send_and_wait`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ConnectionFailed,
    ConnectionLost,
    ReconnectionFailed,
    ValidationError,
    InvalidClientType,
    PermissionDenied,
    RoutingNoRecipient,
    IdleTimeout,
    Replaced,
    Timeout,
    InternalError,
}

impl ErrorCode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::ConnectionFailed => "CONNECTION_FAILED",
            ErrorCode::ConnectionLost => "CONNECTION_LOST",
            ErrorCode::ReconnectionFailed => "RECONNECTION_FAILED",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::InvalidClientType => "INVALID_CLIENT_TYPE",
            ErrorCode::PermissionDenied => "PERMISSION_DENIED",
            ErrorCode::RoutingNoRecipient => "ROUTING_NO_RECIPIENT",
            ErrorCode::IdleTimeout => "IDLE_TIMEOUT",
            ErrorCode::Replaced => "REPLACED",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by the codec and validator (spec.md §4.1, §4.3).
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame of {size} bytes exceeds the {limit}-byte bound")]
    FrameTooLarge { size: usize, limit: usize },

    #[error("invalid identity: {0}")]
    InvalidIdentity(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("malformed JSON: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("recipient {0:?} not found")]
    NoRecipient(String),

    #[error("permission denied for sender {0:?}")]
    PermissionDenied(String),
}

impl ProtocolError {
    /// The stable error code this failure maps to for wire-level reporting.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            ProtocolError::FrameTooLarge { .. }
            | ProtocolError::InvalidIdentity(_)
            | ProtocolError::Validation(_)
            | ProtocolError::Decode(_) => ErrorCode::ValidationError,
            ProtocolError::NoRecipient(_) => ErrorCode::RoutingNoRecipient,
            ProtocolError::PermissionDenied(_) => ErrorCode::PermissionDenied,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_strings_are_frozen() {
        assert_eq!(ErrorCode::ValidationError.as_str(), "VALIDATION_ERROR");
        assert_eq!(ErrorCode::RoutingNoRecipient.as_str(), "ROUTING_NO_RECIPIENT");
        assert_eq!(ErrorCode::IdleTimeout.as_str(), "IDLE_TIMEOUT");
        assert_eq!(ErrorCode::Replaced.as_str(), "REPLACED");
    }

    #[test]
    fn error_code_serializes_to_frozen_string() {
        let json = serde_json::to_string(&ErrorCode::PermissionDenied).unwrap();
        assert_eq!(json, "\"PERMISSION_DENIED\"");
    }

    #[test]
    fn protocol_error_maps_to_expected_code() {
        assert_eq!(
            ProtocolError::NoRecipient("x".into()).code(),
            ErrorCode::RoutingNoRecipient
        );
        assert_eq!(
            ProtocolError::Validation("bad".into()).code(),
            ErrorCode::ValidationError
        );
    }
}
