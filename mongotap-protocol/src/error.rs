//! Protocol error types and wire-level error codes.

use std::fmt;
use thiserror::Error;

/// Errors raised while decoding requests or encoding replies.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("message length {0} is smaller than the 16-byte header")]
    MessageTooShort(i32),

    #[error("message length {size} exceeds the {max}-byte limit")]
    FrameTooLarge { size: i32, max: i32 },

    #[error("truncated header: got {0} of 16 bytes")]
    TruncatedHeader(usize),

    #[error("truncated message: needed {needed} more bytes for {what}")]
    Truncated { what: &'static str, needed: usize },

    #[error("cstring exceeds {0} bytes without a null terminator")]
    UnterminatedCString(usize),

    #[error("cstring is not valid UTF-8")]
    InvalidUtf8,

    #[error("malformed namespace {0:?}")]
    MalformedNamespace(String),

    #[error("invalid BSON document length {0}")]
    InvalidDocumentLength(i32),

    #[error("malformed {command} command: {reason}")]
    MalformedCommand {
        command: &'static str,
        reason: String,
    },

    #[error("malformed OP_MSG: {0}")]
    MalformedMessage(String),

    #[error("OP_MSG replies carry exactly one document; got {0}")]
    TooManyReplyDocuments(usize),

    #[error("BSON decode error: {0}")]
    Bson(#[from] bson::de::Error),

    #[error("BSON encode error: {0}")]
    BsonEncode(#[from] bson::ser::Error),
}

/// A mongo server error code with a named projection.
///
/// Only the codes produced by the built-in command library are named; every
/// other value projects to `"Unknown"`. The full list lives in the upstream
/// server's `error_codes.yml`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorCode(pub i32);

impl ErrorCode {
    pub const UNAUTHORIZED: ErrorCode = ErrorCode(13);
    pub const NO_REPLICATION_ENABLED: ErrorCode = ErrorCode(76);

    /// Returns the numeric code carried into `code` fields of error replies.
    pub fn code(&self) -> i32 {
        self.0
    }

    /// Returns the symbolic name carried into `codeName` fields.
    pub fn name(&self) -> &'static str {
        match self.0 {
            13 => "Unauthorized",
            76 => "NoReplicationEnabled",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An error with a mongo status code, as produced by command handlers and
/// backends. OP_MSG error replies carry its code and code name alongside the
/// message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{} (code {}): {}", .code.name(), .code.code(), .message)]
pub struct CommandError {
    pub code: ErrorCode,
    pub message: String,
}

impl CommandError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_projection() {
        assert_eq!(ErrorCode::UNAUTHORIZED.code(), 13);
        assert_eq!(ErrorCode::UNAUTHORIZED.name(), "Unauthorized");
        assert_eq!(
            ErrorCode::NO_REPLICATION_ENABLED.name(),
            "NoReplicationEnabled"
        );
        assert_eq!(ErrorCode(9999).name(), "Unknown");
    }

    #[test]
    fn test_command_error_display() {
        let err = CommandError::new(ErrorCode::UNAUTHORIZED, "not allowed");
        assert_eq!(err.to_string(), "Unauthorized (code 13): not allowed");
    }

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::MessageTooShort(4);
        assert!(err.to_string().contains('4'));

        let err = ProtocolError::FrameTooLarge {
            size: 50_000_000,
            max: 48_000_000,
        };
        assert!(err.to_string().contains("50000000"));

        let err = ProtocolError::Truncated {
            what: "cursor id",
            needed: 8,
        };
        assert!(err.to_string().contains("cursor id"));

        let err = ProtocolError::MalformedNamespace("nodot".to_string());
        assert!(err.to_string().contains("nodot"));
    }
}
