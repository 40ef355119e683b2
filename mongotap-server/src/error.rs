//! Server error types.

use mongotap_protocol::{CommandError, ProtocolError};
use thiserror::Error;

/// Errors raised while serving a connection. Any of these terminates the
/// connection they occurred on.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    #[error("TLS handshake failed: {0}")]
    TlsHandshake(String),

    #[error("timed out connecting to upstream {0}")]
    UpstreamConnectTimeout(String),

    #[error("upstream closed the connection")]
    UpstreamClosed,

    #[error("server shutting down")]
    ShuttingDown,
}

/// Errors produced while processing a single decoded request. These are
/// recoverable: they surface to the client either in an error reply or via
/// the per-client lastError buffer, and the connection stays up.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BackendError {
    /// The backend (or the absence of one) cannot process this request.
    #[error("unsupported request")]
    Unsupported,

    /// No built-in handler matched a command the backend rejected.
    #[error("command {0:?}: unsupported request")]
    UnsupportedCommand(String),

    /// The request names a cursor id the server does not know.
    #[error("invalid cursor")]
    InvalidCursor,

    /// An error with a mongo status code; OP_MSG replies carry the code and
    /// its name.
    #[error(transparent)]
    Command(#[from] CommandError),
}

impl BackendError {
    /// Whether this is an unsupported-request result, which lets the
    /// dispatcher fall through to the built-in command library.
    pub fn is_unsupported(&self) -> bool {
        matches!(
            self,
            BackendError::Unsupported | BackendError::UnsupportedCommand(_)
        )
    }
}
