//! Error types shared by the splunkd and SOAR clients.

use sase_core::CoreError;
use thiserror::Error;

/// Errors produced by the network clients.
#[derive(Error, Debug)]
pub enum ConnectorError {
    /// The session key or auth token was rejected.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The authenticated identity lacks the required capability.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The remote resource does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The TCP/TLS connection could not be established.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The request timed out.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The request was sent but the server refused it.
    #[error("Request failed: {0}")]
    RequestFailed(String),

    /// The response body did not parse as expected.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The splunkd password store refused a read or write.
    #[error("Password store error: {0}")]
    PasswordStore(String),

    /// A SOAR API answer carrying its own error message. The message is
    /// kept verbatim so callers can match on it.
    #[error("SOAR API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// A failure bubbling up from the domain layer.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// JSON encode/decode failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for connector operations.
pub type ConnectorResult<T> = Result<T, ConnectorError>;
