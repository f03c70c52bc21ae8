//! API error types and the response envelope.
//!
//! The UI runs behind splunkweb, which mangles non-200 responses from a
//! custom endpoint; every answer therefore travels as HTTP 200 carrying a
//! JSON `{payload, status}` envelope, with the real outcome in `status`.

use axum::{
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

use sase_connectors::ConnectorError;
use sase_core::CoreError;

/// API error type. The variants mirror the envelope status taxonomy.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Caller lacks permission, or sent something only a probe would send.
    #[error("{0}")]
    PermissionDenied(String),

    /// Lookup, backup or config entry does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Invalid input.
    #[error("{0}")]
    BadRequest(String),

    /// Lookup file over the editable ceiling.
    #[error("{message}")]
    Oversized { message: String, file_size: u64 },

    /// Lookup type the editor cannot open.
    #[error("{0}")]
    UnsupportedType(String),

    /// Free disk too low to take a backup.
    #[error("{0}")]
    LowDiskSpace(String),

    /// Anything else.
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    /// Envelope status code for this error.
    pub fn status(&self) -> u16 {
        match self {
            ApiError::PermissionDenied(_) => 403,
            ApiError::NotFound(_) => 404,
            ApiError::BadRequest(_) => 400,
            ApiError::Oversized { .. } => 420,
            ApiError::UnsupportedType(_) => 421,
            ApiError::LowDiskSpace(_) => 507,
            ApiError::Internal(_) => 500,
        }
    }

    fn payload(&self) -> Value {
        match self {
            ApiError::Oversized { message, file_size } => json!({
                "message": message,
                "file_size": file_size,
            }),
            other => Value::String(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        Json(json!({
            "payload": self.payload(),
            "status": self.status(),
        }))
        .into_response()
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::PermissionDenied(msg) => ApiError::PermissionDenied(msg),
            CoreError::NotFound(msg) => ApiError::NotFound(msg),
            CoreError::MalformedInput(msg) => ApiError::BadRequest(msg),
            CoreError::InvalidName(msg) => ApiError::BadRequest(msg),
            CoreError::FileTooBig { size } => ApiError::Oversized {
                message: "Lookup file is too large to load \
                          (file-size must be less than 10 MB to be edited)"
                    .to_string(),
                file_size: size,
            },
            CoreError::UnsupportedType(msg) => ApiError::UnsupportedType(msg),
            CoreError::LowDiskSpace => ApiError::LowDiskSpace(err.to_string()),
            CoreError::Io(e) if e.kind() == std::io::ErrorKind::NotFound => {
                ApiError::NotFound("Unable to find the lookup".to_string())
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<ConnectorError> for ApiError {
    fn from(err: ConnectorError) -> Self {
        match err {
            ConnectorError::AuthenticationFailed(msg) => ApiError::PermissionDenied(msg),
            ConnectorError::PermissionDenied(msg) => ApiError::PermissionDenied(msg),
            ConnectorError::PasswordStore(msg) => ApiError::PermissionDenied(msg),
            ConnectorError::NotFound(msg) => ApiError::NotFound(msg),
            ConnectorError::Core(core) => core.into(),
            other => ApiError::BadRequest(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::BadRequest(format!("JSON error: {err}"))
    }
}

/// Wraps a successful payload in the response envelope.
pub fn envelope<T: Serialize>(payload: T) -> Json<Value> {
    Json(json!({
        "payload": payload,
        "status": 200,
    }))
}
