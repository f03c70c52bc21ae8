//! Application state shared across handlers.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{async_trait, extract::FromRequestParts, http::header, http::request::Parts};

use sase_connectors::{SecureString, SplunkdClient};

use crate::error::ApiError;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Root of the Splunk install, for resolving lookup files on disk.
    pub splunk_home: Arc<PathBuf>,
    /// Base URL of the local splunkd management port.
    pub splunkd_url: Arc<String>,
}

impl AppState {
    /// Creates a new application state.
    pub fn new(splunk_home: PathBuf, splunkd_url: String) -> Self {
        Self {
            splunk_home: Arc::new(splunk_home),
            splunkd_url: Arc::new(splunkd_url),
        }
    }

    /// splunkd client bound to the caller's session key.
    pub fn splunkd(&self, key: &SessionKey) -> Result<SplunkdClient, ApiError> {
        SplunkdClient::new(&self.splunkd_url, key.0.clone()).map_err(ApiError::from)
    }
}

/// The caller's splunkd session key, taken from the `Authorization` header.
///
/// splunkweb forwards it as `Splunk <key>`; a bare key is accepted too.
#[derive(Debug)]
pub struct SessionKey(pub SecureString);

#[async_trait]
impl<S> FromRequestParts<S> for SessionKey
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::PermissionDenied("Unauthorized".to_string()))?;

        let key = header.strip_prefix("Splunk ").unwrap_or(header).trim();
        if key.is_empty() {
            return Err(ApiError::PermissionDenied("Unauthorized".to_string()));
        }
        Ok(SessionKey(SecureString::from(key)))
    }
}
