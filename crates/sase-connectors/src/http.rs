//! Shared HTTP plumbing for the splunkd and SOAR clients.
//!
//! Builds `reqwest` clients with the TLS and proxy settings a server
//! entry calls for and maps transport failures onto [`ConnectorError`].
//! Requests are sent once; the KV-store retry queue handles redelivery,
//! so there is no in-client retry loop.

use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use tracing::warn;

use crate::error::{ConnectorError, ConnectorResult};

/// Builds a client for one upstream.
///
/// `verify_certs = false` is honored (SOAR ships with a self-signed
/// certificate out of the box) but logged loudly every time a client is
/// built that way.
pub fn build_client(
    verify_certs: bool,
    proxy: Option<&str>,
    timeout: Duration,
) -> ConnectorResult<Client> {
    if !verify_certs {
        warn!("TLS certificate verification disabled; connection can be intercepted");
    }

    let mut builder = Client::builder()
        .timeout(timeout)
        .danger_accept_invalid_certs(!verify_certs)
        .pool_max_idle_per_host(10)
        .pool_idle_timeout(Duration::from_secs(90));

    if let Some(url) = proxy {
        let proxy = reqwest::Proxy::all(url)
            .map_err(|e| ConnectorError::ConnectionFailed(format!("bad proxy url: {e}")))?;
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| ConnectorError::ConnectionFailed(e.to_string()))
}

/// Joins a base URL and a path without doubling slashes.
pub fn build_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Maps a `reqwest` send failure onto the connector error taxonomy.
pub fn classify_send_error(e: reqwest::Error) -> ConnectorError {
    if e.is_timeout() {
        ConnectorError::Timeout(e.to_string())
    } else if e.is_connect() {
        ConnectorError::ConnectionFailed(e.to_string())
    } else {
        ConnectorError::RequestFailed(e.to_string())
    }
}

/// Turns a non-2xx response into an error, reading the body into the
/// message so SOAR's own diagnostics survive.
pub async fn check_status(response: Response) -> ConnectorResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::UNAUTHORIZED => ConnectorError::AuthenticationFailed(body),
        StatusCode::FORBIDDEN => ConnectorError::PermissionDenied(body),
        StatusCode::NOT_FOUND => ConnectorError::NotFound(body),
        _ => ConnectorError::Api {
            status: status.as_u16(),
            message: body,
        },
    })
}
