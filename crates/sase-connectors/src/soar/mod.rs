//! Client for one SOAR server's `/rest` API.
//!
//! Authentication is a `ph-auth-token` header. Servers frequently run
//! self-signed certificates, so TLS verification follows the app-level
//! `verify_certs` setting; interactive calls carry a 15-second timeout.
//! Error text is scrubbed of the auth token (including its url-encoded
//! form) before it can reach a log line or an API answer.

pub mod workbooks;

use std::collections::BTreeMap;
use std::time::Duration;

use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, instrument};

use sase_core::forward::cef::{CefFieldMeta, DEFAULT_CONTAINS};
use sase_core::forward::{Artifact, Container};
use sase_core::ServerConfig;

use crate::error::{ConnectorError, ConnectorResult};
use crate::http::{build_client, build_url, classify_send_error};
use crate::secure_string::SecureString;

/// Page size SOAR listings are walked with.
const PAGE_SIZE: usize = 16;

/// Timeout for interactive calls.
const TIMEOUT: Duration = Duration::from_secs(15);

/// The SOAR answer that means the posted severity is unknown. Matched
/// verbatim by the forwarding layer to coerce and retry.
pub const UNKNOWN_SEVERITY_MESSAGE: &str = "Severity matching query does not exist.";

/// The SOAR answer for a container label that does not exist. A queued
/// record failing with this is dropped instead of retried forever.
pub const INVALID_LABEL_MESSAGE: &str = "is not a known label.";

/// Client bound to one configured SOAR server.
pub struct SoarClient {
    server: String,
    config_id: String,
    token: SecureString,
    client: Client,
}

/// Outcome of a container resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerOutcome {
    pub id: i64,
    /// False when an existing container was reused.
    pub created: bool,
}

/// Outcome of an artifact POST.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArtifactOutcome {
    pub id: Option<i64>,
    pub created: bool,
}

/// Identity the server reported for a verified token.
#[derive(Debug, Clone)]
pub struct VerifiedUser {
    pub user: String,
}

impl SoarClient {
    /// Builds a client for a configured server, honoring its proxy and
    /// the app-wide certificate-verification setting.
    pub fn new(config: &ServerConfig, verify_certs: bool) -> ConnectorResult<Self> {
        let token = config.auth_token.clone().ok_or_else(|| {
            ConnectorError::AuthenticationFailed(format!(
                "no auth token stored for server '{}'",
                config.server
            ))
        })?;
        let client = build_client(verify_certs, config.proxy.as_deref(), TIMEOUT)?;
        Ok(Self {
            server: config.server.trim_end_matches('/').to_string(),
            config_id: config.ph_auth_config_id.clone(),
            token: SecureString::new(token),
            client,
        })
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn config_id(&self) -> &str {
        &self.config_id
    }

    /// Default display name for this server once verified.
    pub fn default_custom_name(&self, user: &str) -> String {
        format!("{} ({})", user, self.server)
    }

    /// Replaces the auth token (raw and url-encoded) in a message with a
    /// placeholder.
    pub fn scrub_token(&self, message: &str) -> String {
        let token = self.token.expose_secret();
        let encoded = token
            .replace('=', "%3D")
            .replace('+', "%2B")
            .replace('&', "%26");
        message.replace(token, "<token>").replace(&encoded, "<token>")
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> ConnectorResult<Response> {
        let response = self
            .client
            .get(build_url(&self.server, path))
            .header("ph-auth-token", self.token.expose_secret())
            .query(query)
            .send()
            .await
            .map_err(|e| self.scrub_error(classify_send_error(e)))?;
        self.check(response).await
    }

    async fn post(&self, path: &str, body: &Value) -> ConnectorResult<Response> {
        let response = self
            .client
            .post(build_url(&self.server, path))
            .header("ph-auth-token", self.token.expose_secret())
            .json(body)
            .send()
            .await
            .map_err(|e| self.scrub_error(classify_send_error(e)))?;
        self.check(response).await
    }

    /// POST that hands back the status and parsed body instead of
    /// mapping non-2xx to an error; the container/artifact endpoints put
    /// recoverable answers (`existing_container_id`) in failure bodies.
    async fn post_raw(&self, path: &str, body: &Value) -> ConnectorResult<(u16, Value)> {
        let response = self
            .client
            .post(build_url(&self.server, path))
            .header("ph-auth-token", self.token.expose_secret())
            .json(body)
            .send()
            .await
            .map_err(|e| self.scrub_error(classify_send_error(e)))?;
        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();
        let parsed = serde_json::from_str(&text)
            .unwrap_or_else(|_| Value::String(self.scrub_token(&text)));
        Ok((status, parsed))
    }

    async fn delete(&self, path: &str, body: &Value) -> ConnectorResult<Response> {
        let response = self
            .client
            .delete(build_url(&self.server, path))
            .header("ph-auth-token", self.token.expose_secret())
            .json(body)
            .send()
            .await
            .map_err(|e| self.scrub_error(classify_send_error(e)))?;
        self.check(response).await
    }

    /// Maps a non-2xx answer to an [`ConnectorError::Api`] carrying the
    /// server's own `message` where one is present.
    async fn check(&self, response: Response) -> ConnectorResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
            .unwrap_or(body);
        Err(ConnectorError::Api {
            status: status.as_u16(),
            message: self.scrub_token(&message),
        })
    }

    fn scrub_error(&self, error: ConnectorError) -> ConnectorError {
        match error {
            ConnectorError::ConnectionFailed(msg) => {
                ConnectorError::ConnectionFailed(self.scrub_token(&msg))
            }
            ConnectorError::Timeout(msg) => ConnectorError::Timeout(self.scrub_token(&msg)),
            ConnectorError::RequestFailed(msg) => {
                ConnectorError::RequestFailed(self.scrub_token(&msg))
            }
            other => other,
        }
    }

    /// Walks a paged listing, collecting every `data` row.
    async fn get_paged(
        &self,
        path: &str,
        extra: &[(&str, String)],
    ) -> ConnectorResult<Vec<Value>> {
        let mut rows = Vec::new();
        let mut page = 0usize;
        loop {
            let mut query = vec![
                ("page_size", PAGE_SIZE.to_string()),
                ("page", page.to_string()),
            ];
            query.extend(extra.iter().cloned());
            let response = self.get(path, &query).await?;
            let body: PagedAnswer = response
                .json()
                .await
                .map_err(|e| ConnectorError::InvalidResponse(e.to_string()))?;
            rows.extend(body.data);
            page += 1;
            if page >= body.num_pages.unwrap_or(0) {
                break;
            }
        }
        Ok(rows)
    }

    /// Checks the auth token against the server and reports the user it
    /// belongs to.
    ///
    /// Older servers lack the filtered `ph_user` endpoint; those fall
    /// back to `/rest/asset` filtered by the same token key.
    #[instrument(skip(self), fields(server = %self.server))]
    pub async fn verify_server(&self) -> ConnectorResult<VerifiedUser> {
        let filter = format!(
            "'{}'",
            utf8_percent_encode(self.token.expose_secret(), NON_ALPHANUMERIC)
        );
        let query = [
            ("include_automation", "true".to_string()),
            ("_filter_token__key", filter.clone()),
        ];
        match self.query_identity("/rest/ph_user", &query, "username").await {
            Ok(user) => Ok(VerifiedUser { user }),
            Err(first) => {
                debug!(error = %first, "ph_user lookup failed, trying asset fallback");
                let query = [("_filter_token__key", filter)];
                let user = self
                    .query_identity("/rest/asset", &query, "name")
                    .await
                    .map_err(|_| first)?;
                Ok(VerifiedUser { user })
            }
        }
    }

    async fn query_identity(
        &self,
        path: &str,
        query: &[(&str, String)],
        name_field: &str,
    ) -> ConnectorResult<String> {
        let response = self.get(path, query).await?;
        let body: PagedAnswer = response
            .json()
            .await
            .map_err(|e| ConnectorError::InvalidResponse(self.scrub_token(&e.to_string())))?;
        if body.count.unwrap_or(0) < 1 {
            return Err(ConnectorError::AuthenticationFailed(
                "Token not found".to_string(),
            ));
        }
        Ok(body
            .data
            .first()
            .and_then(|row| row.get(name_field))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    /// Resolves the container for an event, creating one when no
    /// container with its source data identifier exists yet.
    ///
    /// A concurrent POST losing the race answers `existing_container_id`,
    /// which resolves to the existing container. An unknown severity
    /// surfaces as [`UNKNOWN_SEVERITY_MESSAGE`] in an `Api` error.
    #[instrument(skip(self, container), fields(server = %self.server))]
    pub async fn get_or_create_container(
        &self,
        container: &Container,
    ) -> ConnectorResult<ContainerOutcome> {
        let query = [
            (
                "_filter_source_data_identifier",
                format!("'{}'", container.source_data_identifier),
            ),
            ("sort", "create_time".to_string()),
            ("order", "desc".to_string()),
            ("page_size", "1".to_string()),
        ];
        let response = self.get("/rest/container", &query).await?;
        let body: PagedAnswer = response
            .json()
            .await
            .map_err(|e| ConnectorError::InvalidResponse(e.to_string()))?;
        if body.count.unwrap_or(0) > 0 {
            let id = body
                .data
                .first()
                .and_then(|row| row.get("id"))
                .and_then(Value::as_i64)
                .ok_or_else(|| {
                    ConnectorError::InvalidResponse("container row had no id".into())
                })?;
            return Ok(ContainerOutcome { id, created: false });
        }

        let (status, answer) = self
            .post_raw("/rest/container", &serde_json::to_value(container)?)
            .await?;
        if status == 200 {
            let id = answer.get("id").and_then(Value::as_i64).ok_or_else(|| {
                ConnectorError::InvalidResponse("container POST answer had no id".into())
            })?;
            return Ok(ContainerOutcome { id, created: true });
        }
        if let Some(id) = answer.get("existing_container_id").and_then(Value::as_i64) {
            return Ok(ContainerOutcome { id, created: false });
        }
        let message = answer
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| self.scrub_token(&answer.to_string()));
        error!(status, message = %message, "container POST refused");
        Err(ConnectorError::Api { status, message })
    }

    /// Posts one artifact. An `existing_artifact_id` answer counts as
    /// success without creation.
    pub async fn post_artifact(&self, artifact: &Artifact) -> ConnectorResult<ArtifactOutcome> {
        let (status, answer) = self
            .post_raw("/rest/artifact", &serde_json::to_value(artifact)?)
            .await?;
        if status == 200 {
            return Ok(ArtifactOutcome {
                id: answer.get("id").and_then(Value::as_i64),
                created: true,
            });
        }
        if let Some(id) = answer.get("existing_artifact_id").and_then(Value::as_i64) {
            return Ok(ArtifactOutcome {
                id: Some(id),
                created: false,
            });
        }
        let message = answer
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| self.scrub_token(&answer.to_string()));
        Err(ConnectorError::Api { status, message })
    }

    /// All playbook names on the server, formatted `"<scm>/<name>"`.
    #[instrument(skip(self), fields(server = %self.server))]
    pub async fn playbooks(&self) -> ConnectorResult<Vec<String>> {
        let rows = self.get_paged("/rest/playbook", &[]).await?;
        Ok(rows
            .iter()
            .map(|row| {
                format!(
                    "{}/{}",
                    row.get("_pretty_scm").and_then(Value::as_str).unwrap_or_default(),
                    row.get("name").and_then(Value::as_str).unwrap_or_default()
                )
            })
            .collect())
    }

    /// All severity names on the server, first letter capitalized.
    #[instrument(skip(self), fields(server = %self.server))]
    pub async fn severities(&self) -> ConnectorResult<Vec<String>> {
        let rows = self.get_paged("/rest/severity", &[]).await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get("name").and_then(Value::as_str))
            .map(capitalize)
            .collect())
    }

    /// Case-insensitive membership test against a severity list.
    pub fn check_severity(severity: &str, severities: &[String]) -> bool {
        severities.iter().any(|s| s.eq_ignore_ascii_case(severity))
    }

    /// Starts a playbook run against a container.
    pub async fn run_playbook(&self, container_id: i64, playbook_id: &str) -> ConnectorResult<i64> {
        let body = serde_json::json!({
            "container_id": container_id,
            "playbook_id": playbook_id,
            "run": true,
        });
        let response = self.post("/rest/playbook_run", &body).await?;
        let answer: Value = response
            .json()
            .await
            .map_err(|e| ConnectorError::InvalidResponse(e.to_string()))?;
        answer
            .get("playbook_run_id")
            .and_then(Value::as_i64)
            .ok_or_else(|| ConnectorError::InvalidResponse("playbook_run answer had no id".into()))
    }

    /// The server's CEF metadata merged over the stock table: field
    /// definitions plus the union of every `contains` type.
    pub async fn cef_metadata(
        &self,
    ) -> ConnectorResult<(BTreeMap<String, CefFieldMeta>, Vec<String>)> {
        let response = self.get("/rest/cef_metadata", &[]).await?;
        let body: CefMetadataAnswer = response
            .json()
            .await
            .map_err(|e| ConnectorError::InvalidResponse(e.to_string()))?;

        let mut contains: std::collections::BTreeSet<String> =
            DEFAULT_CONTAINS.iter().map(|s| s.to_string()).collect();
        let mut metadata = BTreeMap::new();
        for (field, meta) in body.cef {
            contains.extend(meta.contains.iter().cloned());
            metadata.insert(field, meta);
        }
        contains.extend(body.all_contains);
        contains.remove("*");
        Ok((metadata, contains.into_iter().collect()))
    }
}

/// `"high"` becomes `"High"`; the rest of the name is left alone.
fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[derive(Deserialize)]
struct PagedAnswer {
    #[serde(default)]
    count: Option<i64>,
    #[serde(default)]
    num_pages: Option<usize>,
    #[serde(default)]
    data: Vec<Value>,
}

#[derive(Deserialize)]
struct CefMetadataAnswer {
    #[serde(default)]
    cef: BTreeMap<String, CefFieldMeta>,
    #[serde(default)]
    all_contains: Vec<String>,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn test_client(url: &str, token: &str) -> SoarClient {
        let config = ServerConfig {
            ph_auth_config_id: "abc".to_string(),
            custom_name: String::new(),
            server: url.to_string(),
            auth_token: Some(token.to_string()),
            default: true,
            arrelay: false,
            proxy: None,
            user: String::new(),
        };
        SoarClient::new(&config, true).unwrap()
    }

    fn test_container() -> Container {
        Container {
            name: "my search: host:web01".to_string(),
            description: "(my search) added by Splunk App for SOAR Export".to_string(),
            source_data_identifier: "deadbeef".to_string(),
            severity: "medium".to_string(),
            sensitivity: "amber".to_string(),
            label: None,
            tags: Vec::new(),
        }
    }

    #[test]
    fn test_scrub_token_covers_url_encoding() {
        let client = test_client("https://soar.example.com", "t=ok+en&x");
        let raw = "error talking to https://soar.example.com?_filter_token__key='t=ok+en&x'";
        let encoded = "error at key 't%3Dok%2Ben%26x'";
        assert!(!client.scrub_token(raw).contains("t=ok+en&x"));
        assert!(!client.scrub_token(encoded).contains("t%3Dok%2Ben%26x"));
        assert!(client.scrub_token(raw).contains("<token>"));
    }

    #[test]
    fn test_capitalize_keeps_tail() {
        assert_eq!(capitalize("high"), "High");
        assert_eq!(capitalize("TLP-Red"), "TLP-Red");
        assert_eq!(capitalize(""), "");
    }

    #[test]
    fn test_check_severity_is_case_insensitive() {
        let severities = vec!["High".to_string(), "Medium".to_string()];
        assert!(SoarClient::check_severity("high", &severities));
        assert!(!SoarClient::check_severity("critical", &severities));
    }

    #[tokio::test]
    async fn test_verify_server_reads_username() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/rest/ph_user")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(
                json!({"count": 1, "num_pages": 1, "data": [{"username": "automation"}]})
                    .to_string(),
            )
            .create_async()
            .await;

        let client = test_client(&server.url(), "tok");
        let verified = client.verify_server().await.unwrap();
        assert_eq!(verified.user, "automation");
        assert_eq!(
            client.default_custom_name(&verified.user),
            format!("automation ({})", server.url())
        );
    }

    #[tokio::test]
    async fn test_verify_server_falls_back_to_asset() {
        let mut server = mockito::Server::new_async().await;
        let _ph_user = server
            .mock("GET", "/rest/ph_user")
            .match_query(mockito::Matcher::Any)
            .with_status(404)
            .with_body(json!({"message": "Not found"}).to_string())
            .create_async()
            .await;
        let _asset = server
            .mock("GET", "/rest/asset")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(json!({"count": 1, "data": [{"name": "legacy"}]}).to_string())
            .create_async()
            .await;

        let verified = test_client(&server.url(), "tok").verify_server().await.unwrap();
        assert_eq!(verified.user, "legacy");
    }

    #[tokio::test]
    async fn test_get_or_create_container_reuses_existing() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/rest/container")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(json!({"count": 1, "data": [{"id": 41}]}).to_string())
            .create_async()
            .await;

        let outcome = test_client(&server.url(), "tok")
            .get_or_create_container(&test_container())
            .await
            .unwrap();
        assert_eq!(outcome, ContainerOutcome { id: 41, created: false });
    }

    #[tokio::test]
    async fn test_get_or_create_container_wins_create_race() {
        let mut server = mockito::Server::new_async().await;
        let _query = server
            .mock("GET", "/rest/container")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(json!({"count": 0, "data": []}).to_string())
            .create_async()
            .await;
        let _post = server
            .mock("POST", "/rest/container")
            .with_status(400)
            .with_body(json!({"message": "already exists", "existing_container_id": 7}).to_string())
            .create_async()
            .await;

        let outcome = test_client(&server.url(), "tok")
            .get_or_create_container(&test_container())
            .await
            .unwrap();
        assert_eq!(outcome, ContainerOutcome { id: 7, created: false });
    }

    #[tokio::test]
    async fn test_unknown_severity_message_is_verbatim() {
        let mut server = mockito::Server::new_async().await;
        let _query = server
            .mock("GET", "/rest/container")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(json!({"count": 0, "data": []}).to_string())
            .create_async()
            .await;
        let _post = server
            .mock("POST", "/rest/container")
            .with_status(400)
            .with_body(json!({"message": UNKNOWN_SEVERITY_MESSAGE}).to_string())
            .create_async()
            .await;

        let err = test_client(&server.url(), "tok")
            .get_or_create_container(&test_container())
            .await
            .unwrap_err();
        match err {
            ConnectorError::Api { message, .. } => assert_eq!(message, UNKNOWN_SEVERITY_MESSAGE),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_post_artifact_existing_id_is_success() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/rest/artifact")
            .with_status(400)
            .with_body(json!({"message": "already exists", "existing_artifact_id": 9}).to_string())
            .create_async()
            .await;

        let artifact: Artifact = serde_json::from_value(json!({
            "name": "event",
            "label": "event",
            "description": "d",
            "source_data_identifier": "sdi",
            "type": "event",
            "severity": "medium",
            "cef": {},
            "cef_types": {},
            "data": {},
            "tags": []
        }))
        .unwrap();
        let outcome = test_client(&server.url(), "tok")
            .post_artifact(&artifact)
            .await
            .unwrap();
        assert_eq!(outcome.id, Some(9));
        assert!(!outcome.created);
    }

    #[tokio::test]
    async fn test_severities_walk_pages_and_capitalize() {
        let mut server = mockito::Server::new_async().await;
        let _page0 = server
            .mock("GET", "/rest/severity")
            .match_query(mockito::Matcher::UrlEncoded("page".into(), "0".into()))
            .with_status(200)
            .with_body(
                json!({"count": 3, "num_pages": 2, "data": [{"name": "high"}, {"name": "medium"}]})
                    .to_string(),
            )
            .create_async()
            .await;
        let _page1 = server
            .mock("GET", "/rest/severity")
            .match_query(mockito::Matcher::UrlEncoded("page".into(), "1".into()))
            .with_status(200)
            .with_body(json!({"count": 3, "num_pages": 2, "data": [{"name": "low"}]}).to_string())
            .create_async()
            .await;

        let severities = test_client(&server.url(), "tok").severities().await.unwrap();
        assert_eq!(severities, vec!["High", "Medium", "Low"]);
    }
}
