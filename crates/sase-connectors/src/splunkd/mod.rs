//! Client for the local splunkd management port.
//!
//! Everything the backend needs from splunkd goes through here: the
//! `phantom` conf file, the password store holding SOAR auth tokens, the
//! KV-store collections backing the retry queue and KV lookups, lookup
//! table files, and the server/settings endpoints used for FIPS detection
//! and deep-link hostnames.
//!
//! splunkd answers XML by default, so every call pins `output_mode=json`.
//! Authentication is the caller's session key, passed as
//! `Authorization: Splunk <key>`.

pub mod config_store;

use std::collections::BTreeMap;
use std::time::Duration;

use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::Value;
use sha1::{Digest, Sha1};
use tracing::{debug, warn};

use crate::error::{ConnectorError, ConnectorResult};
use crate::http::{build_url, check_status, classify_send_error};
use crate::secure_string::SecureString;

/// App namespace the conf file and password store live under.
pub const APP_NAMESPACE: &str = "phantom";

/// KV collection holding queued forwarding failures.
pub const RETRY_COLLECTION: &str = "phantom_retry_lookup";

/// Fetch ceiling for one retry pass.
pub const KV_FETCH_LIMIT: usize = 250;

/// Alert script a forwarding clone dispatches; deletes refuse to touch a
/// saved search that points anywhere else.
pub const FORWARD_SCRIPT: &str = "phantom_forward.sh";

const SAVED_SEARCHES_PATH: &str = "/servicesNS/nobody/phantom/saved/searches";

/// Client bound to one splunkd instance and one session key.
pub struct SplunkdClient {
    base_url: String,
    session_key: SecureString,
    client: Client,
}

/// FIPS flag and hostname from `/services/server/info`.
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub fips_mode: bool,
    pub host: String,
}

/// One row of a `data/lookup-table-files` listing.
#[derive(Debug, Clone)]
pub struct LookupTableFile {
    pub name: String,
    pub author: String,
    /// Absolute path on disk, from `eai:data`.
    pub path: String,
    pub namespace: String,
    pub owner: String,
    pub sharing: String,
    pub updated: String,
    pub can_write: bool,
    pub removable: bool,
}

/// A `transforms/lookups` stanza, resolved to its backing file or
/// KV collection.
#[derive(Debug, Clone, Default)]
pub struct TransformLookup {
    pub filename: Option<String>,
    pub collection: Option<String>,
    pub fields: Vec<String>,
}

impl SplunkdClient {
    /// Creates a client for the splunkd at `base_url`.
    ///
    /// The management port runs a self-signed certificate on a default
    /// install, so certificate verification is off for this local hop.
    pub fn new(base_url: &str, session_key: SecureString) -> ConnectorResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| ConnectorError::ConnectionFailed(e.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            session_key,
            client,
        })
    }

    fn auth_header(&self) -> String {
        format!("Splunk {}", self.session_key.expose_secret())
    }

    async fn get(&self, path: &str, query: &[(&str, &str)]) -> ConnectorResult<Response> {
        let response = self
            .client
            .get(build_url(&self.base_url, path))
            .header("Authorization", self.auth_header())
            .query(&[("output_mode", "json")])
            .query(query)
            .send()
            .await
            .map_err(classify_send_error)?;
        check_status(response).await
    }

    async fn post_form(&self, path: &str, params: &[(&str, &str)]) -> ConnectorResult<Response> {
        let response = self
            .client
            .post(build_url(&self.base_url, path))
            .header("Authorization", self.auth_header())
            .query(&[("output_mode", "json")])
            .form(params)
            .send()
            .await
            .map_err(classify_send_error)?;
        check_status(response).await
    }

    async fn post_json(&self, path: &str, body: &Value) -> ConnectorResult<Response> {
        let response = self
            .client
            .post(build_url(&self.base_url, path))
            .header("Authorization", self.auth_header())
            .query(&[("output_mode", "json")])
            .json(body)
            .send()
            .await
            .map_err(classify_send_error)?;
        check_status(response).await
    }

    async fn delete(&self, path: &str) -> ConnectorResult<Response> {
        let response = self
            .client
            .delete(build_url(&self.base_url, path))
            .header("Authorization", self.auth_header())
            .query(&[("output_mode", "json")])
            .send()
            .await
            .map_err(classify_send_error)?;
        check_status(response).await
    }

    async fn parse_entries(&self, response: Response) -> ConnectorResult<Vec<EntryEnvelope>> {
        let body: EntryList = response
            .json()
            .await
            .map_err(|e| ConnectorError::InvalidResponse(e.to_string()))?;
        Ok(body.entry)
    }

    // ---- password store -------------------------------------------------

    /// Loads the auth token stored for a server config id, or `None` when
    /// no entry exists.
    pub async fn load_password(&self, config_id: &str) -> ConnectorResult<Option<String>> {
        match self.get(&password_entry_path(config_id), &[]).await {
            Ok(response) => {
                let entries = self.parse_entries(response).await?;
                let clear = entries
                    .first()
                    .and_then(|e| e.content.get("clear_password"))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                Ok(clear)
            }
            Err(ConnectorError::NotFound(_)) => Ok(None),
            Err(ConnectorError::PermissionDenied(msg)) => {
                Err(ConnectorError::PasswordStore(msg))
            }
            Err(e) => Err(e),
        }
    }

    /// Stores (or replaces) the auth token for a server config id.
    pub async fn save_password(&self, config_id: &str, password: &str) -> ConnectorResult<()> {
        let result = if self.load_password(config_id).await?.is_some() {
            self.post_form(&password_entry_path(config_id), &[("password", password)])
                .await
        } else {
            self.post_form(
                &format!("/servicesNS/nobody/{APP_NAMESPACE}/storage/passwords"),
                &[("name", &hashed_entry_name(config_id)), ("password", password)],
            )
            .await
        };
        match result {
            Ok(_) => Ok(()),
            Err(ConnectorError::PermissionDenied(msg)) => {
                Err(ConnectorError::PasswordStore(msg))
            }
            Err(e) => Err(e),
        }
    }

    /// Removes the stored auth token for a server config id. A missing
    /// entry is not an error.
    pub async fn delete_password(&self, config_id: &str) -> ConnectorResult<()> {
        match self.delete(&password_entry_path(config_id)).await {
            Ok(_) | Err(ConnectorError::NotFound(_)) => Ok(()),
            Err(ConnectorError::PermissionDenied(msg)) => {
                Err(ConnectorError::PasswordStore(msg))
            }
            Err(e) => Err(e),
        }
    }

    // ---- conf file ------------------------------------------------------

    /// Reads all stanzas of the app conf file into a key-to-value map.
    ///
    /// Every stanza holds its payload JSON-encoded in a single `value`
    /// attribute, except `enable_logging` which is a bare string. Empty
    /// and `config` stanza names are dropped.
    pub async fn load_conf(&self) -> ConnectorResult<BTreeMap<String, Value>> {
        let response = self
            .get(
                &format!("/servicesNS/nobody/{APP_NAMESPACE}/configs/conf-{APP_NAMESPACE}"),
                &[("count", "-1")],
            )
            .await?;
        let entries = self.parse_entries(response).await?;

        let mut settings = BTreeMap::new();
        for entry in entries {
            if entry.name.is_empty() || entry.name == "config" {
                continue;
            }
            let Some(raw) = entry.content.get("value").and_then(Value::as_str) else {
                continue;
            };
            let value = if entry.name == "enable_logging" {
                Value::String(raw.to_string())
            } else {
                serde_json::from_str(raw).map_err(|e| {
                    ConnectorError::InvalidResponse(format!(
                        "conf stanza '{}' is not valid JSON: {e}",
                        entry.name
                    ))
                })?
            };
            settings.insert(entry.name, value);
        }
        Ok(settings)
    }

    /// Writes one conf stanza, creating it first when missing.
    pub async fn save_conf_value(&self, key: &str, value: &Value) -> ConnectorResult<()> {
        let conf_path = format!("/servicesNS/nobody/{APP_NAMESPACE}/configs/conf-{APP_NAMESPACE}");
        match self.post_form(&conf_path, &[("name", key)]).await {
            // An existing stanza answers 409; that's the common case.
            Ok(_) => {}
            Err(ConnectorError::Api { status: 409, .. }) => {}
            Err(ConnectorError::Api { message, .. }) if message.contains("already exists") => {}
            Err(e) => return Err(e),
        }

        let encoded = if key == "enable_logging" {
            value.as_str().unwrap_or_default().to_string()
        } else {
            serde_json::to_string(value)?
        };
        self.post_form(
            &format!("{conf_path}/{}", encode_segment(key)),
            &[("value", &encoded)],
        )
        .await?;
        Ok(())
    }

    // ---- KV store -------------------------------------------------------

    /// Fetches up to [`KV_FETCH_LIMIT`] documents from a collection.
    pub async fn kv_list(&self, collection: &str) -> ConnectorResult<Vec<Value>> {
        let limit = KV_FETCH_LIMIT.to_string();
        let response = self
            .get(
                &format!("/servicesNS/nobody/{APP_NAMESPACE}/storage/collections/data/{collection}"),
                &[("limit", limit.as_str())],
            )
            .await?;
        response
            .json()
            .await
            .map_err(|e| ConnectorError::InvalidResponse(e.to_string()))
    }

    /// Inserts one document, returning the generated `_key`.
    pub async fn kv_insert(&self, collection: &str, document: &Value) -> ConnectorResult<String> {
        let response = self
            .post_json(
                &format!("/servicesNS/nobody/{APP_NAMESPACE}/storage/collections/data/{collection}"),
                document,
            )
            .await?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| ConnectorError::InvalidResponse(e.to_string()))?;
        body.get("_key")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ConnectorError::InvalidResponse("KV insert answer had no _key".into()))
    }

    /// Deletes one document by its `_key`.
    pub async fn kv_delete(&self, collection: &str, key: &str) -> ConnectorResult<()> {
        self.delete(&format!(
            "/servicesNS/nobody/{APP_NAMESPACE}/storage/collections/data/{collection}/{}",
            encode_segment(key)
        ))
        .await?;
        Ok(())
    }

    /// Counts a collection through the search pipeline.
    ///
    /// Returns `-1` while the collection is still initializing (the export
    /// endpoint answers an empty body then), which callers treat as "try
    /// again next run" rather than "empty".
    pub async fn kv_count(&self, collection: &str) -> ConnectorResult<i64> {
        let search = format!("| inputlookup {collection} | stats count");
        let response = self
            .post_form(
                "/services/search/v2/jobs/export",
                &[("search", search.as_str()), ("exec_mode", "oneshot")],
            )
            .await?;
        let body = response
            .text()
            .await
            .map_err(|e| ConnectorError::InvalidResponse(e.to_string()))?;
        if body.trim().is_empty() {
            return Ok(-1);
        }
        for line in body.lines().rev() {
            let Ok(parsed) = serde_json::from_str::<Value>(line) else {
                continue;
            };
            if let Some(count) = parsed.pointer("/result/count") {
                let count = count
                    .as_i64()
                    .or_else(|| count.as_str().and_then(|s| s.parse().ok()));
                if let Some(count) = count {
                    return Ok(count);
                }
            }
        }
        Err(ConnectorError::InvalidResponse(
            "export answer carried no stats count".into(),
        ))
    }

    /// Column list of a KV collection, `_key` first, from the `field.*`
    /// keys of its collections config. `None` when the collection does not
    /// exist.
    pub async fn kv_collection_fields(
        &self,
        namespace: &str,
        collection: &str,
    ) -> ConnectorResult<Option<Vec<String>>> {
        let path = format!(
            "/servicesNS/nobody/{}/storage/collections/config/{}",
            encode_segment(namespace),
            encode_segment(collection)
        );
        match self.get(&path, &[]).await {
            Ok(response) => {
                let entries = self.parse_entries(response).await?;
                let Some(entry) = entries.into_iter().next() else {
                    return Ok(None);
                };
                let mut fields = vec!["_key".to_string()];
                fields.extend(
                    entry
                        .content
                        .keys()
                        .filter_map(|k| k.strip_prefix("field."))
                        .map(str::to_string),
                );
                Ok(Some(fields))
            }
            Err(ConnectorError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Field list from the transforms stanza that maps a KV collection,
    /// used when the collections config carries no typed fields.
    pub async fn transform_fields_for_collection(
        &self,
        namespace: &str,
        collection: &str,
    ) -> ConnectorResult<Option<Vec<String>>> {
        let search = format!("collection={collection}");
        let response = self
            .get(
                &format!(
                    "/servicesNS/nobody/{}/data/transforms/lookups",
                    encode_segment(namespace)
                ),
                &[("search", search.as_str())],
            )
            .await?;
        let entries = self.parse_entries(response).await?;
        Ok(entries.first().and_then(|entry| {
            entry
                .content
                .get("fields_array")
                .and_then(Value::as_array)
                .map(|fields| {
                    fields
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
        }))
    }

    /// Fetches the documents of a KV lookup in an owner/namespace scope.
    pub async fn kv_lookup_documents(
        &self,
        owner: &str,
        namespace: &str,
        collection: &str,
    ) -> ConnectorResult<Vec<serde_json::Map<String, Value>>> {
        let response = self
            .get(
                &format!(
                    "/servicesNS/{}/{}/storage/collections/data/{}",
                    encode_segment(owner),
                    encode_segment(namespace),
                    encode_segment(collection)
                ),
                &[],
            )
            .await?;
        let rows: Vec<Value> = response
            .json()
            .await
            .map_err(|e| ConnectorError::InvalidResponse(e.to_string()))?;
        Ok(rows
            .into_iter()
            .filter_map(|row| match row {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect())
    }

    // ---- server info ----------------------------------------------------

    /// FIPS flag and host name of this splunkd.
    pub async fn server_info(&self) -> ConnectorResult<ServerInfo> {
        let response = self.get("/services/server/info", &[]).await?;
        let entries = self.parse_entries(response).await?;
        let content = entries
            .first()
            .map(|e| &e.content)
            .ok_or_else(|| ConnectorError::InvalidResponse("server/info had no entry".into()))?;
        Ok(ServerInfo {
            fips_mode: truthy(content.get("fips_mode")),
            host: content
                .get("host")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        })
    }

    /// Base URL of Splunk Web on this host, for deep links back into
    /// search. The port is dropped when it is the scheme default.
    pub async fn web_hostname(&self) -> ConnectorResult<String> {
        let info = self.server_info().await?;
        let response = self.get("/services/server/settings", &[]).await?;
        let entries = self.parse_entries(response).await?;
        let content = entries
            .first()
            .map(|e| &e.content)
            .ok_or_else(|| ConnectorError::InvalidResponse("server/settings had no entry".into()))?;

        let ssl = truthy(content.get("enableSplunkWebSSL"));
        let port = content
            .get("httpport")
            .map(|v| {
                v.as_i64()
                    .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
                    .unwrap_or(8000)
            })
            .unwrap_or(8000);
        let scheme = if ssl { "https" } else { "http" };
        if port == 80 || port == 443 {
            Ok(format!("{scheme}://{}", info.host))
        } else {
            Ok(format!("{scheme}://{}:{port}", info.host))
        }
    }

    // ---- lookup table files ---------------------------------------------

    /// Lists lookup table files visible in an owner/namespace scope.
    pub async fn list_lookup_tables(
        &self,
        owner: &str,
        namespace: &str,
    ) -> ConnectorResult<Vec<LookupTableFile>> {
        let response = self
            .get(
                &format!(
                    "/servicesNS/{}/{}/data/lookup-table-files",
                    encode_segment(owner),
                    encode_segment(namespace)
                ),
                &[("count", "-1")],
            )
            .await?;
        let entries = self.parse_entries(response).await?;
        Ok(entries.into_iter().map(lookup_table_from_entry).collect())
    }

    /// Fetches one lookup table file entry, or `None` when it does not
    /// exist in the scope.
    pub async fn get_lookup_table(
        &self,
        owner: &str,
        namespace: &str,
        name: &str,
    ) -> ConnectorResult<Option<LookupTableFile>> {
        let path = format!(
            "/servicesNS/{}/{}/data/lookup-table-files/{}",
            encode_segment(owner),
            encode_segment(namespace),
            encode_segment(name)
        );
        match self.get(&path, &[]).await {
            Ok(response) => {
                let entries = self.parse_entries(response).await?;
                Ok(entries.into_iter().next().map(lookup_table_from_entry))
            }
            Err(ConnectorError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Registers a new lookup table file from content staged under
    /// `var/run/splunk/lookup_tmp`.
    pub async fn create_lookup_table(
        &self,
        owner: &str,
        namespace: &str,
        name: &str,
        staged_path: &str,
    ) -> ConnectorResult<()> {
        self.post_form(
            &format!(
                "/servicesNS/{}/{}/data/lookup-table-files",
                encode_segment(owner),
                encode_segment(namespace)
            ),
            &[("name", name), ("eai:data", staged_path)],
        )
        .await?;
        Ok(())
    }

    /// Replaces an existing lookup table file with staged content.
    pub async fn update_lookup_table(
        &self,
        owner: &str,
        namespace: &str,
        name: &str,
        staged_path: &str,
    ) -> ConnectorResult<()> {
        self.post_form(
            &format!(
                "/servicesNS/{}/{}/data/lookup-table-files/{}",
                encode_segment(owner),
                encode_segment(namespace),
                encode_segment(name)
            ),
            &[("eai:data", staged_path)],
        )
        .await?;
        Ok(())
    }

    /// Resolves a `transforms/lookups` stanza to its backing file or KV
    /// collection.
    pub async fn transform_lookup(
        &self,
        owner: &str,
        namespace: &str,
        stanza: &str,
    ) -> ConnectorResult<Option<TransformLookup>> {
        let path = format!(
            "/servicesNS/{}/{}/data/transforms/lookups/{}",
            encode_segment(owner),
            encode_segment(namespace),
            encode_segment(stanza)
        );
        match self.get(&path, &[]).await {
            Ok(response) => {
                let entries = self.parse_entries(response).await?;
                Ok(entries.first().map(|entry| TransformLookup {
                    filename: entry
                        .content
                        .get("filename")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    collection: entry
                        .content
                        .get("collection")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    fields: entry
                        .content
                        .get("fields_list")
                        .and_then(Value::as_str)
                        .map(|list| {
                            list.split(',')
                                .map(|f| f.trim().to_string())
                                .filter(|f| !f.is_empty())
                                .collect()
                        })
                        .unwrap_or_default(),
                }))
            }
            Err(ConnectorError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Tells the cluster a lookup file changed so it replicates.
    ///
    /// A standalone host answers 400 with a "no local ConfRepo" message,
    /// which is fine; any other failure is logged and swallowed because a
    /// missed notification only delays replication.
    pub async fn notify_lookup_update(&self, namespace: &str, filename: &str) {
        let result = self
            .post_form(
                "/services/replication/configuration/lookup-update-notify",
                &[("app", namespace), ("filename", filename), ("user", "nobody")],
            )
            .await;
        match result {
            Ok(_) => debug!(filename, "lookup replication notified"),
            Err(ConnectorError::Api { status: 400, message })
                if message.contains("No local ConfRepo registered") =>
            {
                debug!(filename, "standalone host, no replication to notify");
            }
            Err(e) => warn!(filename, error = %e, "lookup replication notify failed"),
        }
    }

    // ---- users ----------------------------------------------------------

    /// Names of all Splunk users, used to validate owner parameters.
    pub async fn list_users(&self) -> ConnectorResult<Vec<String>> {
        let response = self.get("/services/admin/users", &[("count", "-1")]).await?;
        let entries = self.parse_entries(response).await?;
        Ok(entries.into_iter().map(|e| e.name).collect())
    }

    // ---- saved searches --------------------------------------------------

    /// Content of one saved search, or `None` when it does not exist.
    pub async fn get_saved_search(
        &self,
        name: &str,
    ) -> ConnectorResult<Option<serde_json::Map<String, Value>>> {
        let path = format!("{SAVED_SEARCHES_PATH}/{}", encode_segment(name));
        match self.get(&path, &[]).await {
            Ok(response) => {
                let entries = self.parse_entries(response).await?;
                Ok(entries.into_iter().next().map(|e| e.content))
            }
            Err(ConnectorError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Creates a saved search and shares it globally so every app can see
    /// the scheduled clone. A failed ACL update is logged but not fatal.
    pub async fn save_saved_search(
        &self,
        name: &str,
        attributes: &[(String, String)],
    ) -> ConnectorResult<()> {
        let params: Vec<(&str, &str)> = attributes
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        self.post_form(SAVED_SEARCHES_PATH, &params).await?;

        let acl_path = format!("{SAVED_SEARCHES_PATH}/{}/acl", encode_segment(name));
        if let Err(e) = self
            .post_form(&acl_path, &[("sharing", "global"), ("owner", "nobody")])
            .await
        {
            warn!(search_name = name, error = %e, "could not share the saved search globally");
        }
        Ok(())
    }

    /// Deletes a scheduled forwarding clone.
    ///
    /// Only searches whose alert script is still [`FORWARD_SCRIPT`] are
    /// removed; anything else was taken over by the user and is left alone.
    /// A missing search is not an error.
    pub async fn delete_saved_search(&self, name: &str) -> ConnectorResult<()> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(());
        }
        let Some(content) = self.get_saved_search(name).await? else {
            return Ok(());
        };
        let script = content.get("action.script.filename").and_then(Value::as_str);
        if script != Some(FORWARD_SCRIPT) {
            warn!(
                search_name = name,
                "refusing to delete a saved search that is not a forwarding clone"
            );
            return Ok(());
        }
        self.delete(&format!("{SAVED_SEARCHES_PATH}/{}", encode_segment(name)))
            .await?;
        Ok(())
    }
}

/// Password store entry name for a config id: the id is SHA-1 hashed so
/// arbitrary ids survive the entry-name charset.
fn hashed_entry_name(config_id: &str) -> String {
    hex::encode(Sha1::digest(config_id.as_bytes()))
}

/// Entry path for a stored password. splunkd wraps the entry name in
/// realm colons, which must stay percent-encoded in the path.
fn password_entry_path(config_id: &str) -> String {
    format!(
        "/servicesNS/nobody/{APP_NAMESPACE}/storage/passwords/%3A{}%3A",
        hashed_entry_name(config_id)
    )
}

fn encode_segment(value: &str) -> String {
    utf8_percent_encode(value, NON_ALPHANUMERIC).to_string()
}

/// splunkd renders booleans variously as bools, "0"/"1" and numbers
/// depending on endpoint and version.
fn truthy(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0) != 0,
        Some(Value::String(s)) => matches!(s.to_lowercase().as_str(), "1" | "true" | "yes"),
        _ => false,
    }
}

fn lookup_table_from_entry(entry: EntryEnvelope) -> LookupTableFile {
    let acl = entry.acl.unwrap_or_default();
    LookupTableFile {
        name: entry.name,
        author: entry.author,
        path: entry
            .content
            .get("eai:data")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        namespace: acl.app,
        owner: acl.owner,
        sharing: acl.sharing,
        updated: entry.updated,
        can_write: acl.can_write,
        removable: acl.removable,
    }
}

#[derive(Deserialize)]
struct EntryList {
    #[serde(default)]
    entry: Vec<EntryEnvelope>,
}

#[derive(Deserialize)]
struct EntryEnvelope {
    name: String,
    #[serde(default)]
    author: String,
    #[serde(default)]
    updated: String,
    #[serde(default)]
    content: serde_json::Map<String, Value>,
    #[serde(default)]
    acl: Option<EntryAcl>,
}

#[derive(Deserialize, Default)]
struct EntryAcl {
    #[serde(default)]
    app: String,
    #[serde(default)]
    owner: String,
    #[serde(default)]
    sharing: String,
    #[serde(default)]
    can_write: bool,
    #[serde(default)]
    removable: bool,
}
