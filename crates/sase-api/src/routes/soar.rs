//! SOAR export endpoints: target listings, severity and playbook sync,
//! CEF metadata, and forwarding configurations.

use std::collections::BTreeMap;

use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use percent_encoding::percent_decode_str;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{info, warn};
use uuid::Uuid;

use sase_connectors::splunkd::{config_store, FORWARD_SCRIPT};
use sase_connectors::{SoarClient, SplunkdClient};
use sase_core::config::ServerConfig;
use sase_core::forward::cef::{default_cef_metadata, DEFAULT_CONTAINS};
use sase_core::AppConfig;

use crate::error::{envelope, ApiError};
use crate::state::{AppState, SessionKey};

/// Prefix for the saved-search clones the forwarding scheduler runs.
const CLONE_PREFIX: &str = "_phantom_app_";

const HTTPS_REQUIRED: &str = "SOAR only supports https, please update your server config.";

/// Creates SOAR export routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/targets", get(list_targets))
        .route("/ar_targets", get(list_ar_targets))
        .route("/severities", get(list_severities).post(sync_severities))
        .route("/playbooks", get(list_playbooks).post(sync_playbooks))
        .route("/cef_metadata", get(get_cef_metadata))
        .route(
            "/forwarding",
            post(upsert_forwarding).delete(delete_forwarding),
        )
}

#[derive(Debug, Deserialize)]
struct TargetSyncPayload {
    #[serde(default)]
    config: Vec<ServerConfig>,
    #[serde(default)]
    accepted: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ForwardingPayload {
    data: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct ForwardingQuery {
    id: String,
}

/// GET /soar_export/targets
async fn list_targets(
    State(state): State<AppState>,
    key: SessionKey,
) -> Result<Json<Value>, ApiError> {
    let splunkd = state.splunkd(&key)?;
    let config = config_store::load_app_config(&splunkd).await?;
    Ok(envelope(target_names(&config, false)))
}

/// GET /soar_export/ar_targets
///
/// Like the plain listing but with a relay entry for every server that
/// forwards through a heavy forwarder.
async fn list_ar_targets(
    State(state): State<AppState>,
    key: SessionKey,
) -> Result<Json<Value>, ApiError> {
    let splunkd = state.splunkd(&key)?;
    let config = config_store::load_app_config(&splunkd).await?;
    Ok(envelope(target_names(&config, true)))
}

/// GET /soar_export/severities
async fn list_severities(
    State(state): State<AppState>,
    key: SessionKey,
) -> Result<Json<Value>, ApiError> {
    let splunkd = state.splunkd(&key)?;
    let config = config_store::load_app_config(&splunkd).await?;
    Ok(envelope(severity_names(&config)))
}

/// GET /soar_export/playbooks
async fn list_playbooks(
    State(state): State<AppState>,
    key: SessionKey,
) -> Result<Json<Value>, ApiError> {
    let splunkd = state.splunkd(&key)?;
    let config = config_store::load_app_config(&splunkd).await?;
    Ok(envelope(playbook_names(&config)))
}

/// POST /soar_export/severities
///
/// Fetches the severity list from every posted server and caches the
/// result, pruning entries for servers that are no longer configured.
/// Per-server failures are collected and answered together.
async fn sync_severities(
    State(state): State<AppState>,
    key: SessionKey,
    Json(payload): Json<TargetSyncPayload>,
) -> Result<Json<Value>, ApiError> {
    let splunkd = state.splunkd(&key)?;
    let config = config_store::load_app_config(&splunkd).await?;

    info!(servers = payload.config.len(), "Syncing severities");

    let mut fetched: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut errors: Vec<Value> = Vec::new();
    for server in &payload.config {
        require_https(server)?;
        match fetch_severities(server, config.verify_certs).await {
            Ok(list) => {
                fetched.insert(server.ph_auth_config_id.clone(), list);
            }
            Err(e) => errors.push(json!({
                "custom_name": server.custom_name,
                "message": format!(
                    "Error retrieving severities for {}. {}",
                    server.custom_name, e
                ),
            })),
        }
    }

    let merged = merge_cached(&config.severities, fetched, &config.servers);
    config_store::save_setting(&splunkd, "severities", &serde_json::to_value(&merged)?).await?;
    save_accepted(&splunkd, payload.accepted.as_ref()).await?;

    if errors.is_empty() {
        Ok(Json(json!({"success": true, "status": 200})))
    } else {
        Ok(Json(json!({"success": false, "status": 400, "error": errors})))
    }
}

/// POST /soar_export/playbooks
///
/// Same shape as the severity sync, but the first failing server aborts
/// the whole update.
async fn sync_playbooks(
    State(state): State<AppState>,
    key: SessionKey,
    Json(payload): Json<TargetSyncPayload>,
) -> Result<Json<Value>, ApiError> {
    let splunkd = state.splunkd(&key)?;
    let config = config_store::load_app_config(&splunkd).await?;

    info!(servers = payload.config.len(), "Syncing playbooks");

    let mut fetched: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for server in &payload.config {
        require_https(server)?;
        match fetch_playbooks(server, config.verify_certs).await {
            Ok(list) => {
                fetched.insert(server.ph_auth_config_id.clone(), list);
            }
            Err(e) => {
                return Ok(Json(json!({
                    "error": {
                        "custom_name": server.custom_name,
                        "message": format!(
                            "Error retrieving playbooks for {}. {}",
                            server.custom_name, e
                        ),
                    },
                    "status": 400,
                })));
            }
        }
    }

    let merged = merge_cached(&config.playbooks, fetched, &config.servers);
    config_store::save_setting(&splunkd, "playbooks", &serde_json::to_value(&merged)?).await?;
    save_accepted(&splunkd, payload.accepted.as_ref()).await?;

    Ok(Json(json!({"success": true, "status": 200})))
}

/// GET /soar_export/cef_metadata
async fn get_cef_metadata(
    State(state): State<AppState>,
    key: SessionKey,
) -> Result<Json<Value>, ApiError> {
    let splunkd = state.splunkd(&key)?;
    let config = config_store::load_app_config(&splunkd).await?;
    Ok(envelope(json!({
        "cef_metadata": default_cef_metadata(),
        "all_contains": DEFAULT_CONTAINS,
        "cim_fields": config.cim_mapping,
    })))
}

/// POST /soar_export/forwarding
///
/// Upserts one forwarding configuration and rebuilds its saved-search
/// clone. The configuration is persisted before the clone is written,
/// and rolled back when the clone cannot be saved.
async fn upsert_forwarding(
    State(state): State<AppState>,
    key: SessionKey,
    Json(payload): Json<ForwardingPayload>,
) -> Result<Json<Value>, ApiError> {
    let splunkd = state.splunkd(&key)?;
    let config = config_store::load_app_config(&splunkd).await?;
    let mut search = payload.data;
    search.remove("_");

    let id = search
        .get("_id")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let previous = config
        .forwarding
        .get(&id)
        .filter(|v| !v.is_null())
        .cloned();
    let previous_name = previous
        .as_ref()
        .and_then(|v| v.get("_name"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let name = search
        .get("_name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();
    if name.is_empty() {
        return Err(ApiError::BadRequest(
            "Forwarding configuration requires a name".to_string(),
        ));
    }
    if name.starts_with(CLONE_PREFIX) {
        return Err(ApiError::BadRequest(
            "Cannot use a _phantom_app saved search in a forwarding configuration".to_string(),
        ));
    }
    for (other_id, other) in config.forwarding_configs() {
        if other.get("_name").and_then(Value::as_str) == Some(name.as_str()) && other_id != &id {
            return Err(ApiError::BadRequest(format!(
                "Forwarding configuration with name \"{name}\" already exists."
            )));
        }
    }
    search.insert("_name".to_string(), Value::String(name.clone()));
    search.insert("_id".to_string(), Value::String(id.clone()));

    let clone_name = format!("{CLONE_PREFIX}{name}");
    let attributes = build_clone_attributes(&splunkd, &mut search, &clone_name).await?;
    split_list_fields(&mut search);

    info!(id = %id, clone = %clone_name, "Saving forwarding configuration");

    config_store::save_forwarding_config(&splunkd, &id, &Value::Object(search.clone())).await?;

    // Stale clones are cleared before the new one is written. Failures
    // here are non-fatal, the save below reports the real outcome.
    if let Some(prev) = &previous_name {
        let previous_clone = format!("{CLONE_PREFIX}{prev}");
        if previous_clone != clone_name {
            if let Err(e) = splunkd.delete_saved_search(&previous_clone).await {
                warn!(clone = %previous_clone, error = %e, "Could not delete renamed clone");
            }
        }
    }
    if let Err(e) = splunkd.delete_saved_search(&clone_name).await {
        warn!(clone = %clone_name, error = %e, "Could not delete existing clone");
    }

    if let Err(e) = splunkd.save_saved_search(&clone_name, &attributes).await {
        match (&previous, &previous_name) {
            (None, _) => {
                if let Err(e2) = config_store::delete_forwarding_config(&splunkd, &id).await {
                    warn!(id = %id, error = %e2, "Failed to remove config after clone failure");
                }
            }
            (Some(prev), Some(prev_name)) if format!("{CLONE_PREFIX}{prev_name}") == clone_name => {
                if let Err(e2) = config_store::save_forwarding_config(&splunkd, &id, prev).await {
                    warn!(id = %id, error = %e2, "Failed to restore config after clone failure");
                }
            }
            _ => {}
        }
        return Err(ApiError::BadRequest(e.to_string()));
    }

    Ok(Json(json!({"success": true, "status": 200, "_id": id})))
}

/// DELETE /soar_export/forwarding
async fn delete_forwarding(
    State(state): State<AppState>,
    key: SessionKey,
    Query(query): Query<ForwardingQuery>,
) -> Result<Json<Value>, ApiError> {
    let splunkd = state.splunkd(&key)?;
    let config = config_store::load_app_config(&splunkd).await?;

    let Some(entry) = config.forwarding.get(&query.id).filter(|v| !v.is_null()) else {
        return Err(ApiError::NotFound(
            "Forwarding configuration not found".to_string(),
        ));
    };
    let name = entry
        .get("_name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    info!(id = %query.id, name = %name, "Deleting forwarding configuration");

    config_store::delete_forwarding_config(&splunkd, &query.id).await?;
    if !name.is_empty() {
        splunkd
            .delete_saved_search(&format!("{CLONE_PREFIX}{name}"))
            .await?;
    }

    Ok(Json(json!({"success": true, "status": 200})))
}

// ---- helpers ------------------------------------------------------------

fn require_https(server: &ServerConfig) -> Result<(), ApiError> {
    if server.server.to_lowercase().starts_with("https://") {
        Ok(())
    } else {
        warn!(server = %server.server, "Rejected non-https server");
        Err(ApiError::BadRequest(HTTPS_REQUIRED.to_string()))
    }
}

async fn fetch_severities(
    server: &ServerConfig,
    verify_certs: bool,
) -> Result<Vec<String>, ApiError> {
    let client = SoarClient::new(&decoded_token(server), verify_certs)?;
    Ok(client.severities().await?)
}

async fn fetch_playbooks(
    server: &ServerConfig,
    verify_certs: bool,
) -> Result<Vec<String>, ApiError> {
    let client = SoarClient::new(&decoded_token(server), verify_certs)?;
    Ok(client.playbooks().await?)
}

/// The UI posts tokens url-encoded.
fn decoded_token(server: &ServerConfig) -> ServerConfig {
    let mut server = server.clone();
    server.auth_token = server.auth_token.map(|t| percent_decode(&t));
    server
}

fn percent_decode(value: &str) -> String {
    percent_decode_str(value)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| value.to_string())
}

/// Merges freshly fetched per-server lists over the cached ones, dropping
/// cache entries whose server is gone from the configuration.
fn merge_cached(
    cached: &BTreeMap<String, Vec<String>>,
    fetched: BTreeMap<String, Vec<String>>,
    servers: &BTreeMap<String, ServerConfig>,
) -> BTreeMap<String, Vec<String>> {
    let mut merged: BTreeMap<String, Vec<String>> = cached
        .iter()
        .filter(|(id, _)| servers.contains_key(*id))
        .map(|(id, list)| (id.clone(), list.clone()))
        .collect();
    merged.extend(fetched);
    merged
}

async fn save_accepted(splunkd: &SplunkdClient, accepted: Option<&Value>) -> Result<(), ApiError> {
    let accepted = match accepted {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s == "true",
        _ => false,
    };
    config_store::save_setting(splunkd, "accepted", &Value::Bool(accepted)).await?;
    Ok(())
}

/// Sorted display names of every configured server, with `Default` first
/// when one is marked default, and optional `(ARR)` relay entries.
fn target_names(config: &AppConfig, include_relays: bool) -> Vec<String> {
    let mut names: Vec<String> = config
        .servers
        .values()
        .map(|s| s.custom_name.clone())
        .collect();
    if include_relays {
        for server in config.servers.values().filter(|s| s.arrelay) {
            names.push(format!("{} (ARR)", server.custom_name));
        }
    }
    names.sort();
    if config.servers.values().any(|s| s.default) {
        names.insert(0, "Default".to_string());
    }
    names
}

/// `"<custom_name>: <severity>"` for every server, the default server's
/// entries repeated up front as `"Default: <severity>"`.
fn severity_names(config: &AppConfig) -> Vec<String> {
    let mut formatted = Vec::new();
    let mut defaults = Vec::new();
    for (config_id, server) in &config.servers {
        let severities = config.severities_for(config_id);
        if server.default {
            defaults = severities
                .iter()
                .map(|s| format!("Default: {s}"))
                .collect();
        }
        formatted.extend(
            severities
                .iter()
                .map(|s| format!("{}: {s}", server.custom_name)),
        );
    }
    formatted.sort();
    let mut names = defaults;
    names.extend(formatted);
    names
}

/// Like [`severity_names`] but only servers with a cached playbook list
/// contribute entries.
fn playbook_names(config: &AppConfig) -> Vec<String> {
    let mut formatted = Vec::new();
    let mut defaults = Vec::new();
    for (config_id, server) in &config.servers {
        let Some(playbooks) = config.playbooks.get(config_id).filter(|p| !p.is_empty()) else {
            continue;
        };
        if server.default {
            defaults = playbooks
                .iter()
                .map(|p| format!("Default: {p}"))
                .collect();
        }
        formatted.extend(
            playbooks
                .iter()
                .map(|p| format!("{}: {p}", server.custom_name)),
        );
    }
    formatted.sort();
    let mut names = defaults;
    names.extend(formatted);
    names
}

/// Splits `key[]` fields posted as comma-joined strings into arrays.
fn split_list_fields(search: &mut Map<String, Value>) {
    let keys: Vec<String> = search
        .keys()
        .filter(|k| k.ends_with("[]"))
        .cloned()
        .collect();
    for key in keys {
        if let Some(Value::String(raw)) = search.get(&key) {
            let parts: Vec<Value> = raw
                .split(',')
                .map(|p| Value::String(p.to_string()))
                .collect();
            search.insert(key, Value::Array(parts));
        }
    }
}

fn minutes_of(search: &Map<String, Value>) -> Option<i64> {
    match search.get("_minutes") {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Cron expression for a forwarding schedule. A scheduled search runs
/// every `minutes` (folded into an hour step past 59); realtime clones
/// get a run-every-minute schedule and dispatch in `rt` mode instead.
fn cron_schedule(schedule: &str, minutes: Option<i64>) -> Result<String, ApiError> {
    if schedule != "scheduled" {
        return Ok("* * * * *".to_string());
    }
    let minutes = minutes.filter(|m| *m > 0 && *m < 60 * 24).ok_or_else(|| {
        ApiError::BadRequest("Missing or malformed \"minutes\"".to_string())
    })?;
    if minutes >= 60 {
        Ok(format!("{} */{} * * *", minutes % 60, minutes / 60))
    } else {
        Ok(format!("*/{minutes} * * * *"))
    }
}

/// Builds the saved-search attributes for a forwarding clone, filling the
/// derived `_query` and `_preview` fields into `search` as it goes.
async fn build_clone_attributes(
    splunkd: &SplunkdClient,
    search: &mut Map<String, Value>,
    clone_name: &str,
) -> Result<Vec<(String, String)>, ApiError> {
    let schedule = search
        .get("_schedule")
        .and_then(Value::as_str)
        .unwrap_or("scheduled")
        .to_string();
    let realtime = schedule == "realtime";
    let minutes = minutes_of(search);
    let cron = cron_schedule(&schedule, minutes)?;
    let enabled = search.get("_enabled").and_then(Value::as_bool).unwrap_or(false);
    let minutes = minutes.unwrap_or(0);

    let source_search = search
        .get("_savedsearch")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let mut attributes: Vec<(String, String)> = Vec::new();
    let push = |attrs: &mut Vec<(String, String)>, k: &str, v: String| {
        attrs.push((k.to_string(), v));
    };

    let query = if let Some(source) = &source_search {
        if splunkd.get_saved_search(source).await?.is_none() {
            return Err(ApiError::BadRequest(format!(
                "Saved search \"{source}\" not found"
            )));
        }
        let query = format!("| savedsearch \"{}\"", source.replace('"', "\\\""));

        let stored = search
            .get("_earliest_time")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(percent_decode);
        let earliest = match stored {
            Some(earliest) => earliest,
            None => {
                let earliest = format!("-{}m", minutes * 2);
                search.insert(
                    "_earliest_time".to_string(),
                    Value::String(earliest.clone()),
                );
                search.insert("_latest_time".to_string(), Value::String(String::new()));
                earliest
            }
        };
        let latest = search
            .get("_latest_time")
            .and_then(Value::as_str)
            .map(|s| percent_decode(s))
            .unwrap_or_default();

        push(&mut attributes, "dispatch.earliest_time", rt_or(realtime, earliest));
        push(&mut attributes, "dispatch.index_earliest", rt_or(realtime, String::new()));
        push(&mut attributes, "dispatch.index_latest", rt_or(realtime, String::new()));
        push(&mut attributes, "dispatch.latest_time", rt_or(realtime, latest));
        query
    } else {
        let model = search.get("_model").and_then(Value::as_str).unwrap_or_default();
        let model_search = search.get("_search").and_then(Value::as_str).unwrap_or_default();
        if model.is_empty() {
            return Err(ApiError::BadRequest(
                "Forwarding configuration requires a saved search or data model".to_string(),
            ));
        }
        let query = format!("| datamodel {model} {model_search} search | fields + *");

        if search.get("_dispatch").and_then(Value::as_str) == Some("indextime") {
            push(
                &mut attributes,
                "dispatch.earliest_time",
                rt_or(realtime, format!("-{}m", minutes * 2)),
            );
            push(
                &mut attributes,
                "dispatch.index_earliest",
                rt_or(realtime, format!("-{minutes}m")),
            );
            push(&mut attributes, "dispatch.index_latest", rt_or(realtime, String::new()));
            push(&mut attributes, "dispatch.latest_time", rt_or(realtime, String::new()));
        } else {
            push(
                &mut attributes,
                "dispatch.earliest_time",
                rt_or(realtime, format!("-{minutes}m")),
            );
            push(&mut attributes, "dispatch.latest_time", rt_or(realtime, String::new()));
        }
        query
    };

    search.insert("_query".to_string(), Value::String(query.clone()));
    search.insert("_preview".to_string(), Value::String(query.clone()));

    push(&mut attributes, "name", clone_name.to_string());
    push(&mut attributes, "search", query);
    push(&mut attributes, "actions", "script".to_string());
    push(&mut attributes, "action.script", "1".to_string());
    push(&mut attributes, "action.script.filename", FORWARD_SCRIPT.to_string());
    push(&mut attributes, "is_scheduled", "1".to_string());
    push(&mut attributes, "cron_schedule", cron);
    push(
        &mut attributes,
        "disabled",
        if enabled { "0" } else { "1" }.to_string(),
    );
    push(&mut attributes, "alert.digest_mode", "1".to_string());
    push(&mut attributes, "alert_comparator", "greater than".to_string());
    push(&mut attributes, "alert_threshold", "0".to_string());
    if schedule == "scheduled" {
        push(&mut attributes, "alert_type", "number of events".to_string());
    }

    Ok(attributes)
}

fn rt_or(realtime: bool, value: String) -> String {
    if realtime {
        "rt".to_string()
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(id: &str, name: &str, default: bool, arrelay: bool) -> ServerConfig {
        ServerConfig {
            ph_auth_config_id: id.to_string(),
            custom_name: name.to_string(),
            server: "https://soar.example.com".to_string(),
            auth_token: Some("token".to_string()),
            default,
            arrelay,
            proxy: None,
            user: String::new(),
        }
    }

    fn config_with(servers: &[ServerConfig]) -> AppConfig {
        let mut config = AppConfig::default();
        for s in servers {
            config
                .servers
                .insert(s.ph_auth_config_id.clone(), s.clone());
        }
        config
    }

    #[test]
    fn test_cron_schedule_folds_hours() {
        assert_eq!(cron_schedule("scheduled", Some(15)).unwrap(), "*/15 * * * *");
        assert_eq!(cron_schedule("scheduled", Some(90)).unwrap(), "30 */1 * * *");
        assert_eq!(cron_schedule("scheduled", Some(120)).unwrap(), "0 */2 * * *");
        assert_eq!(cron_schedule("realtime", None).unwrap(), "* * * * *");
    }

    #[test]
    fn test_cron_schedule_rejects_bad_minutes() {
        assert!(cron_schedule("scheduled", None).is_err());
        assert!(cron_schedule("scheduled", Some(0)).is_err());
        assert!(cron_schedule("scheduled", Some(60 * 24)).is_err());
    }

    #[test]
    fn test_target_names_default_first() {
        let config = config_with(&[
            server("a", "zeta", false, false),
            server("b", "alpha", true, false),
        ]);
        assert_eq!(target_names(&config, false), vec!["Default", "alpha", "zeta"]);
    }

    #[test]
    fn test_target_names_without_default() {
        let config = config_with(&[server("a", "zeta", false, false)]);
        assert_eq!(target_names(&config, false), vec!["zeta"]);
    }

    #[test]
    fn test_ar_target_names_append_relays() {
        let config = config_with(&[
            server("a", "relay", true, true),
            server("b", "plain", false, false),
        ]);
        assert_eq!(
            target_names(&config, true),
            vec!["Default", "plain", "relay", "relay (ARR)"]
        );
    }

    #[test]
    fn test_severity_names_use_fallback_and_defaults() {
        let mut config = config_with(&[
            server("a", "first", true, false),
            server("b", "second", false, false),
        ]);
        config
            .severities
            .insert("b".to_string(), vec!["Critical".to_string()]);

        let names = severity_names(&config);
        assert_eq!(
            names,
            vec![
                "Default: High",
                "Default: Medium",
                "Default: Low",
                "first: High",
                "first: Low",
                "first: Medium",
                "second: Critical",
            ]
        );
    }

    #[test]
    fn test_playbook_names_skip_unsynced_servers() {
        let mut config = config_with(&[
            server("a", "first", false, false),
            server("b", "second", false, false),
        ]);
        config
            .playbooks
            .insert("b".to_string(), vec!["local/block_ip".to_string()]);
        assert_eq!(playbook_names(&config), vec!["second: local/block_ip"]);
    }

    #[test]
    fn test_merge_cached_prunes_removed_servers() {
        let servers = config_with(&[server("kept", "kept", false, false)]).servers;
        let mut cached = BTreeMap::new();
        cached.insert("kept".to_string(), vec!["High".to_string()]);
        cached.insert("gone".to_string(), vec!["Low".to_string()]);
        let mut fetched = BTreeMap::new();
        fetched.insert("kept".to_string(), vec!["Critical".to_string()]);

        let merged = merge_cached(&cached, fetched, &servers);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged["kept"], vec!["Critical"]);
    }

    #[test]
    fn test_split_list_fields() {
        let mut search = Map::new();
        search.insert(
            "targets[]".to_string(),
            Value::String("one,two".to_string()),
        );
        search.insert("plain".to_string(), Value::String("a,b".to_string()));
        split_list_fields(&mut search);
        assert_eq!(search["targets[]"], json!(["one", "two"]));
        assert_eq!(search["plain"], json!("a,b"));
    }

    #[test]
    fn test_require_https() {
        assert!(require_https(&server("a", "a", false, false)).is_ok());
        let mut bad = server("a", "a", false, false);
        bad.server = "http://soar.example.com".to_string();
        assert!(require_https(&bad).is_err());
    }
}
