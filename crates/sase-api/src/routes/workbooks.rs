//! Workbook template reconciliation: the sync pass (GET) and the editor
//! push (POST).
//!
//! Both flows verify every configured server, fetch the default server's
//! template set as the canonical base, fold the other servers' sets in,
//! and land the reconciled set back on every reachable server before
//! persisting it with the sync bookkeeping.

use std::collections::{BTreeMap, BTreeSet};

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use sase_connectors::splunkd::config_store;
use sase_connectors::SoarClient;
use sase_core::workbook::reconcile::{
    apply_editor_updates, carry_tombstones, create_unique_workbook, plan_deletes, plan_push,
    remove_purged, EditorAction,
};
use sase_core::workbook::{split_for_push, WorkbookStatus, WorkbookTemplate};

use crate::error::ApiError;
use crate::state::{AppState, SessionKey};

const NO_DEFAULT_SERVER: &str = "No default server selected or enabled. Please set a default \
     server under SOAR Server Configuration and verify that the user is enabled in SOAR.";

const DEFAULT_UNVERIFIED: &str = "Could not verify connection to default server. Please ensure \
     connection to SOAR server is working and that user is enabled.";

/// Creates the workbook routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/workbooks", get(sync_workbooks).post(push_workbooks))
}

#[derive(Debug, Deserialize)]
struct SyncQuery {
    #[serde(default)]
    sync_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EditorPayload {
    #[serde(default)]
    workbooks: BTreeMap<String, EditorEntry>,
    #[serde(default)]
    sync_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EditorEntry {
    #[serde(default)]
    status: Option<WorkbookStatus>,
}

/// Verified connections plus the per-server result map both flows answer.
struct VerifiedServers {
    clients: Vec<(SoarClient, bool)>,
    results: Map<String, Value>,
    default_index: usize,
}

/// GET /soar_export/workbooks
///
/// Pulls templates from every server, reconciles them around the default
/// server's set, pushes the result everywhere and persists it.
async fn sync_workbooks(
    State(state): State<AppState>,
    key: SessionKey,
    Query(query): Query<SyncQuery>,
) -> Result<Json<Value>, ApiError> {
    let splunkd = state.splunkd(&key)?;
    let config = config_store::load_app_config(&splunkd).await?;
    let last_sync = config.workbooks.clone();
    let last_sync_names: BTreeSet<String> = last_sync.keys().cloned().collect();

    info!(servers = config.servers.len(), "Starting workbook sync");

    let mut verified = verify_servers(&config).await?;
    let default_client = &verified.clients[verified.default_index].0;

    let mut merged = default_client
        .fetch_templates_with_phases(&last_sync_names)
        .await
        .map_err(|e| {
            ApiError::BadRequest(format!("Error connecting to default server: {e}"))
        })?;

    for (client, is_default) in &verified.clients {
        if *is_default {
            continue;
        }
        match client.fetch_templates_with_phases(&last_sync_names).await {
            Ok(set) => merge_server_set(&mut merged, set, &last_sync_names)?,
            Err(e) => record_fetch_failure(&mut verified.results, client, &e),
        }
    }
    carry_tombstones(&mut merged, &last_sync);

    let success = push_everywhere(&verified.clients, &merged, &mut verified.results).await;

    config_store::save_workbook_sync(
        &splunkd,
        &merged,
        chrono::Utc::now().timestamp(),
        query.sync_key.as_deref(),
    )
    .await?;

    Ok(Json(json!({
        "success": success,
        "status": 200,
        "value": Value::Object(verified.results),
    })))
}

/// POST /soar_export/workbooks
///
/// Applies the editor's per-workbook decisions (restore, delete, purge)
/// over the stored set, reconciles against the live servers and pushes.
async fn push_workbooks(
    State(state): State<AppState>,
    key: SessionKey,
    Json(payload): Json<EditorPayload>,
) -> Result<Json<Value>, ApiError> {
    let splunkd = state.splunkd(&key)?;
    let config = config_store::load_app_config(&splunkd).await?;
    let last_sync = config.workbooks.clone();
    let last_sync_names: BTreeSet<String> = last_sync.keys().cloned().collect();
    let edits = editor_edits(&payload.workbooks);

    info!(edits = edits.len(), "Applying workbook editor updates");

    let mut verified = verify_servers(&config).await?;
    let default_client = &verified.clients[verified.default_index].0;

    let default_set = default_client
        .fetch_templates_with_phases(&last_sync_names)
        .await
        .map_err(|e| {
            ApiError::BadRequest(format!("Error connecting to default server: {e}"))
        })?;
    let default_names: BTreeSet<String> = default_set.keys().cloned().collect();

    let mut merged = last_sync.clone();
    merge_server_set(&mut merged, default_set, &last_sync_names)?;
    apply_editor_updates(&mut merged, &last_sync, &edits, &default_names);

    for (client, is_default) in &verified.clients {
        if *is_default {
            continue;
        }
        match client.fetch_templates_with_phases(&last_sync_names).await {
            Ok(set) => merge_server_set(&mut merged, set, &last_sync_names)?,
            Err(e) => record_fetch_failure(&mut verified.results, client, &e),
        }
    }

    let success = push_everywhere(&verified.clients, &merged, &mut verified.results).await;

    remove_purged(&mut merged, &edits);
    config_store::save_workbook_sync(
        &splunkd,
        &merged,
        chrono::Utc::now().timestamp(),
        payload.sync_key.as_deref(),
    )
    .await?;

    Ok(Json(json!({
        "success": success,
        "status": 200,
        "value": Value::Object(verified.results),
    })))
}

// ---- helpers ------------------------------------------------------------

/// Verifies the connection to every configured server. Fails the whole
/// request when no default server exists or the default one cannot be
/// reached; other servers just get a failure entry in the result map.
async fn verify_servers(config: &sase_core::AppConfig) -> Result<VerifiedServers, ApiError> {
    let mut clients = Vec::new();
    let mut results = Map::new();

    for (config_id, server) in &config.servers {
        let outcome = match SoarClient::new(server, config.verify_certs) {
            Ok(client) => match client.verify_server().await {
                Ok(_) => {
                    clients.push((client, server.default));
                    json!({"verified_connection": true})
                }
                Err(e) => {
                    let message = client.scrub_token(&e.to_string());
                    warn!(config_id = %config_id, error = %message, "Server verification failed");
                    json!({"verified_connection": false, "error_message": message})
                }
            },
            Err(e) => {
                warn!(config_id = %config_id, error = %e, "Could not build server client");
                json!({"verified_connection": false, "error_message": e.to_string()})
            }
        };
        results.insert(config_id.clone(), outcome);
    }

    if !config.servers.values().any(|s| s.default) {
        return Err(ApiError::BadRequest(NO_DEFAULT_SERVER.to_string()));
    }
    let Some(default_index) = clients.iter().position(|(_, is_default)| *is_default) else {
        return Err(ApiError::BadRequest(DEFAULT_UNVERIFIED.to_string()));
    };

    Ok(VerifiedServers {
        clients,
        results,
        default_index,
    })
}

/// Folds one server's template set into the canonical map, renaming on
/// content collisions.
fn merge_server_set(
    merged: &mut BTreeMap<String, WorkbookTemplate>,
    incoming: BTreeMap<String, WorkbookTemplate>,
    last_sync_names: &BTreeSet<String>,
) -> Result<(), ApiError> {
    for (name, template) in incoming {
        let existing_names: BTreeSet<String> = merged.keys().cloned().collect();
        let original = merged.get(&name).cloned();
        if let Some((key, entry)) = create_unique_workbook(
            original.as_ref(),
            Some(template),
            &existing_names,
            last_sync_names,
        )? {
            merged.insert(key, entry);
        }
    }
    Ok(())
}

fn record_fetch_failure(
    results: &mut Map<String, Value>,
    client: &SoarClient,
    error: &sase_connectors::ConnectorError,
) {
    let message = client.scrub_token(&error.to_string());
    warn!(config_id = %client.config_id(), error = %message, "Template fetch failed");
    results.insert(
        client.config_id().to_string(),
        json!({"verified_connection": true, "success": false, "error_message": message}),
    );
}

/// Lands the reconciled set on every verified server, recording the
/// per-server outcome. Answers whether every push fully succeeded.
async fn push_everywhere(
    clients: &[(SoarClient, bool)],
    merged: &BTreeMap<String, WorkbookTemplate>,
    results: &mut Map<String, Value>,
) -> bool {
    let (deleted, live) = split_for_push(merged);
    let mut all_succeeded = true;

    for (client, _) in clients {
        let mut errors: Vec<String> = Vec::new();
        match client.template_map().await {
            Ok(server_templates) => {
                let delete_plan = plan_deletes(&deleted, client.config_id(), &server_templates);
                errors.extend(delete_plan.errors.iter().cloned());
                match client.delete_templates(&delete_plan).await {
                    Ok(push_errors) => errors.extend(push_errors),
                    Err(e) => errors.push(client.scrub_token(&e.to_string())),
                }

                match plan_push(&live, client.config_id(), &server_templates) {
                    Ok(plan) => match client.push_templates(plan).await {
                        Ok(push_errors) => errors.extend(push_errors),
                        Err(e) => errors.push(client.scrub_token(&e.to_string())),
                    },
                    Err(e) => errors.push(e.to_string()),
                }
            }
            Err(e) => errors.push(client.scrub_token(&e.to_string())),
        }

        let succeeded = errors.is_empty();
        all_succeeded &= succeeded;
        let entry = results
            .entry(client.config_id().to_string())
            .or_insert_with(|| json!({"verified_connection": true}));
        if let Value::Object(map) = entry {
            map.insert("success".to_string(), Value::Bool(succeeded));
            if !succeeded {
                map.insert("errors".to_string(), json!(errors));
            }
        }
    }
    all_succeeded
}

fn editor_edits(
    workbooks: &BTreeMap<String, EditorEntry>,
) -> BTreeMap<String, EditorAction> {
    workbooks
        .iter()
        .filter_map(|(name, entry)| {
            EditorAction::from_status(entry.status).map(|action| (name.clone(), action))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_editor_edits_map_statuses() {
        let payload: EditorPayload = serde_json::from_value(json!({
            "workbooks": {
                "keep me": {"status": "published"},
                "drop me": {"status": "deleted"},
                "purge me": {"status": "purge"},
                "untouched": {},
            }
        }))
        .unwrap();

        let edits = editor_edits(&payload.workbooks);
        assert_eq!(
            edits.get("keep me"),
            Some(&EditorAction::Keep(WorkbookStatus::Published))
        );
        assert_eq!(edits.get("drop me"), Some(&EditorAction::Delete));
        assert_eq!(edits.get("purge me"), Some(&EditorAction::Purge));
        assert!(!edits.contains_key("untouched"));
    }

    #[test]
    fn test_merge_server_set_renames_conflicts() {
        fn template(name: &str, description: &str) -> WorkbookTemplate {
            WorkbookTemplate {
                name: name.to_string(),
                id: None,
                description: description.to_string(),
                is_default: false,
                is_note_required: false,
                status: Some(WorkbookStatus::Published),
                prev_state: None,
                original_name: None,
                origins: Vec::new(),
                phases: Vec::new(),
            }
        }

        let mut merged = BTreeMap::new();
        merged.insert("triage".to_string(), template("triage", "canonical"));

        let mut incoming = BTreeMap::new();
        incoming.insert("triage".to_string(), template("triage", "different"));

        merge_server_set(&mut merged, incoming, &BTreeSet::new()).unwrap();
        assert_eq!(merged.len(), 2);
        // The conflicting newcomer comes in tombstoned under a new name.
        let renamed = merged.get("triage_1").unwrap();
        assert_eq!(renamed.status, Some(WorkbookStatus::Deleted));
        assert_eq!(renamed.original_name.as_deref(), Some("triage"));
    }
}
