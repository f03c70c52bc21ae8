//! Lookup editor endpoints: contents, saving, backups, and metadata.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use axum::{
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{Local, TimeZone};
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use sase_connectors::splunkd::LookupTableFile;
use sase_connectors::{ConnectorError, SplunkdClient};
use sase_core::lookup::{
    format_bytes, is_file_name_valid, is_supported_lookup, kv_documents_to_rows, read_csv_lookup,
    resolve_read_path, rows_to_csv, BackupManager, BackupSummary, LookupScope, NOBODY,
};

use crate::error::{envelope, ApiError};
use crate::state::{AppState, SessionKey};

/// KV collection holding per-lookup backup size ceilings.
const BACKUP_DETAILS_COLLECTION: &str = "backup_details_for_lookups";

/// Free-disk floor, in percent, under which backups are refused.
const MIN_FREE_DISK_PERCENT: f64 = 10.0;

/// Worker threads for the bulk metadata listing.
const METADATA_WORKERS: usize = 20;

/// Creates lookup editor routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/lookup_contents",
            get(get_lookup_contents).post(save_lookup_contents),
        )
        .route("/lookup_as_file", get(get_lookup_as_file))
        .route("/lookup_backups", get(get_lookup_backups))
        .route("/lookup_backups_size", get(get_lookup_backups_size))
        .route("/check_backup_availability", post(check_backup_availability))
        .route("/remove_lookup_backup", post(remove_lookup_backup))
        .route(
            "/remove_all_lookup_backups",
            post(remove_all_lookup_backups),
        )
        .route("/lookup_metadata", get(get_lookup_metadata))
        .route("/lookup_file_sizes", get(get_lookup_file_sizes))
}

#[derive(Debug, Deserialize)]
struct ContentsQuery {
    lookup_file: String,
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default)]
    owner: Option<String>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    lookup_type: Option<String>,
    #[serde(default)]
    header_only: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LookupQuery {
    #[serde(default)]
    lookup_file: Option<String>,
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default)]
    owner: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SavePayload {
    lookup_file: String,
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default)]
    owner: Option<String>,
    contents: Value,
    #[serde(default = "default_true")]
    backup: bool,
}

#[derive(Debug, Deserialize)]
struct RemoveBackupPayload {
    #[serde(default)]
    lookup_file: Option<String>,
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default)]
    owner: Option<String>,
    #[serde(default)]
    backup: Option<String>,
}

fn default_true() -> bool {
    true
}

/// GET /lookup_editor/lookup_contents
async fn get_lookup_contents(
    State(state): State<AppState>,
    key: SessionKey,
    Query(query): Query<ContentsQuery>,
) -> Result<Json<Value>, ApiError> {
    let splunkd = state.splunkd(&key)?;

    let Some(owner) = query.owner.as_deref() else {
        return Err(ApiError::PermissionDenied("Unauthorized".to_string()));
    };
    if let Some(version) = query.version.as_deref() {
        if !version_is_numeric(version) {
            return Err(ApiError::PermissionDenied("Unauthorized".to_string()));
        }
    }
    validate_owner(&splunkd, owner).await?;

    let lookup_type = match query.lookup_type.as_deref() {
        Some(t) if !t.is_empty() => t.to_string(),
        _ => {
            warn!(
                lookup_file = %query.lookup_file,
                "No type provided for the lookup, defaulting to CSV"
            );
            "csv".to_string()
        }
    };
    let header_only = matches!(query.header_only.as_deref(), Some("1") | Some("true"));

    let scope = LookupScope::new(
        &query.lookup_file,
        query.namespace.as_deref(),
        Some(owner),
    );

    info!(
        namespace = %scope.namespace,
        lookup = %scope.name,
        lookup_type = %lookup_type,
        owner = %scope.owner,
        "Retrieving lookup contents"
    );

    match lookup_type.as_str() {
        "kv" => {
            let rows = kv_lookup_rows(&splunkd, &scope).await?;
            Ok(envelope(rows))
        }
        "csv" => {
            let live = resolve_live_path(&splunkd, &state, &scope).await?;
            let backup_directory = BackupManager::backup_directory(&scope, &live)?;
            let read_path = resolve_read_path(
                &scope,
                &state.splunk_home,
                &live,
                &backup_directory,
                query.version.as_deref(),
            );
            let rows = read_csv_lookup(&read_path, header_only)?;
            Ok(envelope(rows))
        }
        other => {
            warn!(lookup_type = other, "Lookup file type is not recognized");
            Err(ApiError::UnsupportedType(
                "Lookup file type is not recognized".to_string(),
            ))
        }
    }
}

/// GET /lookup_editor/lookup_as_file
async fn get_lookup_as_file(
    State(state): State<AppState>,
    key: SessionKey,
    Query(query): Query<ContentsQuery>,
) -> Result<Response, ApiError> {
    let splunkd = state.splunkd(&key)?;
    let scope = LookupScope::new(
        &query.lookup_file,
        query.namespace.as_deref(),
        query.owner.as_deref(),
    );
    let lookup_type = query.lookup_type.as_deref().unwrap_or("csv");

    info!(
        namespace = %scope.namespace,
        lookup = %scope.name,
        lookup_type = %lookup_type,
        "Exporting lookup"
    );

    let csv_data = if lookup_type == "csv" {
        let live = resolve_live_path(&splunkd, &state, &scope).await?;
        fs::read(&live).map_err(|_| ApiError::NotFound("Unable to find the lookup".to_string()))?
    } else {
        let rows = kv_lookup_rows(&splunkd, &scope).await?;
        rows_to_csv(&rows)?
    };

    let filename = if scope.name.ends_with(".csv") {
        scope.name.clone()
    } else {
        format!("{}.csv", scope.name)
    };

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        csv_data,
    )
        .into_response())
}

/// POST /lookup_editor/lookup_contents
async fn save_lookup_contents(
    State(state): State<AppState>,
    key: SessionKey,
    Json(payload): Json<SavePayload>,
) -> Result<Json<Value>, ApiError> {
    let splunkd = state.splunkd(&key)?;

    info!(lookup_file = %payload.lookup_file, "Saving lookup contents");

    if Path::new(&payload.lookup_file).extension().and_then(|e| e.to_str()) != Some("csv") {
        return Err(ApiError::PermissionDenied("Invalid file".to_string()));
    }
    if payload.contents.to_string().contains(":exsl") {
        return Err(ApiError::PermissionDenied("Invalid content".to_string()));
    }
    if !is_file_name_valid(&payload.lookup_file) {
        return Err(ApiError::BadRequest("Lookup name is invalid".to_string()));
    }

    let rows = parse_rows(&payload.contents)?;
    let scope = LookupScope::new(
        &payload.lookup_file,
        payload.namespace.as_deref(),
        payload.owner.as_deref(),
    );

    let existing = splunkd
        .get_lookup_table(&scope.owner, &scope.namespace, &scope.name)
        .await?;
    let live = existing
        .as_ref()
        .filter(|e| !e.path.is_empty())
        .map(|e| PathBuf::from(&e.path))
        .unwrap_or_else(|| scope.file_path(&state.splunk_home));

    if payload.backup && live.exists() {
        ensure_backup_capacity(&state, &splunkd, &scope).await?;
        BackupManager::backup_lookup_file(&scope, &live, None);
    }

    let staged = stage_contents(&state, &rows)?;

    if existing.is_some() {
        // App lookups always update through the shared endpoint.
        let update_owner = if scope.is_user_scoped()
            && live.starts_with(state.splunk_home.join("etc").join("users"))
        {
            scope.owner.as_str()
        } else {
            NOBODY
        };
        splunkd
            .update_lookup_table(update_owner, &scope.namespace, &scope.name, &staged)
            .await?;
    } else {
        splunkd
            .create_lookup_table(&scope.owner, &scope.namespace, &scope.name, &staged)
            .await?;
    }

    splunkd
        .notify_lookup_update(&scope.namespace, &scope.name)
        .await;

    info!(
        namespace = %scope.namespace,
        lookup = %scope.name,
        path = %live.display(),
        "Lookup saved"
    );

    Ok(envelope(live.display().to_string()))
}

/// GET /lookup_editor/lookup_backups
async fn get_lookup_backups(
    State(state): State<AppState>,
    key: SessionKey,
    Query(query): Query<ContentsQuery>,
) -> Result<Json<Value>, ApiError> {
    let splunkd = state.splunkd(&key)?;
    let scope = LookupScope::new(
        &query.lookup_file,
        query.namespace.as_deref(),
        query.owner.as_deref(),
    );
    let live = resolve_live_path(&splunkd, &state, &scope).await?;
    let directory = BackupManager::backup_directory(&scope, &live)?;
    let backups = BackupManager::list_backups(&directory)?;

    let listing: Vec<Value> = backups
        .iter()
        .filter(|b| b.size > 0)
        .map(|b| {
            json!({
                "time": b.name,
                "time_readable": format_backup_time(b.time),
                "size": b.size,
                "size_readable": format_bytes(b.size, 2),
            })
        })
        .collect();

    Ok(envelope(listing))
}

/// GET /lookup_editor/lookup_backups_size
async fn get_lookup_backups_size(
    State(state): State<AppState>,
    key: SessionKey,
    Query(query): Query<ContentsQuery>,
) -> Result<Json<Value>, ApiError> {
    let splunkd = state.splunkd(&key)?;
    let scope = LookupScope::new(
        &query.lookup_file,
        query.namespace.as_deref(),
        query.owner.as_deref(),
    );
    let summary = backup_summary(&splunkd, &state, &scope).await?;
    Ok(envelope(json!([
        summary.total_size,
        summary.most_recent,
        summary.count
    ])))
}

/// POST /lookup_editor/check_backup_availability
async fn check_backup_availability(
    State(state): State<AppState>,
    key: SessionKey,
    Json(payload): Json<RemoveBackupPayload>,
) -> Result<Json<Value>, ApiError> {
    let splunkd = state.splunkd(&key)?;
    let scope = LookupScope::new(
        payload.lookup_file.as_deref().unwrap_or_default(),
        payload.namespace.as_deref(),
        payload.owner.as_deref(),
    );
    ensure_backup_capacity(&state, &splunkd, &scope).await?;
    Ok(envelope("Backup space available"))
}

/// POST /lookup_editor/remove_lookup_backup
async fn remove_lookup_backup(
    State(state): State<AppState>,
    key: SessionKey,
    Json(payload): Json<RemoveBackupPayload>,
) -> Result<Json<Value>, ApiError> {
    let (Some(lookup_file), Some(namespace), Some(owner), Some(backup)) = (
        payload.lookup_file.as_deref(),
        payload.namespace.as_deref(),
        payload.owner.as_deref(),
        payload.backup.as_deref(),
    ) else {
        return Err(ApiError::NotFound("Backup not found".to_string()));
    };

    let splunkd = state.splunkd(&key)?;
    let scope = LookupScope::new(lookup_file, Some(namespace), Some(owner));
    let live = resolve_live_path(&splunkd, &state, &scope).await?;
    let directory = BackupManager::backup_directory(&scope, &live)?;

    info!(directory = %directory.display(), backup, "Deleting lookup backup");

    match BackupManager::delete_backup(&directory, backup) {
        Ok(()) => Ok(envelope("Deleted backup")),
        Err(sase_core::CoreError::NotFound(_)) => {
            Err(ApiError::NotFound("Backup not found".to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

/// POST /lookup_editor/remove_all_lookup_backups
async fn remove_all_lookup_backups(
    State(state): State<AppState>,
    key: SessionKey,
    Json(payload): Json<RemoveBackupPayload>,
) -> Result<Json<Value>, ApiError> {
    let splunkd = state.splunkd(&key)?;
    let scope = LookupScope::new(
        payload.lookup_file.as_deref().unwrap_or_default(),
        payload.namespace.as_deref(),
        payload.owner.as_deref(),
    );
    let live = resolve_live_path(&splunkd, &state, &scope).await?;
    let directory = BackupManager::backup_directory(&scope, &live)?;

    if BackupManager::delete_all_backups(&directory)? {
        Ok(envelope("Deleted backup"))
    } else {
        Err(ApiError::NotFound("Backup not found".to_string()))
    }
}

/// GET /lookup_editor/lookup_metadata
///
/// With a `lookup_file` parameter, answers backup stats for that one
/// lookup; without one, lists every supported lookup with its stats.
async fn get_lookup_metadata(
    State(state): State<AppState>,
    key: SessionKey,
    Query(query): Query<LookupQuery>,
) -> Result<Json<Value>, ApiError> {
    let splunkd = state.splunkd(&key)?;

    if let Some(lookup_file) = query.lookup_file.as_deref() {
        let scope = LookupScope::new(lookup_file, query.namespace.as_deref(), query.owner.as_deref());
        let payload = match backup_summary(&splunkd, &state, &scope).await {
            Ok(summary) => json!({
                "lookup_file": lookup_file,
                "backup_count": summary.count,
                "backup_size": summary.total_size,
                "backup_size_readable": format_bytes(summary.total_size, 2),
            }),
            Err(e) => {
                warn!(lookup_file, error = %e, "Could not compute backup stats");
                json!({
                    "lookup_file": lookup_file,
                    "backup_count": 0,
                    "backup_size_readable": "0 Bytes",
                })
            }
        };
        return Ok(envelope(payload));
    }

    let entries: Vec<LookupTableFile> = splunkd
        .list_lookup_tables("-", "-")
        .await?
        .into_iter()
        .filter(|e| is_supported_lookup(&e.name))
        .collect();

    info!(count = entries.len(), workers = METADATA_WORKERS, "Computing bulk lookup metadata");

    let splunk_home = state.splunk_home.as_ref().clone();
    let listing = tokio::task::spawn_blocking(move || bulk_metadata(&splunk_home, entries))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(envelope(listing))
}

/// GET /lookup_editor/lookup_file_sizes
async fn get_lookup_file_sizes(
    State(state): State<AppState>,
    key: SessionKey,
) -> Result<Json<Value>, ApiError> {
    let splunkd = state.splunkd(&key)?;
    let entries = splunkd.list_lookup_tables("-", "-").await?;

    let mut listing = Vec::with_capacity(entries.len());
    for entry in entries {
        if !is_supported_lookup(&entry.name) {
            continue;
        }
        let size = fs::metadata(&entry.path).map(|m| m.len()).unwrap_or(0);
        listing.push(json!({
            "name": entry.name,
            "author": entry.author,
            "app": entry.namespace,
            "namespace": entry.namespace,
            "owner": entry.owner,
            "endpoint_owner": endpoint_owner(&entry),
            "can_write": entry.can_write,
            "sharing": entry.sharing,
            "removable": entry.removable,
            "info": entry.path,
            "size": size,
            "size_readable": format_bytes(size, 2),
            "date": entry.updated,
        }));
    }

    Ok(envelope(listing))
}

// ---- helpers ------------------------------------------------------------

fn version_is_numeric(version: &str) -> bool {
    static NUMERIC: OnceLock<Option<Regex>> = OnceLock::new();
    NUMERIC
        .get_or_init(|| Regex::new(r"^[0-9]+(\.[0-9]+)?$").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(version))
}

/// The owner must be `nobody` or an actual Splunk user.
async fn validate_owner(splunkd: &SplunkdClient, owner: &str) -> Result<(), ApiError> {
    let owner = sase_core::lookup::resolver::sanitize_component(owner);
    if owner.eq_ignore_ascii_case(NOBODY) {
        return Ok(());
    }
    let users = splunkd.list_users().await.map_err(|_| {
        ApiError::PermissionDenied("Unauthorized".to_string())
    })?;
    if users.iter().any(|u| u.eq_ignore_ascii_case(&owner)) {
        Ok(())
    } else {
        Err(ApiError::PermissionDenied("Unauthorized".to_string()))
    }
}

/// Where the lookup lives on disk: splunkd's registered location, or the
/// path a new file with this scope would get.
async fn resolve_live_path(
    splunkd: &SplunkdClient,
    state: &AppState,
    scope: &LookupScope,
) -> Result<PathBuf, ApiError> {
    let entry = splunkd
        .get_lookup_table(&scope.owner, &scope.namespace, &scope.name)
        .await?;
    Ok(entry
        .filter(|e| !e.path.is_empty())
        .map(|e| PathBuf::from(e.path))
        .unwrap_or_else(|| scope.file_path(&state.splunk_home)))
}

async fn backup_summary(
    splunkd: &SplunkdClient,
    state: &AppState,
    scope: &LookupScope,
) -> Result<BackupSummary, ApiError> {
    let live = resolve_live_path(splunkd, state, scope).await?;
    let directory = BackupManager::backup_directory(scope, &live)?;
    Ok(BackupManager::summarize(&directory)?)
}

/// Reads a KV store lookup into tabular rows, header first.
async fn kv_lookup_rows(
    splunkd: &SplunkdClient,
    scope: &LookupScope,
) -> Result<Vec<Vec<String>>, ApiError> {
    let mut fields = splunkd
        .kv_collection_fields(&scope.namespace, &scope.name)
        .await?
        .ok_or_else(|| ApiError::NotFound("Unable to find the lookup".to_string()))?;

    // No typed fields on the collection; fall back to the transforms stanza.
    if fields.len() <= 1 {
        if let Some(transform_fields) = splunkd
            .transform_fields_for_collection(&scope.namespace, &scope.name)
            .await?
        {
            fields = transform_fields;
        }
    }
    if fields.is_empty() {
        fields.push("_key".to_string());
    }

    let documents = splunkd
        .kv_lookup_documents(&scope.owner, &scope.namespace, &scope.name)
        .await?;
    Ok(kv_documents_to_rows(&fields, &documents))
}

fn parse_rows(contents: &Value) -> Result<Vec<Vec<String>>, ApiError> {
    match contents {
        Value::String(raw) => Ok(serde_json::from_str(raw)?),
        other => Ok(serde_json::from_value(other.clone())?),
    }
}

/// Writes the rows to a staging file splunkd can import from.
fn stage_contents(state: &AppState, rows: &[Vec<String>]) -> Result<String, ApiError> {
    let staging_directory = state
        .splunk_home
        .join("var")
        .join("run")
        .join("splunk")
        .join("lookup_tmp");
    fs::create_dir_all(&staging_directory).map_err(sase_core::CoreError::from)?;

    let staged = staging_directory.join(format!("lookup_{}.csv", Uuid::new_v4()));
    fs::write(&staged, rows_to_csv(rows)?).map_err(sase_core::CoreError::from)?;
    Ok(staged.display().to_string())
}

/// Refuses a backup when disk is nearly full or the per-lookup ceiling
/// from the backup-details collection is exceeded.
async fn ensure_backup_capacity(
    state: &AppState,
    splunkd: &SplunkdClient,
    scope: &LookupScope,
) -> Result<(), ApiError> {
    let free = free_disk_percent(&state.splunk_home).unwrap_or(100.0);
    if free <= MIN_FREE_DISK_PERCENT {
        return Err(ApiError::LowDiskSpace(
            "Unable to create backup. Available disk space is at 10%.".to_string(),
        ));
    }

    let documents = match splunkd
        .kv_lookup_documents(NOBODY, "lookup_editor", BACKUP_DETAILS_COLLECTION)
        .await
    {
        Ok(documents) => documents,
        // No ceiling collection configured.
        Err(ConnectorError::NotFound(_)) => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    for document in documents {
        let matches = document.get("lookup_file").and_then(Value::as_str) == Some(&scope.name)
            && document.get("namespace").and_then(Value::as_str) == Some(&scope.namespace);
        if !matches {
            continue;
        }
        let limit = document.get("size_limit").and_then(Value::as_u64);
        let current = document.get("backup_size").and_then(Value::as_u64);
        if let (Some(limit), Some(current)) = (limit, current) {
            if current > limit {
                info!(lookup = %scope.name, limit, "Backup limit exceeded");
                return Err(ApiError::Internal(format!(
                    "Unable to create backup. You have reached the backup size limit of {}",
                    format_bytes(limit, 0)
                )));
            }
        }
    }
    Ok(())
}

/// Free space of the volume holding `path`, in percent.
fn free_disk_percent(path: &Path) -> Option<f64> {
    let disks = sysinfo::Disks::new_with_refreshed_list();
    let disk = disks
        .list()
        .iter()
        .filter(|d| path.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len())?;
    if disk.total_space() == 0 {
        return None;
    }
    Some(disk.available_space() as f64 / disk.total_space() as f64 * 100.0)
}

fn format_backup_time(epoch: f64) -> String {
    Local
        .timestamp_opt(epoch as i64, 0)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default()
}

fn endpoint_owner(entry: &LookupTableFile) -> &str {
    if entry.sharing == "global" || entry.sharing == "app" {
        NOBODY
    } else {
        &entry.owner
    }
}

/// Computes backup stats for every listed lookup across a fixed pool of
/// worker threads. Thread `i` takes entries `i`, `i + N`, `i + 2N`, ...
/// into its own list; the lists are joined in worker order.
fn bulk_metadata(splunk_home: &Path, entries: Vec<LookupTableFile>) -> Vec<Value> {
    let mut buckets: Vec<Vec<Value>> = Vec::with_capacity(METADATA_WORKERS);

    std::thread::scope(|scope| {
        let mut handles = Vec::with_capacity(METADATA_WORKERS);
        for worker in 0..METADATA_WORKERS {
            let entries = &entries;
            handles.push(scope.spawn(move || {
                let mut chunk_result = Vec::new();
                for entry in entries.iter().skip(worker).step_by(METADATA_WORKERS) {
                    chunk_result.push(metadata_row(splunk_home, entry));
                }
                chunk_result
            }));
        }
        for handle in handles {
            buckets.push(handle.join().unwrap_or_default());
        }
    });

    buckets.into_iter().flatten().collect()
}

fn metadata_row(splunk_home: &Path, entry: &LookupTableFile) -> Value {
    let endpoint_owner = endpoint_owner(entry).to_string();
    let scope = LookupScope::new(&entry.name, Some(&entry.namespace), Some(&endpoint_owner));
    let live = if entry.path.is_empty() {
        scope.file_path(splunk_home)
    } else {
        PathBuf::from(&entry.path)
    };

    let summary = BackupManager::backup_directory(&scope, &live)
        .and_then(|directory| BackupManager::summarize(&directory))
        .unwrap_or_default();

    json!({
        "name": entry.name,
        "author": entry.author,
        "owner": entry.owner,
        "app": entry.namespace,
        "endpoint_owner": endpoint_owner,
        "backup_size": summary.total_size,
        "backup_size_readable": format_bytes(summary.total_size, 2),
        "recent_backup": summary.most_recent,
        "backup_count": summary.count,
        "can_write": entry.can_write,
        "sharing": entry.sharing,
        "updated": entry.updated,
        "removable": entry.removable,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(name: &str, sharing: &str, owner: &str) -> LookupTableFile {
        LookupTableFile {
            name: name.to_string(),
            author: "admin".to_string(),
            path: String::new(),
            namespace: "search".to_string(),
            owner: owner.to_string(),
            sharing: sharing.to_string(),
            updated: "2026-01-10T00:00:00+00:00".to_string(),
            can_write: true,
            removable: true,
        }
    }

    #[test]
    fn test_version_validation() {
        assert!(version_is_numeric("1692616243.0"));
        assert!(version_is_numeric("42"));
        assert!(!version_is_numeric("../../etc/passwd"));
        assert!(!version_is_numeric("1e9"));
        assert!(!version_is_numeric(""));
    }

    #[test]
    fn test_endpoint_owner_follows_sharing() {
        assert_eq!(endpoint_owner(&table("a.csv", "global", "luke")), "nobody");
        assert_eq!(endpoint_owner(&table("a.csv", "app", "luke")), "nobody");
        assert_eq!(endpoint_owner(&table("a.csv", "user", "luke")), "luke");
    }

    #[test]
    fn test_parse_rows_accepts_string_and_array() {
        let from_string = parse_rows(&Value::String("[[\"a\",\"b\"]]".to_string())).unwrap();
        assert_eq!(from_string, vec![vec!["a".to_string(), "b".to_string()]]);

        let from_array = parse_rows(&json!([["a", "b"]])).unwrap();
        assert_eq!(from_array, from_string);
    }

    #[test]
    fn test_bulk_metadata_preserves_stride_order() {
        let home = tempfile::tempdir().unwrap();
        let entries: Vec<LookupTableFile> = (0..45)
            .map(|i| {
                let mut entry = table(&format!("lookup_{i:02}.csv"), "app", "nobody");
                entry.path = home
                    .path()
                    .join("lookups")
                    .join(&entry.name)
                    .display()
                    .to_string();
                entry
            })
            .collect();

        let rows = bulk_metadata(home.path(), entries);
        assert_eq!(rows.len(), 45);
        // Worker 0 owns entries 0, 20, 40; its bucket lands first.
        assert_eq!(rows[0]["name"], "lookup_00.csv");
        assert_eq!(rows[1]["name"], "lookup_20.csv");
        assert_eq!(rows[2]["name"], "lookup_40.csv");
    }
}
