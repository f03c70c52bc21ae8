//! Forward command - the alert-action side of event forwarding.
//!
//! Splunk invokes this once per scheduled-search run, handing over the
//! saved search name and the gzipped CSV of results. Each result row
//! becomes one artifact; rows sharing a source data identifier share a
//! container. Whatever cannot be delivered is queued in the KV store
//! for the retry input to replay.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{bail, Result};
use chrono::Utc;
use percent_encoding::percent_decode_str;
use serde_json::json;
use tracing::{info, warn};

use sase_connectors::splunkd::config_store::load_app_config;
use sase_connectors::splunkd::RETRY_COLLECTION;
use sase_connectors::{SoarClient, SplunkdClient};
use sase_core::config::AppConfig;
use sase_core::forward::cef::{
    expand_multivalue, find_patterns, FieldValue, SearchConfig, SEVERITY_CHECK_TAG,
};
use sase_core::forward::{
    build_artifact, build_container, deep_link, load_results, Artifact, Container, RetryOrigin,
    RetryRecord,
};
use sase_core::CoreResult;

/// Prefix on the saved searches the app clones for forwarding.
const SEARCH_PREFIX: &str = "_phantom_app_";

/// Forward command arguments.
#[derive(Debug, Clone)]
pub struct ForwardConfig {
    /// Saved search name as passed by the alert action.
    pub search_name: String,
    /// Path to the gzipped CSV of results.
    pub results: PathBuf,
}

/// One container's worth of events: the CEF document it was built from
/// (kept for the retry queue) plus its artifacts.
struct EventGroup {
    cef: BTreeMap<String, FieldValue>,
    container: Container,
    artifacts: Vec<Artifact>,
}

/// Forwards one search's results to its configured SOAR server.
pub async fn run_forward(config: ForwardConfig, splunkd: &SplunkdClient) -> Result<()> {
    let name = config
        .search_name
        .strip_prefix(SEARCH_PREFIX)
        .unwrap_or(&config.search_name);
    if !config.results.exists() {
        info!(search = name, "No events found, nothing to forward");
        return Ok(());
    }

    let app_config = load_app_config(splunkd).await?;
    let Some(mut search) = find_forwarding_config(&app_config, name) else {
        bail!("No forwarding configuration named \"{name}\"");
    };
    let Some(server) = app_config.get_server_config(&search.target) else {
        bail!("Target server \"{}\" is not configured", search.target);
    };

    let soar = SoarClient::new(server, app_config.verify_certs)?;
    let connected = match soar.verify_server().await {
        Ok(verified) => {
            info!(server = soar.server(), user = %verified.user, "connected to SOAR server");
            true
        }
        Err(e) => {
            warn!(
                error = %soar.scrub_token(&e.to_string()),
                "SOAR server unreachable, queuing events for retry"
            );
            false
        }
    };

    // Saved-search configs pick up the app-wide CIM mapping; data-model
    // configs carry their own field prefixes instead.
    if search.saved_search.is_some() {
        search.add_cim_mapping(&app_config.cim_mapping);
    }

    // Severity names are only validated against the cache the UI synced;
    // an empty cache means forward everything as configured.
    let cached = app_config
        .severities
        .get(&search.target)
        .cloned()
        .unwrap_or_default();
    let severities = (connected && !cached.is_empty()).then_some(cached);

    let fips = match splunkd.server_info().await {
        Ok(server_info) => server_info.fips_mode,
        Err(e) => {
            warn!(error = %e, "could not read server info, assuming FIPS off");
            false
        }
    };
    let hostname = splunkd.web_hostname().await.ok();

    let rows = load_results(&config.results)?;
    let total = rows.len();
    let groups = build_groups(
        rows,
        &search,
        fips,
        severities.as_deref(),
        hostname.as_deref(),
        Utc::now().timestamp(),
    )?;
    info!(
        events = total,
        containers = groups.len(),
        search = %search.name,
        "built forwarding batch"
    );

    let queued = deliver(&soar, &search, groups, connected).await;
    for record in queued {
        let document = serde_json::to_value(&record)?;
        if let Err(e) = splunkd.kv_insert(RETRY_COLLECTION, &document).await {
            warn!(error = %e, "failed to queue retry record");
        }
    }
    Ok(())
}

/// Finds the forwarding configuration whose name matches the saved
/// search, comparing both the stored and the url-decoded form.
fn find_forwarding_config(config: &AppConfig, name: &str) -> Option<SearchConfig> {
    for (_, value) in config.forwarding_configs() {
        let Ok(candidate) = serde_json::from_value::<SearchConfig>(value.clone()) else {
            continue;
        };
        let decoded = percent_decode_str(&candidate.name)
            .decode_utf8_lossy()
            .into_owned();
        if candidate.name == name || decoded == name {
            return Some(candidate);
        }
    }
    None
}

/// Maps result rows onto containers and artifacts. The deep link back
/// into Splunk lands on the first artifact only.
fn build_groups(
    rows: Vec<BTreeMap<String, FieldValue>>,
    search: &SearchConfig,
    fips: bool,
    severities: Option<&[String]>,
    hostname: Option<&str>,
    now_epoch: i64,
) -> CoreResult<BTreeMap<String, EventGroup>> {
    let mut groups: BTreeMap<String, EventGroup> = BTreeMap::new();
    let mut first = true;
    for mut row in rows {
        expand_multivalue(&mut row);
        let cef = find_patterns(&row, search, fips)?;
        let mut artifact = build_artifact(&cef, &row, search, fips)?;

        let coerced = match severities {
            Some(list) if !SoarClient::check_severity(&artifact.severity, list) => {
                artifact.coerce_severity();
                true
            }
            _ => false,
        };

        if first {
            first = false;
            let event_time = row.get("_time").and_then(FieldValue::as_single);
            if let Some((key, url)) = deep_link(search, hostname, event_time, now_epoch) {
                artifact.cef.insert(key, FieldValue::Single(url));
            }
        }

        let group = match groups.entry(artifact.source_data_identifier.clone()) {
            Entry::Vacant(slot) => {
                let mut container_cef = cef.clone();
                let mut container = build_container(&artifact, &mut container_cef, search);
                if coerced {
                    container.severity = "high".to_string();
                    container.tags.push(SEVERITY_CHECK_TAG.to_string());
                }
                slot.insert(EventGroup {
                    cef,
                    container,
                    artifacts: Vec::new(),
                })
            }
            Entry::Occupied(slot) => slot.into_mut(),
        };
        group.artifacts.push(artifact);
    }
    Ok(groups)
}

/// Posts every group, collecting retry records for whatever fails. With
/// the server unreachable everything queues directly.
async fn deliver(
    soar: &SoarClient,
    search: &SearchConfig,
    groups: BTreeMap<String, EventGroup>,
    connected: bool,
) -> Vec<RetryRecord> {
    let mut queued = Vec::new();
    for (_, group) in groups {
        if !connected {
            queued.push(queue_record(search, group.cef, group.artifacts));
            continue;
        }
        match soar.get_or_create_container(&group.container).await {
            Ok(outcome) => {
                info!(
                    container = outcome.id,
                    created = outcome.created,
                    "resolved container"
                );
                let mut failed = Vec::new();
                for mut artifact in group.artifacts {
                    artifact.container_id = Some(outcome.id);
                    if let Err(e) = soar.post_artifact(&artifact).await {
                        warn!(
                            error = %soar.scrub_token(&e.to_string()),
                            "artifact post failed, queuing for retry"
                        );
                        artifact.container_id = None;
                        failed.push(artifact);
                    }
                }
                if !failed.is_empty() {
                    queued.push(queue_record(search, group.cef, failed));
                }
            }
            Err(e) => {
                warn!(
                    error = %soar.scrub_token(&e.to_string()),
                    "container post failed, queuing for retry"
                );
                queued.push(queue_record(search, group.cef, group.artifacts));
            }
        }
    }
    queued
}

fn queue_record(
    search: &SearchConfig,
    cef: BTreeMap<String, FieldValue>,
    artifacts: Vec<Artifact>,
) -> RetryRecord {
    RetryRecord {
        key: None,
        origin: RetryOrigin::EventForwarding,
        container: json!({ "cef": cef, "search_config": search }),
        artifacts,
        playbook: None,
        server_settings: search.target.clone(),
    }
}
