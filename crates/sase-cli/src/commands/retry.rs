//! Retry command - replays the KV-store retry queue.
//!
//! Records land in the queue when a forwarding run or a notable-event
//! action could not reach its SOAR server. Each pass walks the queue,
//! replays every record against its target and deletes only those that
//! went through completely. Records whose container label no longer
//! exists on the server can never succeed and are dropped.

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, info, warn};

use sase_connectors::soar::{ContainerOutcome, INVALID_LABEL_MESSAGE, UNKNOWN_SEVERITY_MESSAGE};
use sase_connectors::splunkd::config_store::load_app_config;
use sase_connectors::splunkd::RETRY_COLLECTION;
use sase_connectors::{SoarClient, SplunkdClient};
use sase_core::config::AppConfig;
use sase_core::forward::cef::{FieldValue, SEVERITY_CHECK_TAG};
use sase_core::forward::{
    build_container, deep_link, forwarding_payload, Artifact, Container, RetryOrigin, RetryRecord,
};

#[derive(Debug, PartialEq, Eq)]
enum Disposition {
    Delete,
    Keep,
}

/// Severities SOAR ships with, used when nothing has been synced yet.
const STOCK_SEVERITIES: [&str; 3] = ["high", "medium", "low"];

/// Replays every queued record once.
pub async fn run_retry(splunkd: &SplunkdClient) -> Result<()> {
    let count = splunkd.kv_count(RETRY_COLLECTION).await?;
    if count == -1 {
        info!("Retry queue collection is still initializing");
        return Ok(());
    }
    if count == 0 {
        info!("Retry queue is empty");
        return Ok(());
    }
    info!(count, "replaying queued records");

    let app_config = load_app_config(splunkd).await?;
    for document in splunkd.kv_list(RETRY_COLLECTION).await? {
        let record: RetryRecord = match serde_json::from_value(document) {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "skipping unreadable retry record");
                continue;
            }
        };
        match replay_record(&app_config, splunkd, &record).await {
            Disposition::Delete => {
                if let Some(key) = &record.key {
                    if let Err(e) = splunkd.kv_delete(RETRY_COLLECTION, key).await {
                        warn!(key = %key, error = %e, "failed to delete replayed record");
                    }
                }
            }
            Disposition::Keep => {
                debug!(key = ?record.key, "record kept for a later pass");
            }
        }
    }
    Ok(())
}

async fn replay_record(
    config: &AppConfig,
    splunkd: &SplunkdClient,
    record: &RetryRecord,
) -> Disposition {
    let Some(server) = config.get_server_config(&record.server_settings) else {
        warn!(
            server = %record.server_settings,
            "target server is no longer configured, keeping record"
        );
        return Disposition::Keep;
    };
    let soar = match SoarClient::new(server, config.verify_certs) {
        Ok(client) => client,
        Err(e) => {
            warn!(error = %e, "could not build SOAR client, keeping record");
            return Disposition::Keep;
        }
    };
    if let Err(e) = soar.verify_server().await {
        warn!(
            server = soar.server(),
            error = %soar.scrub_token(&e.to_string()),
            "server unreachable, keeping record"
        );
        return Disposition::Keep;
    }

    let cached = config
        .severities
        .get(&record.server_settings)
        .cloned()
        .unwrap_or_default();
    match record.origin {
        RetryOrigin::Notable => replay_notable(&soar, record, &cached).await,
        RetryOrigin::EventForwarding => replay_forwarding(&soar, splunkd, record, &cached).await,
    }
}

/// Severity membership check against the synced cache, or the stock set
/// when the cache is empty.
fn severity_exists(severity: &str, cached: &[String]) -> bool {
    if cached.is_empty() {
        STOCK_SEVERITIES.contains(&severity.to_lowercase().as_str())
    } else {
        SoarClient::check_severity(severity, cached)
    }
}

async fn replay_notable(
    soar: &SoarClient,
    record: &RetryRecord,
    cached: &[String],
) -> Disposition {
    let mut container: Container = match serde_json::from_value(record.container.clone()) {
        Ok(container) => container,
        Err(e) => {
            warn!(error = %e, "notable record has no container body, keeping record");
            return Disposition::Keep;
        }
    };
    let valid = severity_exists(&container.severity, cached);
    if !valid {
        container.severity = "high".to_string();
        container.tags.push(SEVERITY_CHECK_TAG.to_string());
    }

    let outcome = match soar.get_or_create_container(&container).await {
        Ok(outcome) => outcome,
        Err(e) => {
            let message = soar.scrub_token(&e.to_string());
            if message.contains(INVALID_LABEL_MESSAGE) {
                warn!(error = %message, "container label no longer exists, dropping record");
                return Disposition::Delete;
            }
            warn!(error = %message, "container post failed, keeping record");
            return Disposition::Keep;
        }
    };

    let mut success = true;
    for artifact in &record.artifacts {
        let mut artifact = artifact.clone();
        artifact.container_id = Some(outcome.id);
        if !valid {
            artifact.coerce_severity();
        }
        if let Err(e) = soar.post_artifact(&artifact).await {
            warn!(
                error = %soar.scrub_token(&e.to_string()),
                "artifact post failed, keeping record"
            );
            success = false;
        }
    }
    if !success {
        return Disposition::Keep;
    }

    if let Some(playbook) = &record.playbook {
        match soar.run_playbook(outcome.id, playbook).await {
            Ok(run_id) => info!(run_id, "started playbook"),
            Err(e) => warn!(
                error = %soar.scrub_token(&e.to_string()),
                "playbook start failed"
            ),
        }
    }
    Disposition::Delete
}

async fn replay_forwarding(
    soar: &SoarClient,
    splunkd: &SplunkdClient,
    record: &RetryRecord,
    cached: &[String],
) -> Disposition {
    let (cef, search) = match forwarding_payload(record) {
        Ok(parts) => parts,
        Err(e) => {
            warn!(error = %e, "malformed forwarding record, keeping record");
            return Disposition::Keep;
        }
    };
    let valid = search
        .severity
        .as_deref()
        .map(|s| severity_exists(s, cached))
        .unwrap_or(true);

    let hostname = splunkd.web_hostname().await.ok();
    let now = Utc::now().timestamp();

    for artifact in &record.artifacts {
        let mut artifact = artifact.clone();
        let event_time = artifact
            .data
            .get("_time")
            .and_then(FieldValue::as_single)
            .map(str::to_string);
        if let Some((key, url)) = deep_link(&search, hostname.as_deref(), event_time.as_deref(), now)
        {
            artifact.cef.insert(key, FieldValue::Single(url));
        }
        if !valid {
            artifact.coerce_severity();
        }

        let mut container_cef = cef.clone();
        let mut container = build_container(&artifact, &mut container_cef, &search);
        if !valid {
            container.severity = "high".to_string();
            container.tags.push(SEVERITY_CHECK_TAG.to_string());
        }

        let outcome = match post_container(soar, container).await {
            Ok(outcome) => outcome,
            Err(disposition) => return disposition,
        };
        artifact.container_id = Some(outcome.id);
        if post_artifact(soar, artifact).await.is_err() {
            return Disposition::Keep;
        }
    }
    Disposition::Delete
}

/// Resolves the container, coercing the severity and retrying once when
/// the server rejects it as unknown.
async fn post_container(
    soar: &SoarClient,
    mut container: Container,
) -> Result<ContainerOutcome, Disposition> {
    match soar.get_or_create_container(&container).await {
        Ok(outcome) => Ok(outcome),
        Err(first) => {
            let message = soar.scrub_token(&first.to_string());
            if message.contains(UNKNOWN_SEVERITY_MESSAGE) {
                container.severity = "high".to_string();
                container.tags.push(SEVERITY_CHECK_TAG.to_string());
                match soar.get_or_create_container(&container).await {
                    Ok(outcome) => return Ok(outcome),
                    Err(second) => {
                        warn!(
                            error = %soar.scrub_token(&second.to_string()),
                            "container post failed after severity coercion, keeping record"
                        );
                        return Err(Disposition::Keep);
                    }
                }
            }
            if message.contains(INVALID_LABEL_MESSAGE) {
                warn!(error = %message, "container label no longer exists, dropping record");
                return Err(Disposition::Delete);
            }
            warn!(error = %message, "container post failed, keeping record");
            Err(Disposition::Keep)
        }
    }
}

/// Posts the artifact, coercing the severity and retrying once when the
/// server rejects it as unknown.
async fn post_artifact(soar: &SoarClient, mut artifact: Artifact) -> Result<(), ()> {
    match soar.post_artifact(&artifact).await {
        Ok(_) => Ok(()),
        Err(first) => {
            let message = soar.scrub_token(&first.to_string());
            if message.contains(UNKNOWN_SEVERITY_MESSAGE) {
                artifact.coerce_severity();
                if soar.post_artifact(&artifact).await.is_ok() {
                    return Ok(());
                }
            }
            warn!(error = %message, "artifact post failed, keeping record");
            Err(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_severity_exists_uses_stock_set_without_cache() {
        assert!(severity_exists("High", &[]));
        assert!(severity_exists("medium", &[]));
        assert!(!severity_exists("critical", &[]));
    }

    #[test]
    fn test_severity_exists_checks_synced_cache() {
        let cached = vec!["Critical".to_string(), "Informational".to_string()];
        assert!(severity_exists("critical", &cached));
        assert!(!severity_exists("high", &cached));
    }

    #[tokio::test]
    async fn test_replay_keeps_record_for_removed_server() {
        let config = AppConfig::default();
        let splunkd = SplunkdClient::new(
            "https://127.0.0.1:8089",
            sase_connectors::SecureString::new("key".to_string()),
        )
        .unwrap();
        let record: RetryRecord = serde_json::from_value(json!({
            "_key": "k1",
            "from": "notable",
            "container": {"name": "n", "description": "", "source_data_identifier": "s",
                          "severity": "high", "sensitivity": "amber"},
            "server_settings": "gone"
        }))
        .unwrap();
        let disposition = replay_record(&config, &splunkd, &record).await;
        assert_eq!(disposition, Disposition::Keep);
    }

    #[test]
    fn test_queued_record_parses_notable_container() {
        let record: RetryRecord = serde_json::from_value(json!({
            "from": "notable",
            "container": {"name": "Login failures", "description": "d",
                          "source_data_identifier": "abc", "severity": "critical",
                          "sensitivity": "amber", "label": "events"},
            "artifacts": [],
            "playbook": "local/investigate",
            "server_settings": "abc"
        }))
        .unwrap();
        let container: Container = serde_json::from_value(record.container.clone()).unwrap();
        assert_eq!(container.severity, "critical");
        assert_eq!(record.playbook.as_deref(), Some("local/investigate"));
    }
}
