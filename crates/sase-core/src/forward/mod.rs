//! Event forwarding: turning scheduled-search results into SOAR containers
//! and artifacts.
//!
//! The pipeline reads one gzipped CSV of results, expands multivalue
//! fields, maps each row to a CEF document ([`cef::find_patterns`]) and
//! builds an artifact per row. Rows sharing a source-data identifier land
//! in the same container. When the target server is unreachable the built
//! containers and artifacts are queued in the KV store as a
//! [`RetryRecord`] instead.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use flate2::read::GzDecoder;
use percent_encoding::{percent_decode_str, utf8_percent_encode, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, CoreResult};

pub mod cef;
pub mod identity;

use cef::{
    FieldValue, SearchConfig, DEFAULT_SENSITIVITY, DEFAULT_SEVERITY, NAME_OVERRIDE_KEY,
    SENSITIVITY_KEY, SEVERITY_KEY, TAGS_KEY,
};
use identity::event_identity;

/// An artifact as posted to `/rest/artifact`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Artifact {
    pub name: String,
    pub label: String,
    pub description: String,
    pub source_data_identifier: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub severity: String,
    pub cef: BTreeMap<String, FieldValue>,
    pub cef_types: BTreeMap<String, Vec<String>>,
    /// The raw result row, minus internal fields.
    pub data: BTreeMap<String, FieldValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl Artifact {
    /// Marks the artifact as carrying an unrecognized severity: forced to
    /// high with the review tag attached.
    pub fn coerce_severity(&mut self) {
        self.severity = "high".to_string();
        self.tags = vec![cef::SEVERITY_CHECK_TAG.to_string()];
    }
}

/// A container as posted to `/rest/container`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Container {
    pub name: String,
    pub description: String,
    pub source_data_identifier: String,
    pub severity: String,
    pub sensitivity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Where a queued retry record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetryOrigin {
    #[serde(rename = "notable")]
    Notable,
    #[serde(rename = "event forwarding")]
    EventForwarding,
}

/// One KV-store record of work to replay against a SOAR server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryRecord {
    #[serde(rename = "_key", default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(rename = "from")]
    pub origin: RetryOrigin,
    /// For event forwarding: `{cef, search_config}`; for notables: the
    /// container body itself.
    pub container: Value,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playbook: Option<String>,
    /// Config id of the target server.
    pub server_settings: String,
}

/// Streams rows out of a gzipped CSV of search results. The first row is
/// the header; each subsequent row becomes a field map.
pub fn load_results(path: &Path) -> CoreResult<Vec<BTreeMap<String, FieldValue>>> {
    let file = File::open(path)?;
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(BufReader::new(GzDecoder::new(file)));
    let headers = reader.headers()?.clone();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let row: BTreeMap<String, FieldValue> = headers
            .iter()
            .zip(record.iter())
            .map(|(h, v)| (h.to_string(), FieldValue::from(v)))
            .collect();
        rows.push(row);
    }
    Ok(rows)
}

fn percent_decoded(s: &str) -> String {
    percent_decode_str(s).decode_utf8_lossy().into_owned()
}

/// Builds the artifact for one result row from its CEF document.
pub fn build_artifact(
    cef: &BTreeMap<String, FieldValue>,
    data: &BTreeMap<String, FieldValue>,
    search: &SearchConfig,
    fips: bool,
) -> CoreResult<Artifact> {
    let identity = event_identity(cef, &search.pk_fields.fields(), fips)?;

    let mut fields = cef.clone();
    let severity = fields
        .remove(SEVERITY_KEY)
        .map(|v| v.joined())
        .unwrap_or_else(|| DEFAULT_SEVERITY.to_string());
    fields.remove(SENSITIVITY_KEY);
    let name = fields
        .remove(NAME_OVERRIDE_KEY)
        .map(|v| v.joined())
        .unwrap_or_else(|| "NAME_MISSING".to_string());

    // Internal fields (dotted data-model names, multivalue companions)
    // stay out of the raw payload.
    let cleaned: BTreeMap<String, FieldValue> = data
        .iter()
        .filter(|(k, _)| !k.contains('.') && !k.starts_with('$'))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    // Every CEF field gets a type entry so the contextual menu shows up on
    // the SOAR side; the config may override with concrete types.
    let mut cef_types: BTreeMap<String, Vec<String>> = fields
        .keys()
        .map(|k| (k.clone(), vec![String::new()]))
        .collect();
    for (key, value) in &search.cef_types {
        if value == &vec![None] {
            continue;
        }
        cef_types.insert(
            key.clone(),
            value.iter().flatten().cloned().collect(),
        );
    }

    let label = match &search.datamodel_object {
        Some(object) => object.clone(),
        None => search
            .artifact_label
            .clone()
            .unwrap_or_else(|| "event".to_string()),
    };

    Ok(Artifact {
        name: percent_decoded(&name),
        label,
        description: format!(
            "({}) added by Splunk App for SOAR Export",
            percent_decoded(&search.name)
        ),
        source_data_identifier: identity.pk_hash,
        kind: "event".to_string(),
        severity,
        cef: fields,
        cef_types,
        data: cleaned,
        container_id: None,
        tags: Vec::new(),
    })
}

/// Builds the container body for an artifact, consuming the container-level
/// keys from the CEF document.
pub fn build_container(
    artifact: &Artifact,
    cef: &mut BTreeMap<String, FieldValue>,
    search: &SearchConfig,
) -> Container {
    let severity = cef
        .remove(SEVERITY_KEY)
        .map(|v| v.joined())
        .unwrap_or_else(|| DEFAULT_SEVERITY.to_string());
    let sensitivity = cef
        .remove(SENSITIVITY_KEY)
        .map(|v| v.joined())
        .unwrap_or_else(|| DEFAULT_SENSITIVITY.to_string());
    let tags = match cef.remove(TAGS_KEY) {
        Some(FieldValue::Multi(tags)) => tags,
        Some(FieldValue::Single(tag)) => vec![tag],
        None => Vec::new(),
    };
    Container {
        name: artifact.name.clone(),
        description: artifact.description.clone(),
        source_data_identifier: artifact.source_data_identifier.clone(),
        severity,
        sensitivity,
        label: search.label.clone(),
        tags,
    }
}

/// Builds the deep link back into Splunk for the originating search, keyed
/// by the CEF field it should land under on the first artifact.
pub fn deep_link(
    search: &SearchConfig,
    hostname: Option<&str>,
    event_time: Option<&str>,
    now_epoch: i64,
) -> Option<(String, String)> {
    let hostname = hostname?;
    let latest = event_time
        .and_then(|t| t.parse::<i64>().ok())
        .unwrap_or(now_epoch);
    let (key, query) = match (&search.datamodel, &search.saved_search) {
        (Some(model), _) => (
            "_originating_data_model",
            format!(
                "| datamodel {} {} search | fields + *",
                model,
                search.datamodel_object.as_deref().unwrap_or_default()
            ),
        ),
        (None, Some(saved)) => ("_originating_search", format!("| savedsearch \"{saved}\"")),
        (None, None) => return None,
    };
    let encoded = utf8_percent_encode(&query, NON_ALPHANUMERIC).to_string();
    Some((
        key.to_string(),
        format!("{hostname}/app/search/search?q={encoded}&latest={latest}"),
    ))
}

/// Validates that a retry record's container payload carries the parts the
/// replay needs.
pub fn forwarding_payload(record: &RetryRecord) -> CoreResult<(BTreeMap<String, FieldValue>, SearchConfig)> {
    let cef = record
        .container
        .get("cef")
        .cloned()
        .ok_or_else(|| CoreError::MalformedInput("retry record has no cef payload".into()))?;
    let search = record
        .container
        .get("search_config")
        .cloned()
        .ok_or_else(|| {
            CoreError::MalformedInput("retry record has no search_config payload".into())
        })?;
    Ok((serde_json::from_value(cef)?, serde_json::from_value(search)?))
}
