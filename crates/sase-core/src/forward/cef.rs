//! CEF extraction from search results.
//!
//! A saved forwarding configuration maps CEF field names to search result
//! fields. [`find_patterns`] applies that mapping to one result row,
//! resolving data-model prefixes and the special `_severity`,
//! `_sensitivity` and `_container_name` keys, and stamps a deterministic
//! container name when none is configured.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreResult;
use crate::forward::identity::event_identity;

pub const SEVERITY_KEY: &str = "_severity";
pub const SENSITIVITY_KEY: &str = "_sensitivity";
pub const NAME_OVERRIDE_KEY: &str = "_container_name";
pub const TAGS_KEY: &str = "tags";

pub const DEFAULT_SEVERITY: &str = "medium";
pub const DEFAULT_SENSITIVITY: &str = "amber";
pub const VALID_SENSITIVITIES: [&str; 4] = ["red", "green", "amber", "white"];

/// Tag applied to containers and artifacts whose configured severity does
/// not exist on the target server.
pub const SEVERITY_CHECK_TAG: &str = "check_sase_severity";

/// One field value from a search result: scalar, or expanded multivalue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Single(String),
    Multi(Vec<String>),
}

impl FieldValue {
    /// The value with multivalue parts concatenated, matching how primary
    /// keys are built.
    pub fn joined(&self) -> String {
        match self {
            FieldValue::Single(s) => s.clone(),
            FieldValue::Multi(parts) => parts.concat(),
        }
    }

    pub fn as_single(&self) -> Option<&str> {
        match self {
            FieldValue::Single(s) => Some(s),
            FieldValue::Multi(_) => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Single(s.to_string())
    }
}

/// The configured primary-key fields, stored either as a comma-joined
/// string or as a list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PkFields {
    Csv(String),
    List(Vec<String>),
}

impl Default for PkFields {
    fn default() -> Self {
        PkFields::List(Vec::new())
    }
}

impl PkFields {
    pub fn fields(&self) -> Vec<String> {
        match self {
            PkFields::Csv(s) => s
                .split(',')
                .filter(|f| !f.is_empty())
                .map(str::to_string)
                .collect(),
            PkFields::List(list) => list.clone(),
        }
    }
}

/// One saved forwarding configuration: the mapping settings plus the plain
/// CEF-to-field mappings, which arrive as arbitrary top-level keys.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(rename = "_name")]
    pub name: String,
    /// Config id of the target server.
    #[serde(rename = "_target", default)]
    pub target: String,
    /// Per-field data-model prefixes.
    #[serde(rename = "_prefixes", default)]
    pub prefixes: BTreeMap<String, String>,
    /// Data-model object name; doubles as the fallback field prefix and the
    /// artifact label for data-model searches.
    #[serde(rename = "_search", default, skip_serializing_if = "Option::is_none")]
    pub datamodel_object: Option<String>,
    #[serde(rename = "_model", default, skip_serializing_if = "Option::is_none")]
    pub datamodel: Option<String>,
    #[serde(
        rename = "_savedsearch",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub saved_search: Option<String>,
    #[serde(rename = "_severity", default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    #[serde(
        rename = "_sensitivity",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sensitivity: Option<String>,
    /// Result field whose value names the container.
    #[serde(
        rename = "_container_name",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub container_name_field: Option<String>,
    /// Container label on the SOAR side.
    #[serde(rename = "_label", default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Artifact label for saved-search configs.
    #[serde(
        rename = "_artifact_label",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub artifact_label: Option<String>,
    /// Per-field `contains` overrides for posted artifacts.
    #[serde(rename = "_cef_types", default)]
    pub cef_types: BTreeMap<String, Vec<Option<String>>>,
    #[serde(rename = "__pks[]", default)]
    pub pk_fields: PkFields,
    /// Everything else: CEF field name to search result field. Underscore
    /// keys other than `_time` are settings and are skipped during mapping.
    #[serde(flatten)]
    pub mappings: BTreeMap<String, Value>,
}

impl SearchConfig {
    /// Folds the app-wide CIM-to-CEF mapping into this config: each CIM
    /// field not already mapped (by either side) becomes a plain mapping.
    pub fn add_cim_mapping(&mut self, cim: &BTreeMap<String, String>) {
        let mapped_fields: Vec<String> = self
            .mappings
            .values()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();
        for (field, cef_name) in cim {
            if !self.mappings.contains_key(cef_name)
                && !mapped_fields.iter().any(|m| m == field)
            {
                self.mappings
                    .insert(cef_name.clone(), Value::String(field.clone()));
            }
        }
    }
}

fn multivalue_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:\$\$;)?\$(.*?)(?:\$;|\n    \$;|\$$)")
            .unwrap_or_else(|_| unreachable!("multivalue pattern is valid"))
    })
}

/// Expands `__mv_<field>` companions into multivalue fields. The encoded
/// form wraps each value in dollar signs with `$$` escaping a literal one.
pub fn expand_multivalue(row: &mut BTreeMap<String, FieldValue>) {
    let mut expanded: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (key, value) in row.iter() {
        let Some(base) = key.strip_prefix("__mv_") else {
            continue;
        };
        if !row.contains_key(base) {
            continue;
        }
        let FieldValue::Single(encoded) = value else {
            continue;
        };
        let parts: Vec<String> = multivalue_regex()
            .captures_iter(encoded)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().replace("$$", "$"))
            .filter(|s| !s.is_empty())
            .collect();
        if !parts.is_empty() {
            expanded.insert(base.to_string(), parts);
        }
    }
    for (base, parts) in expanded {
        row.insert(format!("__mv_{base}"), FieldValue::Multi(parts.clone()));
        row.insert(base, FieldValue::Multi(parts));
    }
}

/// Applies a forwarding configuration to one result row, producing the CEF
/// document for the artifact. Field names are matched case-insensitively,
/// with data-model prefixes tried when a bare name does not resolve.
pub fn find_patterns(
    row: &BTreeMap<String, FieldValue>,
    search: &SearchConfig,
    fips: bool,
) -> CoreResult<BTreeMap<String, FieldValue>> {
    let lowered: BTreeMap<String, &FieldValue> = row
        .iter()
        .filter(|(k, _)| !k.is_empty())
        .map(|(k, v)| (k.to_lowercase(), v))
        .collect();
    let object_prefix = format!(
        "{}.",
        search.datamodel_object.as_deref().unwrap_or_default()
    );

    let resolve = |field: &str| -> Option<FieldValue> {
        if let Some(v) = lowered.get(&field.to_lowercase()) {
            return Some((*v).clone());
        }
        let prefix = search.prefixes.get(field)?;
        let prefixed = format!("{prefix}.{field}").to_lowercase();
        if let Some(v) = lowered.get(&prefixed) {
            return Some((*v).clone());
        }
        let fallback = format!("{object_prefix}{field}").to_lowercase();
        lowered.get(&fallback).map(|v| (*v).clone())
    };

    let mut cef: BTreeMap<String, FieldValue> = BTreeMap::new();
    for (key, value) in &search.mappings {
        if key.starts_with('_') && key != "_time" {
            continue;
        }
        let Some(field) = value.as_str() else { continue };
        if let Some(found) = resolve(field) {
            cef.insert(key.clone(), found);
        }
    }

    if let Some(severity) = &search.severity {
        cef.insert(SEVERITY_KEY.to_string(), FieldValue::from(severity.as_str()));
    }
    if let Some(sensitivity) = &search.sensitivity {
        let resolved = resolve(sensitivity);
        let value = if VALID_SENSITIVITIES.contains(&sensitivity.as_str()) {
            FieldValue::from(sensitivity.as_str())
        } else {
            match resolved {
                Some(found)
                    if found
                        .as_single()
                        .map(|s| VALID_SENSITIVITIES.contains(&s))
                        .unwrap_or(false) =>
                {
                    found
                }
                _ => FieldValue::from(DEFAULT_SENSITIVITY),
            }
        };
        cef.insert(SENSITIVITY_KEY.to_string(), value);
    }
    if let Some(field) = &search.container_name_field {
        if !field.is_empty() {
            let value = resolve(field).unwrap_or_else(|| {
                FieldValue::Single(format!("Field \"{field}\" empty or missing"))
            });
            cef.insert(NAME_OVERRIDE_KEY.to_string(), value);
        }
    }

    if !cef.contains_key(NAME_OVERRIDE_KEY) {
        let identity = event_identity(&cef, &search.pk_fields.fields(), fips)?;
        let name = if identity.pk_str.is_empty() {
            search.name.clone()
        } else {
            format!("{}: {}", search.name, identity.pk_str)
        };
        cef.insert(NAME_OVERRIDE_KEY.to_string(), FieldValue::Single(name));
    }
    Ok(cef)
}

/// The `contains` metadata for one CEF field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CefFieldMeta {
    #[serde(default)]
    pub contains: Vec<String>,
}

/// The stock CEF dictionary served when the target server does not supply
/// its own metadata.
pub fn default_cef_metadata() -> BTreeMap<String, CefFieldMeta> {
    DEFAULT_CEF_FIELDS
        .iter()
        .map(|(name, contains)| {
            (
                name.to_string(),
                CefFieldMeta {
                    contains: contains.iter().map(|c| c.to_string()).collect(),
                },
            )
        })
        .collect()
}

/// Data types SOAR ships pattern matchers for.
pub const DEFAULT_CONTAINS: [&str; 12] = [
    "ip",
    "user name",
    "port",
    "mac address",
    "host name",
    "domain",
    "url",
    "file path",
    "file name",
    "hash",
    "process name",
    "email",
];

#[rustfmt::skip]
const DEFAULT_CEF_FIELDS: [(&str, &[&str]); 145] = [
    ("act", &[]),
    ("app", &[]),
    ("applicationProtocol", &[]),
    ("baseEventCount", &[]),
    ("bytesIn", &[]),
    ("bytesOut", &[]),
    ("cat", &[]),
    ("cn1", &[]),
    ("cn1Label", &[]),
    ("cn2", &[]),
    ("cn2Label", &[]),
    ("cn3", &[]),
    ("cn3Label", &[]),
    ("cnt", &[]),
    ("cs1", &[]),
    ("cs1Label", &[]),
    ("cs2", &[]),
    ("cs2Label", &[]),
    ("cs3", &[]),
    ("cs3Label", &[]),
    ("cs4", &[]),
    ("cs4Label", &[]),
    ("cs5", &[]),
    ("cs5Label", &[]),
    ("cs6", &[]),
    ("cs6Label", &[]),
    ("destinationAddress", &["ip"]),
    ("destinationDnsDomain", &["domain"]),
    ("destinationHostName", &["host name"]),
    ("destinationMacAddress", &["mac address"]),
    ("destinationNtDomain", &[]),
    ("destinationPort", &["port"]),
    ("destinationProcessName", &["process name"]),
    ("destinationServiceName", &["process name"]),
    ("destinationTranslatedAddress", &["ip"]),
    ("destinationTranslatedPort", &["port"]),
    ("destinationUserId", &[]),
    ("destinationUserName", &["user name"]),
    ("destinationUserPrivileges", &[]),
    ("deviceAction", &[]),
    ("deviceAddress", &["ip"]),
    ("deviceCustomDate1", &[]),
    ("deviceCustomDate1Label", &[]),
    ("deviceCustomDate2", &[]),
    ("deviceCustomDate2Label", &[]),
    ("deviceCustomNumber1", &[]),
    ("deviceCustomNumber1Label", &[]),
    ("deviceCustomNumber2", &[]),
    ("deviceCustomNumber2Label", &[]),
    ("deviceCustomNumber3", &[]),
    ("deviceCustomNumber3Label", &[]),
    ("deviceCustomString1", &[]),
    ("deviceCustomString1Label", &[]),
    ("deviceCustomString2", &[]),
    ("deviceCustomString2Label", &[]),
    ("deviceCustomString3", &[]),
    ("deviceCustomString3Label", &[]),
    ("deviceCustomString4", &[]),
    ("deviceCustomString4Label", &[]),
    ("deviceCustomString5", &[]),
    ("deviceCustomString5Label", &[]),
    ("deviceCustomString6", &[]),
    ("deviceCustomString6Label", &[]),
    ("deviceDirection", &[]),
    ("deviceDnsDomain", &["domain"]),
    ("deviceEventCategory", &[]),
    ("deviceExternalId", &[]),
    ("deviceFacility", &[]),
    ("deviceHostname", &["host name"]),
    ("deviceInboundInterface", &[]),
    ("deviceMacAddress", &["mac address"]),
    ("deviceOutboundInterface", &[]),
    ("deviceProcessName", &["process name"]),
    ("deviceTranslatedAddress", &["ip"]),
    ("dhost", &["host name"]),
    ("dmac", &["mac address"]),
    ("dntdom", &["domain"]),
    ("dpriv", &[]),
    ("dproc", &["process name"]),
    ("dpt", &["port"]),
    ("dst", &["ip"]),
    ("duid", &[]),
    ("duser", &["user name"]),
    ("dvc", &["ip"]),
    ("dvchost", &["host name"]),
    ("end", &[]),
    ("endTime", &[]),
    ("externalId", &[]),
    ("eventOutcome", &[]),
    ("fileCreateTime", &[]),
    ("fileHash", &["hash"]),
    ("fileId", &[]),
    ("fileModificationTime", &[]),
    ("fileName", &["file name"]),
    ("filePath", &["file path"]),
    ("filePermission", &[]),
    ("fileSize", &[]),
    ("fileType", &[]),
    ("fname", &["file name"]),
    ("fsize", &[]),
    ("in", &[]),
    ("message", &[]),
    ("msg", &[]),
    ("oldfileCreateTime", &[]),
    ("oldfileHash", &["hash"]),
    ("oldfileId", &[]),
    ("oldfileModificationTime", &[]),
    ("oldfileName", &["file name"]),
    ("oldfilePath", &["file path"]),
    ("oldfilePermission", &[]),
    ("oldfileType", &[]),
    ("oldfsize", &[]),
    ("out", &[]),
    ("outcome", &[]),
    ("proto", &[]),
    ("receiptTime", &[]),
    ("request", &[]),
    ("requestClientApplication", &[]),
    ("requestCookies", &[]),
    ("requestMethod", &[]),
    ("requestURL", &["url"]),
    ("rt", &[]),
    ("shost", &["host name"]),
    ("smac", &["mac address"]),
    ("sntdom", &["domain"]),
    ("sourceAddress", &["ip"]),
    ("sourceDnsDomain", &["domain"]),
    ("sourceHostName", &["host name"]),
    ("sourceMacAddress", &["mac address"]),
    ("sourceNtDomain", &[]),
    ("sourcePort", &["port"]),
    ("sourceServiceName", &[]),
    ("sourceTranslatedAddress", &["ip"]),
    ("sourceTranslatedPort", &["port"]),
    ("sourceUserId", &[]),
    ("sourceUserName", &["user name"]),
    ("sourceUserPrivileges", &[]),
    ("spriv", &[]),
    ("spt", &["port"]),
    ("src", &["ip"]),
    ("start", &[]),
    ("startTime", &[]),
    ("suid", &[]),
    ("suser", &["user name"]),
    ("transportProtocol", &[]),
];

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(pairs: &[(&str, &str)]) -> BTreeMap<String, FieldValue> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), FieldValue::from(*v)))
            .collect()
    }

    fn config(json: Value) -> SearchConfig {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_expand_multivalue() {
        let mut data = row(&[
            ("duser", "alice"),
            ("__mv_duser", "$alice$;$bob$;$do$$llar$"),
            ("src", "10.0.0.1"),
        ]);
        expand_multivalue(&mut data);
        assert_eq!(
            data["duser"],
            FieldValue::Multi(vec![
                "alice".to_string(),
                "bob".to_string(),
                "do$llar".to_string()
            ])
        );
        assert_eq!(data["src"], FieldValue::from("10.0.0.1"));
    }

    #[test]
    fn test_expand_multivalue_ignores_unparsable() {
        let mut data = row(&[("duser", "alice"), ("__mv_duser", "no markers")]);
        expand_multivalue(&mut data);
        assert_eq!(data["duser"], FieldValue::from("alice"));
    }

    #[test]
    fn test_find_patterns_case_insensitive_and_prefixed() {
        let search = config(json!({
            "_name": "my search",
            "_search": "Authentication",
            "_prefixes": {"user": "Authentication"},
            "src": "Source_IP",
            "duser": "user",
            "_severity": "low"
        }));
        let data = row(&[
            ("source_ip", "10.0.0.1"),
            ("authentication.user", "alice"),
        ]);
        let cef = find_patterns(&data, &search, false).unwrap();
        assert_eq!(cef["src"], FieldValue::from("10.0.0.1"));
        assert_eq!(cef["duser"], FieldValue::from("alice"));
        assert_eq!(cef[SEVERITY_KEY], FieldValue::from("low"));
    }

    #[test]
    fn test_find_patterns_sensitivity_defaults_to_amber() {
        let search = config(json!({
            "_name": "s",
            "_sensitivity": "classification",
            "classification": "classification"
        }));
        let data = row(&[("classification", "top-secret")]);
        let cef = find_patterns(&data, &search, false).unwrap();
        assert_eq!(cef[SENSITIVITY_KEY], FieldValue::from("amber"));

        let search = config(json!({"_name": "s", "_sensitivity": "red"}));
        let cef = find_patterns(&row(&[]), &search, false).unwrap();
        assert_eq!(cef[SENSITIVITY_KEY], FieldValue::from("red"));
    }

    #[test]
    fn test_find_patterns_missing_container_field() {
        let search = config(json!({"_name": "s", "_container_name": "title"}));
        let cef = find_patterns(&row(&[]), &search, false).unwrap();
        assert_eq!(
            cef[NAME_OVERRIDE_KEY],
            FieldValue::from("Field \"title\" empty or missing")
        );
    }

    #[test]
    fn test_find_patterns_container_name_from_pks() {
        let search = config(json!({
            "_name": "my search",
            "src": "src",
            "__pks[]": "src"
        }));
        let data = row(&[("src", "10.0.0.1")]);
        let cef = find_patterns(&data, &search, false).unwrap();
        assert_eq!(
            cef[NAME_OVERRIDE_KEY],
            FieldValue::from("my search: src:10.0.0.1")
        );

        // No keys configured: the search name alone.
        let search = config(json!({"_name": "my search", "src": "src"}));
        let cef = find_patterns(&data, &search, false).unwrap();
        assert_eq!(cef[NAME_OVERRIDE_KEY], FieldValue::from("my search"));
    }

    #[test]
    fn test_pk_fields_accepts_both_encodings() {
        let csv: PkFields = serde_json::from_value(json!("a,b")).unwrap();
        assert_eq!(csv.fields(), vec!["a", "b"]);
        let list: PkFields = serde_json::from_value(json!(["a", "b"])).unwrap();
        assert_eq!(list.fields(), vec!["a", "b"]);
    }

    #[test]
    fn test_add_cim_mapping_skips_existing() {
        let mut search = config(json!({"_name": "s", "src": "ip_field"}));
        let mut cim = BTreeMap::new();
        cim.insert("ip_field".to_string(), "sourceAddress".to_string());
        cim.insert("user_field".to_string(), "duser".to_string());
        search.add_cim_mapping(&cim);
        // ip_field is already mapped to src; only duser comes in.
        assert!(!search.mappings.contains_key("sourceAddress"));
        assert_eq!(search.mappings["duser"], json!("user_field"));
    }

    #[test]
    fn test_default_cef_metadata_table() {
        let meta = default_cef_metadata();
        assert_eq!(meta.len(), 117);
        assert_eq!(meta["src"].contains, vec!["ip"]);
        assert!(meta["act"].contains.is_empty());
    }
}
