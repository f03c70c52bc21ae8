//! Typed model of the app configuration store.
//!
//! The `phantom` conf file holds one stanza per key; every value is a JSON
//! document except `enable_logging`. Keys outside [`TOP_LEVEL_SETTINGS`] are
//! saved forwarding configurations (one UUID key per configured search).
//! Loading and saving through splunkd, including auth-token injection from
//! the password store, lives in `sase-connectors`.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::workbook::WorkbookTemplate;

/// Conf keys that are app settings rather than forwarding configurations.
pub const TOP_LEVEL_SETTINGS: [&str; 11] = [
    "phantom",
    "severities",
    "playbooks",
    "workbooks",
    "last_sync_time",
    "sync_key",
    "version",
    "enable_logging",
    "accepted",
    "verify_certs",
    "cim_mapping",
];

/// Whether a conf key is a top-level setting (versus a forwarding config).
pub fn is_top_level_key(key: &str) -> bool {
    TOP_LEVEL_SETTINGS.contains(&key)
}

/// Severities assumed when a server has no cached severity list.
pub const FALLBACK_SEVERITIES: [&str; 3] = ["High", "Medium", "Low"];

/// One configured SOAR server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Stable id, also the password-store entry name (after SHA-1 hashing).
    pub ph_auth_config_id: String,
    /// Display name shown in target listings; filled in from the verified
    /// user when left empty.
    #[serde(default)]
    pub custom_name: String,
    /// Base URL of the SOAR server. Must be https.
    pub server: String,
    /// Auth token. Lives in the password store; the config-store layer
    /// injects it on load and strips it before saving, so it is never
    /// persisted in the conf file.
    #[serde(
        rename = "ph-auth-token",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub auth_token: Option<String>,
    /// Whether this is the default server. The conf file historically holds
    /// `"default"`, `"true"` or a bool here.
    #[serde(default, deserialize_with = "flexible_flag")]
    pub default: bool,
    /// Forward through a heavy-forwarder relay instead of posting directly.
    #[serde(default, deserialize_with = "flexible_flag")]
    pub arrelay: bool,
    /// Optional https proxy URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    /// SOAR user the token belongs to, recorded at verification time.
    #[serde(default)]
    pub user: String,
}

/// Accepts the historical encodings of the default/arrelay flags.
fn flexible_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
        Number(i64),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Text(s) => matches!(s.to_lowercase().as_str(), "true" | "default" | "1"),
        Flag::Number(n) => n != 0,
    })
}

/// The full app configuration as stored in the conf file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Config id to server entry.
    #[serde(rename = "phantom", default)]
    pub servers: BTreeMap<String, ServerConfig>,
    /// Config id to cached severity names, capitalized.
    #[serde(default)]
    pub severities: BTreeMap<String, Vec<String>>,
    /// Config id to cached playbook names (`scm/name`).
    #[serde(default)]
    pub playbooks: BTreeMap<String, Vec<String>>,
    /// Reconciled workbook template set, keyed by unique name.
    #[serde(default)]
    pub workbooks: BTreeMap<String, WorkbookTemplate>,
    /// Epoch seconds of the last workbook sync.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_time: Option<i64>,
    /// Opaque confirmation key from the last sync pass.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_key: Option<String>,
    /// App version the config was last written by.
    #[serde(default)]
    pub version: String,
    /// Log-level selector; the one conf value that is not JSON-encoded.
    #[serde(default)]
    pub enable_logging: String,
    /// Whether the user accepted the telemetry notice.
    #[serde(default, deserialize_with = "flexible_flag")]
    pub accepted: bool,
    /// Whether SOAR server certificates are verified.
    #[serde(default = "default_true", deserialize_with = "flexible_flag")]
    pub verify_certs: bool,
    /// CIM field to CEF field mapping folded into saved-search configs.
    #[serde(default)]
    pub cim_mapping: BTreeMap<String, String>,
    /// Saved forwarding configurations, keyed by their UUID conf key.
    #[serde(flatten)]
    pub forwarding: BTreeMap<String, Value>,
}

fn default_true() -> bool {
    true
}

impl AppConfig {
    /// Looks up a server entry by its config id.
    pub fn get_server_config(&self, config_id: &str) -> Option<&ServerConfig> {
        self.servers.get(config_id)
    }

    /// The server marked default, if any. With several marked (the invariant
    /// is soft) the first in key order wins.
    pub fn default_server(&self) -> Option<&ServerConfig> {
        self.servers.values().find(|s| s.default)
    }

    /// Cached severities for a server, falling back to the stock set when
    /// nothing has been synced yet.
    pub fn severities_for(&self, config_id: &str) -> Vec<String> {
        match self.severities.get(config_id) {
            Some(list) if !list.is_empty() => list.clone(),
            _ => FALLBACK_SEVERITIES.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Saved forwarding configurations (every non-top-level conf key).
    pub fn forwarding_configs(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.forwarding
            .iter()
            .filter(|(key, value)| !is_top_level_key(key) && !value.is_null())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn server(id: &str, default: bool) -> ServerConfig {
        ServerConfig {
            ph_auth_config_id: id.to_string(),
            custom_name: format!("server {id}"),
            server: "https://soar.example.com".to_string(),
            auth_token: None,
            default,
            arrelay: false,
            proxy: None,
            user: String::new(),
        }
    }

    #[test]
    fn test_flexible_flags_parse_historical_values() {
        let entry: ServerConfig = serde_json::from_value(json!({
            "ph_auth_config_id": "abc",
            "server": "https://soar.example.com",
            "default": "default",
            "arrelay": "false"
        }))
        .unwrap();
        assert!(entry.default);
        assert!(!entry.arrelay);
    }

    #[test]
    fn test_token_never_serialized() {
        let mut entry = server("abc", false);
        entry.auth_token = Some("secret".to_string());
        let value = serde_json::to_value(&entry).unwrap();
        // Tokens belong in the password store, not the conf file.
        assert!(value.get("ph-auth-token").is_some());

        entry.auth_token = None;
        let value = serde_json::to_value(&entry).unwrap();
        assert!(value.get("ph-auth-token").is_none());
    }

    #[test]
    fn test_default_server_selection() {
        let mut config = AppConfig::default();
        config.servers.insert("a".to_string(), server("a", false));
        config.servers.insert("b".to_string(), server("b", true));
        assert_eq!(config.default_server().unwrap().ph_auth_config_id, "b");
    }

    #[test]
    fn test_severities_fallback() {
        let mut config = AppConfig::default();
        config
            .severities
            .insert("a".to_string(), vec!["Critical".to_string()]);
        assert_eq!(config.severities_for("a"), vec!["Critical"]);
        assert_eq!(config.severities_for("b"), vec!["High", "Medium", "Low"]);
    }

    #[test]
    fn test_forwarding_configs_exclude_settings() {
        let config: AppConfig = serde_json::from_value(json!({
            "phantom": {},
            "version": "4.3.13",
            "1234-uuid": {"_name": "my search", "_target": "abc"}
        }))
        .unwrap();
        let forwarding: Vec<_> = config.forwarding_configs().collect();
        assert_eq!(forwarding.len(), 1);
        assert_eq!(forwarding[0].0, "1234-uuid");
    }
}
