//! Typed load/save of the app configuration over the conf layer.
//!
//! Auth tokens never touch the conf file: on load they are injected from
//! the password store, on save they are stripped back into it. Everything
//! else round-trips through [`AppConfig`] stanza by stanza.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::{debug, instrument, warn};

use sase_core::config::is_top_level_key;
use sase_core::workbook::WorkbookTemplate;
use sase_core::AppConfig;

use crate::error::{ConnectorError, ConnectorResult};
use crate::splunkd::SplunkdClient;

/// Loads the full app configuration, with auth tokens filled in from the
/// password store.
#[instrument(skip(splunkd))]
pub async fn load_app_config(splunkd: &SplunkdClient) -> ConnectorResult<AppConfig> {
    let settings = splunkd.load_conf().await?;
    let mut config: AppConfig =
        serde_json::from_value(Value::Object(settings.into_iter().collect()))?;

    for (config_id, server) in config.servers.iter_mut() {
        match splunkd.load_password(config_id).await? {
            Some(token) => server.auth_token = Some(token),
            None => {
                // A server without a stored token can't be pushed to, but
                // the rest of the config must still load.
                warn!(config_id = %config_id, "no auth token stored for server");
            }
        }
    }
    debug!(servers = config.servers.len(), "app config loaded");
    Ok(config)
}

/// Persists the full app configuration, moving auth tokens into the
/// password store first.
#[instrument(skip(splunkd, config))]
pub async fn save_app_config(splunkd: &SplunkdClient, config: &AppConfig) -> ConnectorResult<()> {
    let mut config = config.clone();
    for (config_id, server) in config.servers.iter_mut() {
        if let Some(token) = server.auth_token.take() {
            splunkd.save_password(config_id, &token).await?;
        }
    }

    let serialized = serde_json::to_value(&config)?;
    let Value::Object(stanzas) = serialized else {
        return Err(ConnectorError::InvalidResponse(
            "app config did not serialize to an object".into(),
        ));
    };
    for (key, value) in &stanzas {
        splunkd.save_conf_value(key, value).await?;
    }
    Ok(())
}

/// Writes a single top-level setting without touching the rest.
pub async fn save_setting(
    splunkd: &SplunkdClient,
    key: &str,
    value: &Value,
) -> ConnectorResult<()> {
    splunkd.save_conf_value(key, value).await
}

/// Persists the reconciled workbook set plus its sync bookkeeping in one
/// pass, the way the sync flow commits its result.
pub async fn save_workbook_sync(
    splunkd: &SplunkdClient,
    workbooks: &BTreeMap<String, WorkbookTemplate>,
    last_sync_time: i64,
    sync_key: Option<&str>,
) -> ConnectorResult<()> {
    splunkd
        .save_conf_value("workbooks", &serde_json::to_value(workbooks)?)
        .await?;
    splunkd
        .save_conf_value("last_sync_time", &Value::from(last_sync_time))
        .await?;
    if let Some(key) = sync_key {
        splunkd
            .save_conf_value("sync_key", &Value::from(key))
            .await?;
    }
    Ok(())
}

/// Upserts one saved forwarding configuration under its UUID conf key.
/// Top-level setting names are refused so a crafted key can't clobber
/// the app settings.
pub async fn save_forwarding_config(
    splunkd: &SplunkdClient,
    key: &str,
    value: &Value,
) -> ConnectorResult<()> {
    if is_top_level_key(key) {
        return Err(ConnectorError::Core(sase_core::CoreError::MalformedInput(
            format!("'{key}' is a reserved configuration key"),
        )));
    }
    splunkd.save_conf_value(key, value).await
}

/// Deletes a saved forwarding configuration by writing a null value over
/// its stanza; loading filters nulls out.
pub async fn delete_forwarding_config(splunkd: &SplunkdClient, key: &str) -> ConnectorResult<()> {
    if is_top_level_key(key) {
        return Err(ConnectorError::Core(sase_core::CoreError::MalformedInput(
            format!("'{key}' is a reserved configuration key"),
        )));
    }
    splunkd.save_conf_value(key, &Value::Null).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secure_string::SecureString;
    use serde_json::json;

    fn client(url: &str) -> SplunkdClient {
        SplunkdClient::new(url, SecureString::from("session-key")).unwrap()
    }

    #[tokio::test]
    async fn test_load_injects_tokens_from_password_store() {
        let mut server = mockito::Server::new_async().await;
        let conf = json!({
            "entry": [
                {"name": "phantom", "content": {"value": json!({
                    "abc": {
                        "ph_auth_config_id": "abc",
                        "server": "https://soar.example.com",
                        "default": "default"
                    }
                }).to_string()}},
                {"name": "verify_certs", "content": {"value": "false"}}
            ]
        });
        let _conf = server
            .mock(
                "GET",
                mockito::Matcher::Regex("/configs/conf-phantom".to_string()),
            )
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(conf.to_string())
            .create_async()
            .await;
        let _password = server
            .mock(
                "GET",
                mockito::Matcher::Regex("/storage/passwords/".to_string()),
            )
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(
                json!({"entry": [{"name": ":hash:", "content": {"clear_password": "tok"}}]})
                    .to_string(),
            )
            .create_async()
            .await;

        let config = load_app_config(&client(&server.url())).await.unwrap();
        assert!(!config.verify_certs);
        let entry = config.get_server_config("abc").unwrap();
        assert!(entry.default);
        assert_eq!(entry.auth_token.as_deref(), Some("tok"));
    }

    #[tokio::test]
    async fn test_load_tolerates_missing_token() {
        let mut server = mockito::Server::new_async().await;
        let conf = json!({
            "entry": [
                {"name": "phantom", "content": {"value": json!({
                    "abc": {"ph_auth_config_id": "abc", "server": "https://soar.example.com"}
                }).to_string()}}
            ]
        });
        let _conf = server
            .mock(
                "GET",
                mockito::Matcher::Regex("/configs/conf-phantom".to_string()),
            )
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(conf.to_string())
            .create_async()
            .await;
        let _password = server
            .mock(
                "GET",
                mockito::Matcher::Regex("/storage/passwords/".to_string()),
            )
            .match_query(mockito::Matcher::Any)
            .with_status(404)
            .create_async()
            .await;

        let config = load_app_config(&client(&server.url())).await.unwrap();
        assert_eq!(
            config.get_server_config("abc").unwrap().auth_token,
            None
        );
    }

    #[tokio::test]
    async fn test_forwarding_config_refuses_reserved_keys() {
        let server = mockito::Server::new_async().await;
        let err = save_forwarding_config(
            &client(&server.url()),
            "workbooks",
            &json!({"_name": "x"}),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ConnectorError::Core(_)));
    }
}
