//! Serve command - starts the REST backend.

use anyhow::{Context, Result};
use colored::Colorize;
use std::net::SocketAddr;
use std::path::PathBuf;

use sase_api::{ApiServer, ApiServerConfig, AppState};

/// Server configuration from CLI arguments.
#[derive(Debug, Clone)]
pub struct ServeConfig {
    /// Port to listen on.
    pub port: u16,
    /// Hostname to bind to.
    pub host: String,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            port: 8065,
            host: "127.0.0.1".to_string(),
        }
    }
}

/// Runs the REST backend.
pub async fn run_server(
    config: ServeConfig,
    splunk_home: PathBuf,
    splunkd_url: String,
) -> Result<()> {
    println!("{} Starting SOAR Export backend...", "[server]".cyan());

    let bind_address: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("Invalid bind address")?;

    let state = AppState::new(splunk_home.clone(), splunkd_url.clone());

    let server_config = ApiServerConfig {
        bind_address,
        ..Default::default()
    };

    // Print startup info
    println!();
    println!("{}", "SOAR Export Backend".bold());
    println!("{}", "═".repeat(40));
    println!("  {} http://{}", "Address:".cyan(), bind_address);
    println!("  {} {}", "splunkd:".cyan(), splunkd_url);
    println!("  {} {}", "SPLUNK_HOME:".cyan(), splunk_home.display());
    println!();
    println!("{}", "Endpoints:".bold());
    println!("  GET  /lookup_editor/lookup_contents       - Read a lookup");
    println!("  POST /lookup_editor/lookup_contents       - Save a lookup");
    println!("  GET  /lookup_editor/lookup_as_file        - Download a lookup");
    println!("  GET  /lookup_editor/lookup_backups        - List backups");
    println!("  GET  /soar_export/targets                 - List SOAR targets");
    println!("  GET  /soar_export/workbooks               - Sync workbooks");
    println!("  POST /soar_export/forwarding              - Save a forwarding config");
    println!();
    println!("Press {} to stop", "Ctrl+C".yellow());
    println!();

    let server = ApiServer::new(state, server_config);
    server.run().await.context("Server error")?;

    println!();
    println!("{} Server stopped", "[server]".cyan());

    Ok(())
}
