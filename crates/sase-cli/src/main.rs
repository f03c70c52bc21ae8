//! Splunk App for SOAR Export backend CLI
//!
//! One binary for the three entry points Splunk invokes: the REST
//! backend (`serve`), the alert-action forwarder (`forward`) and the
//! retry-queue modular input (`retry`).

use std::io::BufRead;
use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use percent_encoding::percent_decode_str;

use sase_connectors::{SecureString, SplunkdClient};
use sase_observability::{level_from_setting, LoggingConfig};

mod commands;

use commands::{run_forward, run_retry, run_server, ForwardConfig, ServeConfig};

#[derive(Parser)]
#[command(name = "sase")]
#[command(version)]
#[command(about = "Backend services for the Splunk App for SOAR Export", long_about = None)]
struct Cli {
    /// splunkd management URL
    #[arg(long, default_value = "https://127.0.0.1:8089")]
    splunkd_url: String,

    /// Splunk installation root (falls back to $SPLUNK_HOME)
    #[arg(long, value_name = "DIR")]
    splunk_home: Option<PathBuf>,

    /// splunkd session key; read from the `sessionKey=` stdin line
    /// when omitted, matching how splunkd hands keys to alert scripts
    #[arg(long)]
    session_key: Option<String>,

    /// Log level name (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(long)]
    log_level: Option<String>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the REST backend
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8065")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },

    /// Forward the results of one scheduled search to SOAR
    Forward {
        /// Saved search name, as passed by the alert action
        #[arg(long)]
        search_name: String,

        /// Path to the gzipped CSV of search results
        #[arg(long, value_name = "FILE")]
        results: PathBuf,
    },

    /// Replay queued containers and artifacts against their servers
    Retry,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        cli.log_level
            .as_deref()
            .map(level_from_setting)
            .unwrap_or(tracing::Level::INFO)
    };

    sase_observability::init_logging_with_config(LoggingConfig {
        level: log_level,
        ..Default::default()
    });

    let splunk_home = cli.splunk_home.clone().unwrap_or_else(default_splunk_home);

    match &cli.command {
        Commands::Serve { port, host } => {
            run_server(
                ServeConfig {
                    port: *port,
                    host: host.clone(),
                },
                splunk_home,
                cli.splunkd_url.clone(),
            )
            .await
        }
        Commands::Forward {
            search_name,
            results,
        } => {
            let splunkd = splunkd_client(&cli)?;
            run_forward(
                ForwardConfig {
                    search_name: search_name.clone(),
                    results: results.clone(),
                },
                &splunkd,
            )
            .await
        }
        Commands::Retry => {
            let splunkd = splunkd_client(&cli)?;
            run_retry(&splunkd).await
        }
    }
}

fn default_splunk_home() -> PathBuf {
    std::env::var_os("SPLUNK_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/opt/splunk"))
}

fn splunkd_client(cli: &Cli) -> Result<SplunkdClient> {
    let key = resolve_session_key(cli.session_key.as_deref())?;
    Ok(SplunkdClient::new(&cli.splunkd_url, key)?)
}

/// Resolves the session key from the CLI argument, falling back to the
/// `sessionKey=<urlencoded>` line splunkd writes to stdin.
fn resolve_session_key(arg: Option<&str>) -> Result<SecureString> {
    if let Some(key) = arg {
        return Ok(SecureString::new(key.to_string()));
    }
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        if let Some(encoded) = line.trim().strip_prefix("sessionKey=") {
            let key = decode_session_key(encoded);
            if !key.is_empty() {
                return Ok(SecureString::new(key));
            }
        }
    }
    bail!("No session key provided on the command line or stdin");
}

/// splunkd url-encodes the key with `+` standing for a space.
fn decode_session_key(encoded: &str) -> String {
    let plused = encoded.replace('+', " ");
    percent_decode_str(&plused).decode_utf8_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_session_key() {
        assert_eq!(decode_session_key("abc%3D%3D"), "abc==");
        assert_eq!(decode_session_key("a%5Eb"), "a^b");
    }

    #[test]
    fn test_resolve_session_key_prefers_argument() {
        let key = resolve_session_key(Some("direct")).unwrap();
        assert_eq!(key.expose_secret(), "direct");
    }
}
