//! # sase-observability
//!
//! Structured logging for the backend, built on the tracing ecosystem.
//!
//! The app's `enable_logging` setting carries a plain level name
//! (`DEBUG`, `INFO`, ...) chosen in the configuration UI;
//! [`level_from_setting`] maps it onto a [`Level`], with `RUST_LOG`
//! taking precedence when set.

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level for the workspace crates.
    pub level: Level,
    /// Whether to emit JSON lines instead of human-readable output.
    pub json_format: bool,
    /// Whether to include span open/close events.
    pub include_spans: bool,
    /// Whether to include file/line info.
    pub include_location: bool,
    /// Whether to include target (module path).
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            json_format: false,
            include_spans: false,
            include_location: false,
            include_target: true,
        }
    }
}

/// Maps the `enable_logging` setting onto a level. Unknown or empty
/// values mean INFO.
pub fn level_from_setting(setting: &str) -> Level {
    match setting.trim().to_ascii_uppercase().as_str() {
        "TRACE" => Level::TRACE,
        "DEBUG" => Level::DEBUG,
        "WARN" | "WARNING" => Level::WARN,
        "ERROR" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Initializes logging with the default configuration.
pub fn init_logging() {
    init_logging_with_config(LoggingConfig::default());
}

/// Initializes the global subscriber. `RUST_LOG` overrides the
/// per-crate filter built from the configured level.
pub fn init_logging_with_config(config: LoggingConfig) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "sase_core={},sase_connectors={},sase_api={},sase_cli={}",
            config.level, config.level, config.level, config.level
        ))
    });

    let span_events = if config.include_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let fmt_layer = fmt::layer()
        .with_span_events(span_events)
        .with_file(config.include_location)
        .with_line_number(config.include_location)
        .with_target(config.include_target);

    let fmt_layer: Box<dyn Layer<Registry> + Send + Sync> = if config.json_format {
        Box::new(fmt_layer.json())
    } else {
        Box::new(fmt_layer)
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, Level::INFO);
        assert!(!config.json_format);
    }

    #[test]
    fn test_level_from_setting() {
        assert_eq!(level_from_setting("DEBUG"), Level::DEBUG);
        assert_eq!(level_from_setting("warning"), Level::WARN);
        assert_eq!(level_from_setting(""), Level::INFO);
        assert_eq!(level_from_setting("bogus"), Level::INFO);
    }
}
