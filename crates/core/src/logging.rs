//! # Structured Logging
//!
//! Tracing subscriber setup shared by the stockroom binaries. Diagnostics go
//! to stderr so that stdout stays reserved for command output.

use std::io;
use tracing_subscriber::{fmt::Layer, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "warn")
    pub level: String,
    /// Enable JSON structured logging (vs plain text)
    pub json_format: bool,
    /// Include file and line number information
    pub include_location: bool,
    /// Environment filter (supports complex filters like "stockroom=debug,sqlx=warn")
    pub env_filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            include_location: false,
            env_filter: None,
        }
    }
}

impl LoggingConfig {
    /// Create configuration for a command line run at the given level.
    ///
    /// sqlx statement logging is kept at `warn` unless the run is at `trace`,
    /// otherwise every ledger query is echoed.
    pub fn for_cli(level: &str, json_format: bool) -> Self {
        let sqlx_level = if level == "trace" { "trace" } else { "warn" };
        Self {
            level: level.to_string(),
            json_format,
            include_location: level == "debug" || level == "trace",
            env_filter: Some(format!("{},sqlx={}", level, sqlx_level)),
        }
    }

    /// The directive string handed to `EnvFilter` when `RUST_LOG` is unset
    pub fn filter_directives(&self) -> &str {
        self.env_filter.as_deref().unwrap_or(&self.level)
    }
}

/// Initialize structured logging for the process.
///
/// `RUST_LOG` takes precedence over the configured filter.
pub fn init_logging(config: LoggingConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.filter_directives()))?;

    let layer = Layer::new()
        .with_writer(io::stderr)
        .with_file(config.include_location)
        .with_line_number(config.include_location);

    if config.json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(layer.json())
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(layer)
            .try_init()?;
    }

    tracing::debug!(
        target: "stockroom::logging",
        "Logging initialized (level: {}, format: {})",
        config.level,
        if config.json_format { "JSON" } else { "text" }
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_presets() {
        let info = LoggingConfig::for_cli("info", false);
        assert_eq!(info.filter_directives(), "info,sqlx=warn");
        assert!(!info.include_location);

        let trace = LoggingConfig::for_cli("trace", true);
        assert_eq!(trace.filter_directives(), "trace,sqlx=trace");
        assert!(trace.json_format);
        assert!(trace.include_location);
    }

    #[test]
    fn test_filter_falls_back_to_level() {
        let config = LoggingConfig::default();
        assert_eq!(config.filter_directives(), "info");

        let config = LoggingConfig {
            env_filter: Some("stockroom=debug".to_string()),
            ..LoggingConfig::default()
        };
        assert_eq!(config.filter_directives(), "stockroom=debug");
    }
}
