//! Logging configuration
//!
//! Terraform owns stdout for protocol traffic, so every log line goes to stderr.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Build from command line flags. `--debug` wins over a `TF_LOG` level.
    pub fn from_flags(debug: bool, tf_log: Option<&str>, json_format: bool) -> Self {
        let level = if debug {
            "debug".to_string()
        } else {
            tf_log
                .and_then(level_from_tf_log)
                .unwrap_or("info")
                .to_string()
        };

        Self { level, json_format }
    }

    /// Install the global subscriber; `RUST_LOG` overrides the configured level
    pub fn init(&self) -> anyhow::Result<()> {
        let env_filter =
            EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&self.level))?;

        let registry = tracing_subscriber::registry().with(env_filter);
        if self.json_format {
            registry
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .try_init()?;
        } else {
            registry
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_ansi(false)
                        .with_writer(std::io::stderr),
                )
                .try_init()?;
        }
        Ok(())
    }
}

/// Map a Terraform `TF_LOG` value onto a tracing level
fn level_from_tf_log(value: &str) -> Option<&'static str> {
    match value.trim().to_ascii_uppercase().as_str() {
        "TRACE" => Some("trace"),
        "DEBUG" => Some("debug"),
        "INFO" => Some("info"),
        "WARN" => Some("warn"),
        "ERROR" => Some("error"),
        // TF_LOG=JSON is trace-level output in JSON form
        "JSON" => Some("trace"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_flag_wins() {
        let config = LoggingConfig::from_flags(true, Some("ERROR"), false);
        assert_eq!(config.level, "debug");
    }

    #[test]
    fn test_tf_log_levels() {
        assert_eq!(LoggingConfig::from_flags(false, Some("warn"), false).level, "warn");
        assert_eq!(LoggingConfig::from_flags(false, Some("JSON"), true).level, "trace");
        assert_eq!(LoggingConfig::from_flags(false, Some("bogus"), false).level, "info");
        assert_eq!(LoggingConfig::from_flags(false, None, false).level, "info");
    }
}
