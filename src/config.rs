//! Engine configuration (`strata.toml`).
//!
//! Every section and field is optional; a missing file yields defaults.
//! Unknown fields are rejected so typos surface immediately.

use std::fmt;
use std::path::Path;

use serde::Deserialize;

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

/// Top-level configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// `[engine]` section.
    #[serde(default)]
    pub engine: EngineSection,

    /// `[history]` section.
    #[serde(default)]
    pub history: HistoryConfig,

    /// `[sync]` section.
    #[serde(default)]
    pub sync: SyncConfig,

    /// `[logging]` section.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// `[engine]` settings applied when a store is bootstrapped.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineSection {
    /// Enable deterministic ids and timestamps from the first write.
    #[serde(default)]
    pub deterministic_mode: bool,

    /// Name of the version created (and activated) at bootstrap.
    #[serde(default = "default_main_version_name")]
    pub main_version_name: String,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            deterministic_mode: false,
            main_version_name: default_main_version_name(),
        }
    }
}

fn default_main_version_name() -> String {
    "main".to_owned()
}

/// `[history]` settings for as-of-commit queries.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HistoryConfig {
    /// Ancestry depth used when the caller passes none.
    #[serde(default = "default_history_depth")]
    pub default_depth: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            default_depth: default_history_depth(),
        }
    }
}

const fn default_history_depth() -> usize {
    4096
}

/// `[sync]` settings for the push/pull coordinator.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    /// Base URL of the sync server (e.g. `"https://sync.example.com"`).
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Store id to present to the server. Defaults to the local store id.
    #[serde(default)]
    pub store_id: Option<String>,

    /// Attempts per pull or push before a retryable error is surfaced.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Per-request timeout for HTTP transports.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            store_id: None,
            max_attempts: default_max_attempts(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_timeout_secs() -> u64 {
    30
}

/// `[logging]` settings consumed by [`crate::telemetry::init`].
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Filter directive used when `STRATA_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_owned()
}

/// Log output format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// No subscriber is installed.
    #[default]
    Off,
    /// Human-readable lines on stderr.
    Pretty,
    /// One JSON object per event on stderr.
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Off => write!(f, "off"),
            Self::Pretty => write!(f, "pretty"),
            Self::Json => write!(f, "json"),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Error loading a configuration file.
#[derive(Debug)]
pub struct ConfigError {
    /// The path that was being loaded (if available).
    pub path: Option<std::path::PathBuf>,
    /// Human-readable message with line-level detail when possible.
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(p) = &self.path {
            write!(f, "{}: {}", p.display(), self.message)
        } else {
            write!(f, "config error: {}", self.message)
        }
    }
}

impl std::error::Error for ConfigError {}

impl EngineConfig {
    /// Load configuration from a TOML file.
    ///
    /// A missing file yields defaults.
    ///
    /// # Errors
    /// Returns `ConfigError` on I/O errors (other than not-found) or parse errors.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError {
                    path: Some(path.to_owned()),
                    message: format!("could not read file: {e}"),
                });
            }
        };
        Self::from_toml_str(&contents).map_err(|mut e| {
            e.path = Some(path.to_owned());
            e
        })
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `ConfigError` on invalid TOML, unknown fields, or a zero
    /// `sync.max_attempts`.
    pub fn from_toml_str(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml_str).map_err(|e| {
            let mut message = e.message().to_owned();
            if let Some(span) = e.span() {
                let line = toml_str[..span.start]
                    .chars()
                    .filter(|&c| c == '\n')
                    .count()
                    + 1;
                message = format!("line {line}: {message}");
            }
            ConfigError {
                path: None,
                message,
            }
        })?;
        if config.sync.max_attempts == 0 {
            return Err(ConfigError {
                path: None,
                message: "sync.max_attempts must be at least 1".to_owned(),
            });
        }
        Ok(config)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_all_fields() {
        let cfg = EngineConfig::default();
        assert!(!cfg.engine.deterministic_mode);
        assert_eq!(cfg.engine.main_version_name, "main");
        assert_eq!(cfg.history.default_depth, 4096);
        assert_eq!(cfg.sync.endpoint, None);
        assert_eq!(cfg.sync.max_attempts, 3);
        assert_eq!(cfg.sync.timeout_secs, 30);
        assert_eq!(cfg.logging.format, LogFormat::Off);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn parse_empty_string() {
        assert_eq!(EngineConfig::from_toml_str("").unwrap(), EngineConfig::default());
    }

    #[test]
    fn parse_full_config() {
        let cfg = EngineConfig::from_toml_str(
            r#"
[engine]
deterministic_mode = true
main_version_name = "trunk"

[history]
default_depth = 10

[sync]
endpoint = "http://localhost:3005"
store_id = "abc"
max_attempts = 5
timeout_secs = 2

[logging]
format = "json"
level = "debug"
"#,
        )
        .unwrap();
        assert!(cfg.engine.deterministic_mode);
        assert_eq!(cfg.engine.main_version_name, "trunk");
        assert_eq!(cfg.history.default_depth, 10);
        assert_eq!(cfg.sync.endpoint.as_deref(), Some("http://localhost:3005"));
        assert_eq!(cfg.sync.store_id.as_deref(), Some("abc"));
        assert_eq!(cfg.sync.max_attempts, 5);
        assert_eq!(cfg.logging.format, LogFormat::Json);
    }

    #[test]
    fn parse_rejects_unknown_nested_field() {
        let err = EngineConfig::from_toml_str("[history]\ndepth = 3\n").unwrap_err();
        assert!(err.message.contains("line 2"), "{}", err.message);
    }

    #[test]
    fn parse_rejects_unknown_format() {
        assert!(EngineConfig::from_toml_str("[logging]\nformat = \"xml\"\n").is_err());
    }

    #[test]
    fn parse_rejects_zero_attempts() {
        let err = EngineConfig::from_toml_str("[sync]\nmax_attempts = 0\n").unwrap_err();
        assert!(err.message.contains("max_attempts"));
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let cfg = EngineConfig::load(Path::new("/nonexistent/strata.toml")).unwrap();
        assert_eq!(cfg, EngineConfig::default());
    }
}
