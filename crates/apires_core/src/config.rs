//! Process configuration for the resource store.
//!
//! # Responsibility
//! - Describe where the database lives and how logging is set up.
//! - Load configuration from JSON and reject invalid values early.
//!
//! # Invariants
//! - A validated config always has a non-empty `db_path`.
//! - `log_dir`, when present, is absolute (same rule as `init_logging`).

use crate::logging::{default_log_level, normalize_level};
use serde::Deserialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Errors raised while loading or validating configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Config file could not be read.
    Io(std::io::Error),
    /// Config text is not valid JSON for [`CoreConfig`].
    Parse(serde_json::Error),
    /// A field holds a value outside its contract.
    Invalid {
        field: &'static str,
        message: String,
    },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "failed to read config: {err}"),
            Self::Parse(err) => write!(f, "failed to parse config: {err}"),
            Self::Invalid { field, message } => write!(f, "invalid config `{field}`: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Parse(err) => Some(err),
            Self::Invalid { .. } => None,
        }
    }
}

/// Runtime configuration consumed by `open_db_with_config` and the CLI.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoreConfig {
    /// SQLite file path, or `:memory:` for a private in-memory database.
    pub db_path: String,
    /// One of `trace|debug|info|warn|error`.
    #[serde(default = "default_level_string")]
    pub log_level: String,
    /// Absolute directory for rolling log files. Logging stays off when unset.
    #[serde(default)]
    pub log_dir: Option<String>,
    /// How long a writer waits on a locked database before failing.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl CoreConfig {
    /// Builds a config with defaults for everything but the database path.
    pub fn with_db_path(db_path: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
            log_level: default_level_string(),
            log_dir: None,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }

    /// Parses and validates a JSON config document.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_json_str(&text)
    }

    /// Checks field-level constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.db_path.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "db_path",
                message: "must not be empty".to_string(),
            });
        }

        normalize_level(&self.log_level).map_err(|message| ConfigError::Invalid {
            field: "log_level",
            message,
        })?;

        if let Some(log_dir) = self.log_dir.as_deref() {
            if !Path::new(log_dir.trim()).is_absolute() {
                return Err(ConfigError::Invalid {
                    field: "log_dir",
                    message: format!("must be an absolute path, got `{log_dir}`"),
                });
            }
        }

        if self.busy_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "busy_timeout_ms",
                message: "must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}

fn default_level_string() -> String {
    default_log_level().to_string()
}

fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, CoreConfig};

    #[test]
    fn minimal_config_fills_defaults() {
        let config = CoreConfig::from_json_str(r#"{ "db_path": "store.db" }"#).unwrap();
        assert_eq!(config.db_path, "store.db");
        assert_eq!(config.busy_timeout_ms, 5_000);
        assert!(config.log_dir.is_none());
        assert!(!config.log_level.is_empty());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = CoreConfig::from_json_str(r#"{ "db_path": "a.db", "dbpath": "b.db" }"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn relative_log_dir_is_rejected() {
        let err = CoreConfig::from_json_str(r#"{ "db_path": "a.db", "log_dir": "logs" }"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "log_dir", .. }));
    }

    #[test]
    fn unsupported_level_is_rejected() {
        let err = CoreConfig::from_json_str(r#"{ "db_path": "a.db", "log_level": "loud" }"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "log_level", .. }));
    }

    #[test]
    fn blank_db_path_is_rejected() {
        let err = CoreConfig::with_db_path("  ").validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "db_path", .. }));
    }
}
