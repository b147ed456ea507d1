//! Daemon configuration.
//!
//! Loaded from an optional TOML file, then overridden by `FFD_`-prefixed
//! environment variables. Parse problems are collected and reported together
//! rather than failing on the first one.

use std::env;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use crate::bucket::DEFAULT_BUCKET_SALT;

/// Environment variable prefix.
const ENV_PREFIX: &str = "FFD_";

/// Default admin/evaluation HTTP port.
pub const DEFAULT_PORT: u16 = 8787;

/// Default evaluation-log queue capacity.
pub const DEFAULT_EVAL_LOG_CAPACITY: usize = 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid TOML in {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid environment overrides: {0}")]
    Env(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Daemon configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FfdConfig {
    /// Port for the admin and evaluation HTTP surface.
    pub port: u16,
    /// Bounded capacity of the evaluation-log queue; overflow is dropped.
    pub eval_log_capacity: usize,
    /// Salt mixed into sticky rollout buckets. Changing this reshuffles
    /// every in-flight percentage rollout.
    pub bucket_salt: String,
    /// Append-only JSONL file for the audit ledger. None = memory only.
    pub history_file: Option<PathBuf>,
    /// Emit logs as JSON lines instead of human-readable text.
    pub log_json: bool,
}

impl Default for FfdConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            eval_log_capacity: DEFAULT_EVAL_LOG_CAPACITY,
            bucket_salt: DEFAULT_BUCKET_SALT.to_string(),
            history_file: None,
            log_json: false,
        }
    }
}

impl FfdConfig {
    /// Default config file location (`<config dir>/ffd/ffd.toml`), if a
    /// platform config directory exists.
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "ffd")
            .map(|dirs| dirs.config_dir().join("ffd.toml"))
    }

    /// Load from the given file (or defaults when absent), then apply
    /// environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) if path.exists() => {
                let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                toml::from_str(&raw).map_err(|source| ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?
            }
            Some(path) => {
                warn!("config file {} not found, using defaults", path.display());
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `FFD_`-prefixed environment overrides, collecting all errors.
    fn apply_env(&mut self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        if let Ok(value) = env::var(format!("{ENV_PREFIX}PORT")) {
            match value.parse::<u16>() {
                Ok(port) => self.port = port,
                Err(_) => errors.push(format!("FFD_PORT: expected port number, got '{value}'")),
            }
        }
        if let Ok(value) = env::var(format!("{ENV_PREFIX}EVAL_LOG_CAPACITY")) {
            match value.parse::<usize>() {
                Ok(cap) => self.eval_log_capacity = cap,
                Err(_) => {
                    errors.push(format!("FFD_EVAL_LOG_CAPACITY: expected integer, got '{value}'"))
                }
            }
        }
        if let Ok(value) = env::var(format!("{ENV_PREFIX}BUCKET_SALT")) {
            self.bucket_salt = value;
        }
        if let Ok(value) = env::var(format!("{ENV_PREFIX}HISTORY_FILE")) {
            self.history_file = Some(PathBuf::from(value));
        }
        if let Ok(value) = env::var(format!("{ENV_PREFIX}LOG_JSON")) {
            match value.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => self.log_json = true,
                "0" | "false" | "no" => self.log_json = false,
                _ => errors.push(format!("FFD_LOG_JSON: expected boolean, got '{value}'")),
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Env(errors.join("; ")))
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::Invalid("port must be nonzero".into()));
        }
        if self.eval_log_capacity == 0 {
            return Err(ConfigError::Invalid(
                "eval_log_capacity must be at least 1".into(),
            ));
        }
        if self.bucket_salt.is_empty() {
            return Err(ConfigError::Invalid("bucket_salt must not be empty".into()));
        }
        Ok(())
    }
}
