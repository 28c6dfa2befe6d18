//! Persisted client configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Schema version written by [`save_config`]. Files predating versioning
/// load as version 0.
pub const CONFIG_VERSION: u32 = 1;

fn default_true() -> bool {
    true
}

fn default_language() -> String {
    "ch".to_string()
}

fn default_concurrency() -> u32 {
    2
}

fn default_max_retry_attempts() -> u32 {
    2
}

fn default_history_limit() -> usize {
    20
}

/// Default on-disk location, `.mineru_config.json` under the home directory.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|home| home.join(".mineru_config.json"))
        .ok_or(ConfigError::NoHomeDirectory)
}

/// Per-request parse flags plus upload behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseOptions {
    /// Force OCR during parsing.
    #[serde(default)]
    pub is_ocr: bool,
    /// Enable formula detection.
    #[serde(default = "default_true")]
    pub enable_formula: bool,
    /// Enable table detection.
    #[serde(default = "default_true")]
    pub enable_table: bool,
    /// Document language hint. Empty values normalise to `ch` on load.
    #[serde(default = "default_language")]
    pub language: String,
    /// Maximum parallel uploads, 1 to 8.
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,
    /// Retry failed uploads automatically.
    #[serde(default = "default_true")]
    pub auto_retry: bool,
    /// Automatic retry attempts per file, 0 to 5.
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            is_ocr: false,
            enable_formula: true,
            enable_table: true,
            language: default_language(),
            concurrency: default_concurrency(),
            auto_retry: true,
            max_retry_attempts: default_max_retry_attempts(),
        }
    }
}

/// Root persisted configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub version: u32,
    /// Bearer token for the parsing service.
    #[serde(default)]
    pub api_key: String,
    /// Where result packages land. Empty means "choose per batch".
    #[serde(default)]
    pub output_dir: String,
    #[serde(default)]
    pub options: ParseOptions,
    /// How many history entries to keep, 1 to 200.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            api_key: String::new(),
            output_dir: String::new(),
            options: ParseOptions::default(),
            history_limit: default_history_limit(),
        }
    }
}

impl AppConfig {
    /// Checks the numeric bounds on options and history limit.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=8).contains(&self.options.concurrency) {
            return Err(ConfigError::Validation {
                message: format!(
                    "concurrency must be between 1 and 8, got {}",
                    self.options.concurrency
                ),
            });
        }
        if self.options.max_retry_attempts > 5 {
            return Err(ConfigError::Validation {
                message: format!(
                    "max_retry_attempts must be between 0 and 5, got {}",
                    self.options.max_retry_attempts
                ),
            });
        }
        if !(1..=200).contains(&self.history_limit) {
            return Err(ConfigError::Validation {
                message: format!(
                    "history_limit must be between 1 and 200, got {}",
                    self.history_limit
                ),
            });
        }
        Ok(())
    }
}

/// Loads configuration from `path`. A missing file yields defaults.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig, ConfigError> {
    let path = path.as_ref();
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(AppConfig::default());
        }
        Err(source) => {
            return Err(ConfigError::ReadFile {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<AppConfig, ConfigError> {
    let value: serde_json::Value = serde_json::from_str(content)?;
    if value.as_object().is_some_and(|map| map.is_empty()) {
        return Ok(AppConfig::default());
    }

    let mut config: AppConfig = serde_json::from_value(value)?;
    if config.options.language.is_empty() {
        config.options.language = default_language();
    }
    config.validate()?;
    Ok(config)
}

/// Persists the configuration as pretty-printed JSON.
pub fn save_config(config: &AppConfig, path: impl AsRef<Path>) -> Result<(), ConfigError> {
    let path = path.as_ref();
    let serialized = serde_json::to_string_pretty(config)?;
    std::fs::write(path, serialized).map_err(|source| ConfigError::WriteFile {
        path: path.to_path_buf(),
        source,
    })
}
