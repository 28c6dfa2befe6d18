use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParseferryError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("History error: {0}")]
    History(#[from] HistoryError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("API error: {0}")]
    Api(#[from] ApiError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write config file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Could not determine home directory")]
    NoHomeDirectory,
}

#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("Failed to read history file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write history file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize history: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove directory '{path}': {source}")]
    RemoveDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to extract result archive: {0}")]
    Archive(String),

    #[error("Failed to copy summary from '{from}' to '{to}': {source}")]
    CopySummary {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("a task is already running, wait for it to finish")]
    Busy,

    #[error("task cancelled")]
    Cancelled,

    #[error("all uploads failed, batch aborted")]
    AllUploadsFailed,

    #[error("batch returned {got} upload URLs for {expected} files")]
    UrlCountMismatch { expected: usize, got: usize },

    #[error("no history entry for batch {batch_id}")]
    MissingHistory { batch_id: String },

    #[error("output directory does not exist: {path}")]
    OutputDirMissing { path: PathBuf },

    #[error("no batch status returned")]
    EmptyStatus,

    #[error("missing result link for {name}")]
    MissingResultLink { name: String },

    #[error("batch still processing, resume polling first")]
    BatchStillProcessing,

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Remote-service failure carrying whatever context the server returned.
#[derive(Debug, Clone)]
pub struct ApiError {
    pub message: String,
    pub status_code: Option<u16>,
    pub payload: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_code: None,
            payload: None,
        }
    }

    pub fn with_status(message: impl Into<String>, status_code: u16) -> Self {
        Self {
            message: message.into(),
            status_code: Some(status_code),
            payload: None,
        }
    }

    pub fn with_payload(
        message: impl Into<String>,
        status_code: Option<u16>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            message: message.into(),
            status_code,
            payload: Some(payload),
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(code) = self.status_code {
            write!(f, " (status {})", code)?;
        }
        Ok(())
    }
}

impl std::error::Error for ApiError {}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        Self {
            message: err.to_string(),
            status_code: err.status().map(|s| s.as_u16()),
            payload: None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ParseferryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_display_with_status() {
        let err = ApiError::with_status("upload rejected", 403);
        assert_eq!(err.to_string(), "upload rejected (status 403)");
    }

    #[test]
    fn test_api_error_display_without_status() {
        let err = ApiError::new("connection reset");
        assert_eq!(err.to_string(), "connection reset");
    }

    #[test]
    fn test_task_error_wraps_api_error() {
        let err: TaskError = ApiError::with_status("bad gateway", 502).into();
        assert_eq!(err.to_string(), "bad gateway (status 502)");
    }
}
