//! Remote parsing service seam and its wire types.

pub mod client;

pub use client::HttpRemoteService;

use std::path::Path;

use serde::Deserialize;

use crate::config::ParseOptions;
use crate::error::ApiError;
use crate::task::UploadFile;

/// Identifier and signed upload URLs issued for a new batch.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BatchCreation {
    pub batch_id: String,
    pub file_urls: Vec<String>,
}

/// Snapshot of a batch's extraction state.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BatchStatus {
    #[serde(default)]
    pub extract_result: Vec<ExtractItem>,
}

/// Per-file state within a status snapshot. Every field is optional; the
/// service omits what it does not know yet.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtractItem {
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub full_zip_url: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub extract_progress: Option<ExtractProgress>,
}

/// Page counters reported while a file is being parsed.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ExtractProgress {
    #[serde(default)]
    pub extracted_pages: Option<u32>,
    #[serde(default)]
    pub total_pages: Option<u32>,
}

/// Operations an execution needs from the parsing service.
///
/// Executions only ever see this trait, so tests swap the HTTP client for
/// in-memory fakes.
#[async_trait::async_trait]
pub trait RemoteService: Send + Sync {
    /// Requests a new batch, returning its id and one signed upload URL per
    /// file, in file order.
    async fn create_batch(
        &self,
        files: &[UploadFile],
        options: &ParseOptions,
    ) -> Result<BatchCreation, ApiError>;

    /// Uploads a local file's bytes to a signed URL.
    async fn upload_file(&self, signed_url: &str, path: &Path) -> Result<(), ApiError>;

    /// Fetches the latest extraction snapshot for a batch.
    async fn fetch_batch_status(&self, batch_id: &str) -> Result<BatchStatus, ApiError>;

    /// Downloads a finished result package.
    async fn download_result(&self, url: &str) -> Result<Vec<u8>, ApiError>;
}
