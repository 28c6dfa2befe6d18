//! Scripted in-memory stand-in for the remote parsing service.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use parseferry::api::{BatchCreation, BatchStatus, ExtractItem, ExtractProgress, RemoteService};
use parseferry::config::ParseOptions;
use parseferry::error::ApiError;
use parseferry::task::UploadFile;

/// In-memory `RemoteService` whose responses are scripted up front.
///
/// Status snapshots are consumed front to back, one per poll. When the script
/// runs dry the fake returns an error, so a test that polls more often than
/// it scripted fails loudly instead of spinning forever.
pub struct FakeRemoteService {
    create_response: Mutex<Option<Result<BatchCreation, ApiError>>>,
    status_script: Mutex<VecDeque<BatchStatus>>,
    packages: Mutex<HashMap<String, Vec<u8>>>,
    upload_failures: Mutex<HashMap<String, u32>>,
    uploads: Mutex<Vec<PathBuf>>,
    status_fetches: Mutex<u32>,
}

impl FakeRemoteService {
    pub fn new() -> Self {
        Self {
            create_response: Mutex::new(None),
            status_script: Mutex::new(VecDeque::new()),
            packages: Mutex::new(HashMap::new()),
            upload_failures: Mutex::new(HashMap::new()),
            uploads: Mutex::new(Vec::new()),
            status_fetches: Mutex::new(0),
        }
    }

    /// Overrides the next `create_batch` response. Without an override the
    /// fake issues batch `batch-1` with one upload URL per file.
    pub fn script_create(&self, response: Result<BatchCreation, ApiError>) {
        *self.create_response.lock().unwrap() = Some(response);
    }

    /// Appends one status snapshot to the poll script.
    pub fn push_status(&self, items: Vec<ExtractItem>) {
        self.status_script.lock().unwrap().push_back(BatchStatus {
            extract_result: items,
        });
    }

    /// Registers the package bytes served for a result URL.
    pub fn put_package(&self, url: &str, bytes: Vec<u8>) {
        self.packages.lock().unwrap().insert(url.to_string(), bytes);
    }

    /// Makes the next `times` uploads of `file_name` fail.
    pub fn fail_uploads(&self, file_name: &str, times: u32) {
        self.upload_failures
            .lock()
            .unwrap()
            .insert(file_name.to_string(), times);
    }

    /// Paths of every successful upload, in order.
    pub fn uploaded_paths(&self) -> Vec<PathBuf> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }

    /// Number of status fetches performed so far.
    pub fn fetch_count(&self) -> u32 {
        *self.status_fetches.lock().unwrap()
    }
}

#[async_trait::async_trait]
impl RemoteService for FakeRemoteService {
    async fn create_batch(
        &self,
        files: &[UploadFile],
        _options: &ParseOptions,
    ) -> Result<BatchCreation, ApiError> {
        if let Some(response) = self.create_response.lock().unwrap().take() {
            return response;
        }
        Ok(BatchCreation {
            batch_id: "batch-1".to_string(),
            file_urls: (0..files.len())
                .map(|index| format!("https://upload.test/{index}"))
                .collect(),
        })
    }

    async fn upload_file(&self, _signed_url: &str, path: &Path) -> Result<(), ApiError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        {
            let mut failures = self.upload_failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(&name) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(ApiError::new(format!("connection reset during {name}")));
                }
            }
        }
        self.uploads.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }

    async fn fetch_batch_status(&self, _batch_id: &str) -> Result<BatchStatus, ApiError> {
        *self.status_fetches.lock().unwrap() += 1;
        match self.status_script.lock().unwrap().pop_front() {
            Some(status) => Ok(status),
            None => Err(ApiError::new("status script exhausted")),
        }
    }

    async fn download_result(&self, url: &str) -> Result<Vec<u8>, ApiError> {
        self.packages
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| ApiError::new(format!("no package scripted for {url}")))
    }
}

/// Builds a status item with just a name and state.
pub fn item(name: &str, state: &str) -> ExtractItem {
    ExtractItem {
        file_name: Some(name.to_string()),
        state: Some(state.to_string()),
        ..ExtractItem::default()
    }
}

/// Builds a `done` item pointing at a result package URL.
pub fn done_item(name: &str, zip_url: &str) -> ExtractItem {
    ExtractItem {
        full_zip_url: Some(zip_url.to_string()),
        ..item(name, "done")
    }
}

/// Builds a `failed` item carrying a service error message.
pub fn failed_item(name: &str, message: &str) -> ExtractItem {
    ExtractItem {
        message: Some(message.to_string()),
        ..item(name, "failed")
    }
}

/// Builds a `running` item with page progress counters.
pub fn running_item(name: &str, extracted: u32, total: u32) -> ExtractItem {
    ExtractItem {
        extract_progress: Some(ExtractProgress {
            extracted_pages: Some(extracted),
            total_pages: Some(total),
        }),
        ..item(name, "running")
    }
}

/// Builds a zip result package with a top-level `full.md` next to auxiliary
/// entries, mirroring what the parsing service produces.
pub fn result_package(summary: &str) -> Vec<u8> {
    package_with_entries(&[
        ("full.md", summary),
        ("images/page_1.png", "png-bytes"),
        ("layout.json", "{}"),
    ])
}

/// Builds a package that lacks the `full.md` summary entry.
pub fn package_without_summary() -> Vec<u8> {
    package_with_entries(&[("layout.json", "{}")])
}

fn package_with_entries(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut cursor);
        let options = zip::write::SimpleFileOptions::default();
        for (name, contents) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(contents.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }
    cursor.into_inner()
}
