//! Batch history persisted as a JSON file.
//!
//! The file is an array of entries, newest first, trimmed to the configured
//! limit. Legacy files written by older releases are normalised on load.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::HistoryError;

// ─── Helpers ────────────────────────────────────────────────────────────────

/// Formats a timestamp the way entries store them, microsecond ISO-8601
/// without a zone suffix.
pub(crate) fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

/// Parses a stored timestamp back, tolerating a missing fractional part.
/// Returns None for anything unparseable, matching how entries written by
/// hand or by older releases are treated.
pub(crate) fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn now_iso() -> String {
    format_timestamp(Utc::now())
}

fn display_from_path(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn non_empty(value: &String) -> bool {
    !value.is_empty()
}

/// Default on-disk location, `.mineru_history.json` under the home directory.
pub fn default_history_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".mineru_history.json"))
}

// ─── Entry types ────────────────────────────────────────────────────────────

/// Lifecycle states recorded per history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryStatus {
    Uploading,
    Processing,
    Completed,
    Failed,
    Unknown,
}

impl HistoryStatus {
    fn parse(value: &str, batch_id: &str) -> Self {
        match value {
            "uploading" => Self::Uploading,
            "processing" => Self::Processing,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "unknown" => Self::Unknown,
            other => {
                log::warn!(
                    "Unknown history status '{}' for batch {}, treating as unknown",
                    other,
                    batch_id
                );
                Self::Unknown
            }
        }
    }
}

/// Reference to one input file as recorded in an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryFileRef {
    pub path: String,
    pub display_name: String,
}

/// One persisted batch record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    /// Server-issued batch identifier.
    pub batch_id: String,
    /// When the batch was created, ISO-8601.
    pub created_at: String,
    /// When the batch finished, if it did.
    pub completed_at: Option<String>,
    /// Sort key shown in the UI, falls back to completion then creation time.
    pub timestamp: String,
    /// Last recorded lifecycle state.
    pub status: HistoryStatus,
    /// Files that parsed successfully.
    pub success: u32,
    /// Files that failed.
    pub failed: u32,
    /// Directory results were written to.
    pub output_dir: String,
    /// Input files, used to rehydrate resume and redownload runs.
    pub files: Vec<HistoryFileRef>,
    /// Reason for the most recent failure, if any.
    pub last_error: Option<String>,
}

/// Raw on-disk shape, tolerant of legacy files.
#[derive(Debug, Deserialize)]
struct RawHistoryEntry {
    #[serde(default)]
    batch_id: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    completed_at: Option<String>,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    success: Option<u32>,
    #[serde(default)]
    failed: Option<u32>,
    #[serde(default)]
    output_dir: Option<String>,
    #[serde(default)]
    files: Vec<RawFileRef>,
    #[serde(default)]
    last_error: Option<String>,
}

/// Older releases stored files as plain path strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawFileRef {
    Detailed {
        #[serde(default)]
        path: Option<String>,
        #[serde(default)]
        display_name: Option<String>,
    },
    Plain(String),
}

impl HistoryFileRef {
    fn from_raw(raw: RawFileRef) -> Self {
        match raw {
            RawFileRef::Detailed { path, display_name } => {
                let path = path.unwrap_or_default();
                let display_name = display_name
                    .filter(non_empty)
                    .unwrap_or_else(|| display_from_path(&path));
                Self { path, display_name }
            }
            RawFileRef::Plain(path) => {
                let display_name = display_from_path(&path);
                Self { path, display_name }
            }
        }
    }
}

impl HistoryEntry {
    fn from_raw(raw: RawHistoryEntry) -> Self {
        let batch_id = raw.batch_id.unwrap_or_default();
        let created_at = raw
            .created_at
            .filter(non_empty)
            .or_else(|| raw.timestamp.clone().filter(non_empty))
            .unwrap_or_default();
        let completed_at = raw.completed_at.filter(non_empty);
        let status = match raw.status.as_deref() {
            None | Some("") => {
                if completed_at.is_some() {
                    HistoryStatus::Completed
                } else {
                    HistoryStatus::Unknown
                }
            }
            Some(value) => HistoryStatus::parse(value, &batch_id),
        };
        let mut entry = Self {
            batch_id,
            created_at,
            completed_at,
            timestamp: raw.timestamp.filter(non_empty).unwrap_or_default(),
            status,
            success: raw.success.unwrap_or(0),
            failed: raw.failed.unwrap_or(0),
            output_dir: raw.output_dir.unwrap_or_default(),
            files: raw.files.into_iter().map(HistoryFileRef::from_raw).collect(),
            last_error: raw.last_error,
        };
        entry.recompute_timestamp();
        entry
    }

    fn from_patch(batch_id: &str, patch: HistoryPatch) -> Self {
        let mut entry = Self {
            batch_id: batch_id.to_string(),
            created_at: patch.created_at.filter(non_empty).unwrap_or_else(now_iso),
            completed_at: patch.completed_at,
            timestamp: patch.timestamp.unwrap_or_default(),
            status: patch.status.unwrap_or(HistoryStatus::Unknown),
            success: patch.success.unwrap_or(0),
            failed: patch.failed.unwrap_or(0),
            output_dir: patch.output_dir.unwrap_or_default(),
            files: patch.files.unwrap_or_default(),
            last_error: patch.last_error,
        };
        entry.recompute_timestamp();
        entry
    }

    /// Merges the provided fields into this entry. Absent fields stay as they
    /// are, so a later failure reason survives intermediate status updates.
    fn apply(&mut self, patch: HistoryPatch) {
        if let Some(created_at) = patch.created_at {
            self.created_at = created_at;
        }
        if let Some(completed_at) = patch.completed_at {
            self.completed_at = Some(completed_at);
        }
        if let Some(timestamp) = patch.timestamp {
            self.timestamp = timestamp;
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(success) = patch.success {
            self.success = success;
        }
        if let Some(failed) = patch.failed {
            self.failed = failed;
        }
        if let Some(output_dir) = patch.output_dir {
            self.output_dir = output_dir;
        }
        if let Some(files) = patch.files {
            self.files = files;
        }
        if let Some(last_error) = patch.last_error {
            self.last_error = Some(last_error);
        }
        self.recompute_timestamp();
    }

    fn recompute_timestamp(&mut self) {
        if self.timestamp.is_empty() {
            self.timestamp = self
                .completed_at
                .clone()
                .filter(non_empty)
                .unwrap_or_else(|| self.created_at.clone());
        }
    }
}

/// Field set for an upsert. `None` leaves the stored value untouched.
#[derive(Debug, Default, Clone)]
pub struct HistoryPatch {
    pub created_at: Option<String>,
    pub completed_at: Option<String>,
    pub timestamp: Option<String>,
    pub status: Option<HistoryStatus>,
    pub success: Option<u32>,
    pub failed: Option<u32>,
    pub output_dir: Option<String>,
    pub files: Option<Vec<HistoryFileRef>>,
    pub last_error: Option<String>,
}

// ─── HistoryStore ───────────────────────────────────────────────────────────

/// Write-through store for history entries.
///
/// Every upsert mutates the in-memory list, trims it to the limit and
/// rewrites the backing file. Clones share the same list.
#[derive(Clone)]
pub struct HistoryStore {
    path: PathBuf,
    limit: Arc<AtomicUsize>,
    entries: Arc<RwLock<Vec<HistoryEntry>>>,
}

impl HistoryStore {
    /// Loads the store from `path`. A missing file yields an empty store, a
    /// corrupted one is discarded with a warning.
    pub fn load(path: impl Into<PathBuf>, limit: usize) -> Result<Self, HistoryError> {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(text) => parse_history(&text, limit),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(source) => return Err(HistoryError::ReadFile { path, source }),
        };
        Ok(Self {
            path,
            limit: Arc::new(AtomicUsize::new(limit)),
            entries: Arc::new(RwLock::new(entries)),
        })
    }

    /// Adjusts how many entries are kept. Takes effect on the next upsert.
    pub fn set_limit(&self, limit: usize) {
        self.limit.store(limit, Ordering::Relaxed);
    }

    /// Snapshot of all entries, newest first.
    pub fn entries(&self) -> Vec<HistoryEntry> {
        let entries = match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("History lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        entries.clone()
    }

    /// Looks up the entry for a batch id.
    pub fn find(&self, batch_id: &str) -> Option<HistoryEntry> {
        let entries = match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("History lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        entries.iter().find(|entry| entry.batch_id == batch_id).cloned()
    }

    /// Inserts or updates the entry for `batch_id` and persists the result.
    ///
    /// New entries go to the front; updated entries keep their position.
    /// Returns the post-update snapshot.
    pub fn upsert(
        &self,
        batch_id: &str,
        patch: HistoryPatch,
    ) -> Result<Vec<HistoryEntry>, HistoryError> {
        let snapshot = {
            let mut entries = match self.entries.write() {
                Ok(guard) => guard,
                Err(poisoned) => {
                    log::warn!("History lock was poisoned, recovering");
                    poisoned.into_inner()
                }
            };
            match entries.iter_mut().find(|entry| entry.batch_id == batch_id) {
                Some(entry) => entry.apply(patch),
                None => entries.insert(0, HistoryEntry::from_patch(batch_id, patch)),
            }
            let limit = self.limit.load(Ordering::Relaxed);
            entries.truncate(limit);
            entries.clone()
        };
        self.save(&snapshot)?;
        Ok(snapshot)
    }

    fn save(&self, entries: &[HistoryEntry]) -> Result<(), HistoryError> {
        let serialized = serde_json::to_string_pretty(entries)?;
        std::fs::write(&self.path, serialized).map_err(|source| HistoryError::WriteFile {
            path: self.path.clone(),
            source,
        })
    }
}

fn parse_history(text: &str, limit: usize) -> Vec<HistoryEntry> {
    let raw: serde_json::Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(_) => {
            log::warn!("History file is corrupted, starting fresh");
            return Vec::new();
        }
    };
    let Some(items) = raw.as_array() else {
        log::warn!("History file is corrupted, starting fresh");
        return Vec::new();
    };

    let mut entries = Vec::new();
    for item in items {
        if !item.is_object() {
            continue;
        }
        match serde_json::from_value::<RawHistoryEntry>(item.clone()) {
            Ok(raw_entry) => entries.push(HistoryEntry::from_raw(raw_entry)),
            Err(err) => log::warn!("Skipping malformed history entry: {}", err),
        }
    }
    entries.truncate(limit);
    entries
}
