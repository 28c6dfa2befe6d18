//! Data model shared by executions, the orchestrator, and observers.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Initial progress label for freshly selected files.
pub(crate) const PENDING_LABEL: &str = "pending upload";

/// Runtime lifecycle states for individual upload files.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Pending,
    Uploading,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl FileStatus {
    /// Returns true once a file can no longer change state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FileStatus::Completed | FileStatus::Failed | FileStatus::Cancelled
        )
    }
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileStatus::Pending => write!(f, "pending"),
            FileStatus::Uploading => write!(f, "uploading"),
            FileStatus::Processing => write!(f, "processing"),
            FileStatus::Completed => write!(f, "completed"),
            FileStatus::Failed => write!(f, "failed"),
            FileStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A single file tracked through upload and parsing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadFile {
    /// Local source path. For placeholder entries reconstructed from a remote
    /// snapshot this is the display name itself.
    pub path: PathBuf,
    /// Filename as submitted to (and reported back by) the remote service.
    pub display_name: String,
    pub status: FileStatus,
    /// Human-readable progress label shown next to the file.
    pub progress_label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Upload attempts made so far, counting the first try.
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
}

impl UploadFile {
    /// Creates a tracked file for a local path; the display name is the
    /// path's final component.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let display_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        Self::from_parts(path, display_name)
    }

    /// Creates a tracked file with an explicit display name (history
    /// rehydration keeps whatever name was persisted).
    pub fn from_parts(path: impl Into<PathBuf>, display_name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            display_name: display_name.into(),
            status: FileStatus::Pending,
            progress_label: PENDING_LABEL.to_string(),
            error: None,
            attempts: 0,
            remote_id: None,
        }
    }

    /// Creates a placeholder for a file the remote service reports but the
    /// local task never tracked; the display name doubles as the path.
    pub fn placeholder(display_name: impl Into<String>) -> Self {
        let display_name = display_name.into();
        Self::from_parts(PathBuf::from(&display_name), display_name)
    }
}

/// Which flow constructed a batch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BatchKind {
    #[default]
    Standard,
    Recovery,
    Redownload,
}

/// One batch upload session, owned by its execution until a terminal
/// event hands it back to the orchestrator.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchTask {
    /// Assigned by the remote service on creation; None until then.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
    pub files: Vec<UploadFile>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub kind: BatchKind,
    /// Per-batch output subdirectory, set once the batch id is known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
}

impl BatchTask {
    /// Creates a fresh standard batch over the given files.
    pub fn new(files: Vec<UploadFile>) -> Self {
        Self {
            batch_id: None,
            files,
            created_at: Utc::now(),
            completed_at: None,
            kind: BatchKind::Standard,
            output_dir: None,
        }
    }

    /// Creates a batch reconstructed from history for recovery flows.
    pub fn rehydrated(
        batch_id: impl Into<String>,
        files: Vec<UploadFile>,
        kind: BatchKind,
        output_dir: impl AsRef<Path>,
    ) -> Self {
        Self {
            batch_id: Some(batch_id.into()),
            files,
            created_at: Utc::now(),
            completed_at: None,
            kind,
            output_dir: Some(output_dir.as_ref().to_path_buf()),
        }
    }

    /// Stamps the completion timestamp.
    pub fn mark_completed(&mut self) {
        self.completed_at = Some(Utc::now());
    }

    pub fn success_count(&self) -> usize {
        self.files
            .iter()
            .filter(|f| f.status == FileStatus::Completed)
            .count()
    }

    pub fn failure_count(&self) -> usize {
        self.files
            .iter()
            .filter(|f| f.status == FileStatus::Failed)
            .count()
    }

    pub fn cancelled_count(&self) -> usize {
        self.files
            .iter()
            .filter(|f| f.status == FileStatus::Cancelled)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_from_path() {
        let file = UploadFile::new("/tmp/docs/report.pdf");
        assert_eq!(file.display_name, "report.pdf");
        assert_eq!(file.status, FileStatus::Pending);
        assert_eq!(file.progress_label, PENDING_LABEL);
        assert_eq!(file.attempts, 0);
    }

    #[test]
    fn test_placeholder_path_is_display_name() {
        let file = UploadFile::placeholder("scan.pdf");
        assert_eq!(file.path, PathBuf::from("scan.pdf"));
        assert_eq!(file.display_name, "scan.pdf");
    }

    #[test]
    fn test_terminal_states() {
        assert!(FileStatus::Completed.is_terminal());
        assert!(FileStatus::Failed.is_terminal());
        assert!(FileStatus::Cancelled.is_terminal());
        assert!(!FileStatus::Pending.is_terminal());
        assert!(!FileStatus::Uploading.is_terminal());
        assert!(!FileStatus::Processing.is_terminal());
    }

    #[test]
    fn test_task_counts() {
        let mut task = BatchTask::new(vec![
            UploadFile::new("/tmp/a.pdf"),
            UploadFile::new("/tmp/b.pdf"),
            UploadFile::new("/tmp/c.pdf"),
        ]);
        task.files[0].status = FileStatus::Completed;
        task.files[1].status = FileStatus::Failed;
        task.files[2].status = FileStatus::Cancelled;

        assert_eq!(task.success_count(), 1);
        assert_eq!(task.failure_count(), 1);
        assert_eq!(task.cancelled_count(), 1);
    }

    #[test]
    fn test_mark_completed_stamps_time() {
        let mut task = BatchTask::new(vec![]);
        assert!(task.completed_at.is_none());
        task.mark_completed();
        assert!(task.completed_at.is_some());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&FileStatus::Processing).unwrap();
        assert_eq!(json, "\"processing\"");
    }
}
