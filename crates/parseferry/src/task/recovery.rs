//! Recovery flows for batches restored from history.
//!
//! A batch whose process died mid-parse can resume polling where it left
//! off; a batch that already finished remotely can have its result packages
//! fetched again. Neither flow re-uploads anything.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::error;

use crate::api::RemoteService;
use crate::broadcast::{TaskEvent, TaskEventSender};
use crate::error::TaskError;
use crate::storage::ResultMaterializer;
use crate::task::model::{BatchTask, FileStatus, UploadFile, PENDING_LABEL};
use crate::task::poll::{PollLoop, AWAITING_LABEL};
use crate::task::CancelFlag;

/// Which recovery flow to run for a historical batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryMode {
    /// Pick the polling loop back up for a batch whose uploads finished.
    Resume,
    /// Fetch finished results again without touching uploads.
    Redownload,
}

/// Runs one recovery flow over a rehydrated task.
pub struct RecoveryExecution {
    task: BatchTask,
    remote: Arc<dyn RemoteService>,
    output_dir: PathBuf,
    mode: RecoveryMode,
    cancel: CancelFlag,
    events: TaskEventSender,
}

impl RecoveryExecution {
    pub fn new(
        mut task: BatchTask,
        remote: Arc<dyn RemoteService>,
        output_dir: impl Into<PathBuf>,
        mode: RecoveryMode,
        cancel: CancelFlag,
        events: TaskEventSender,
    ) -> Self {
        let output_dir = output_dir.into();
        task.output_dir = Some(output_dir.clone());
        Self {
            task,
            remote,
            output_dir,
            mode,
            cancel,
            events,
        }
    }

    /// Drives the recovery flow to a terminal event.
    pub async fn run(mut self) {
        let result = match self.mode {
            RecoveryMode::Resume => self.resume_polling().await,
            RecoveryMode::Redownload => self.redownload_results().await,
        };
        match result {
            Ok(()) => {
                self.events.send(TaskEvent::BatchCompleted {
                    task: self.task.clone(),
                });
            }
            Err(err) => {
                error!("Result recovery failed: {err}");
                self.events.send(TaskEvent::BatchFailed {
                    task: self.task.clone(),
                    message: err.to_string(),
                });
            }
        }
    }

    /// Rebuilds the pending set from the rehydrated files and re-enters the
    /// polling loop. Uploads already happened in the original run, so the
    /// progress baseline starts at the post-upload mark.
    async fn resume_polling(&mut self) -> Result<(), TaskError> {
        self.events.progress(40);
        let total = self.task.files.len().max(1);

        let mut pending = Vec::new();
        for index in 0..self.task.files.len() {
            let file = &mut self.task.files[index];
            if matches!(file.status, FileStatus::Completed | FileStatus::Failed) {
                self.events.file_updated(file);
                continue;
            }
            file.status = FileStatus::Processing;
            if file.progress_label.is_empty() || file.progress_label == PENDING_LABEL {
                file.progress_label = AWAITING_LABEL.to_string();
            }
            pending.push(index);
            self.events.file_updated(&self.task.files[index]);
        }

        if !pending.is_empty() {
            self.events.polling_status(format!(
                "resuming parse, {} / {} files remaining",
                pending.len(),
                total
            ));
        } else {
            self.events.polling_status("checking batch status");
        }

        PollLoop {
            task: &mut self.task,
            remote: self.remote.as_ref(),
            events: &self.events,
            cancel: &self.cancel,
            output_root: &self.output_dir,
        }
        .run(pending)
        .await
    }

    /// Fetches the batch snapshot once and re-downloads every finished
    /// result. Any file the service still reports as in flight aborts the
    /// whole flow so the caller can resume polling instead.
    async fn redownload_results(&mut self) -> Result<(), TaskError> {
        self.events.progress(0);
        let batch_id = self.task.batch_id.clone().unwrap_or_default();
        let status = self.remote.fetch_batch_status(&batch_id).await?;
        if status.extract_result.is_empty() {
            return Err(TaskError::EmptyStatus);
        }

        let total_items = status.extract_result.len();
        for (position, item) in status.extract_result.iter().enumerate() {
            let name = item
                .file_name
                .clone()
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| format!("file {}", position + 1));
            let state = item
                .state
                .as_deref()
                .unwrap_or_default()
                .to_ascii_lowercase();
            let index = self.ensure_file_item(&name);

            match state.as_str() {
                "done" => {
                    let zip_url = item
                        .full_zip_url
                        .as_deref()
                        .filter(|url| !url.is_empty())
                        .ok_or_else(|| TaskError::MissingResultLink { name: name.clone() })?;
                    let target_dir = self.download_and_store(&name, zip_url).await?;
                    let file = &mut self.task.files[index];
                    file.status = FileStatus::Completed;
                    file.error = None;
                    file.progress_label = "redownload complete".to_string();
                    self.events.log(format!(
                        "{name} results redownloaded to {}",
                        target_dir.display()
                    ));
                }
                "failed" | "error" => {
                    let message = item
                        .message
                        .clone()
                        .unwrap_or_else(|| "parsing failed".to_string());
                    let file = &mut self.task.files[index];
                    file.status = FileStatus::Failed;
                    file.error = Some(message.clone());
                    file.progress_label = "parse failed".to_string();
                    self.events.log(format!("{name} parse failed: {message}"));
                }
                _ => return Err(TaskError::BatchStillProcessing),
            }

            self.events.file_updated(&self.task.files[index]);
            self.events
                .progress(((position + 1) * 100 / total_items) as u8);
        }

        self.task.mark_completed();
        self.events.polling_status("redownload finished");
        Ok(())
    }

    /// Finds the tracked file for `display_name`, appending a placeholder
    /// when the remote service reports a file history never recorded.
    fn ensure_file_item(&mut self, display_name: &str) -> usize {
        if let Some(index) = self
            .task
            .files
            .iter()
            .position(|file| file.display_name == display_name)
        {
            return index;
        }
        self.task.files.push(UploadFile::placeholder(display_name));
        self.task.files.len() - 1
    }

    async fn download_and_store(&self, name: &str, zip_url: &str) -> Result<PathBuf, TaskError> {
        let package = self.remote.download_result(zip_url).await?;
        let batch_root = self
            .task
            .output_dir
            .clone()
            .unwrap_or_else(|| self.output_dir.clone());
        let stored = ResultMaterializer::new(batch_root).materialize(name, &package)?;
        if stored.summary_path.is_none() {
            self.events
                .log(format!("warning: no full.md found in results for {name}"));
        }
        Ok(stored.target_dir)
    }
}
