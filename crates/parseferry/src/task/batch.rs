//! Execution of a freshly submitted batch: registration, uploads with
//! retry, then the shared polling loop.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::api::RemoteService;
use crate::broadcast::{TaskEvent, TaskEventSender};
use crate::config::ParseOptions;
use crate::error::{StorageError, TaskError};
use crate::task::model::{BatchTask, FileStatus};
use crate::task::poll::{PollLoop, AWAITING_LABEL};
use crate::task::CancelFlag;

/// Base delay between upload retries; multiplied by the failure count.
const UPLOAD_RETRY_BACKOFF: Duration = Duration::from_millis(1500);

/// Runs one new batch end to end.
///
/// The execution owns its task and reports exclusively through the event
/// channel; it always finishes with either [`TaskEvent::BatchCompleted`] or
/// [`TaskEvent::BatchFailed`].
pub struct BatchExecution {
    task: BatchTask,
    remote: Arc<dyn RemoteService>,
    options: ParseOptions,
    output_root: PathBuf,
    cancel: CancelFlag,
    events: TaskEventSender,
}

impl BatchExecution {
    pub fn new(
        task: BatchTask,
        remote: Arc<dyn RemoteService>,
        options: ParseOptions,
        output_root: impl Into<PathBuf>,
        cancel: CancelFlag,
        events: TaskEventSender,
    ) -> Self {
        Self {
            task,
            remote,
            options,
            output_root: output_root.into(),
            cancel,
            events,
        }
    }

    /// Drives the batch to a terminal event.
    pub async fn run(mut self) {
        match self.execute().await {
            Ok(()) => {
                self.events.send(TaskEvent::BatchCompleted {
                    task: self.task.clone(),
                });
            }
            Err(err) => {
                error!("Batch execution failed: {err}");
                self.events.send(TaskEvent::BatchFailed {
                    task: self.task.clone(),
                    message: err.to_string(),
                });
            }
        }
    }

    async fn execute(&mut self) -> Result<(), TaskError> {
        info!("Starting batch with {} files", self.task.files.len());
        self.events.progress(0);

        let created = self
            .remote
            .create_batch(&self.task.files, &self.options)
            .await?;
        if created.file_urls.len() != self.task.files.len() {
            return Err(TaskError::UrlCountMismatch {
                expected: self.task.files.len(),
                got: created.file_urls.len(),
            });
        }

        self.task.batch_id = Some(created.batch_id.clone());
        self.events
            .log(format!("batch {} created", created.batch_id));

        let batch_dir = self.output_root.join(&created.batch_id);
        tokio::fs::create_dir_all(&batch_dir)
            .await
            .map_err(|source| StorageError::CreateDirectory {
                path: batch_dir.clone(),
                source,
            })?;
        self.task.output_dir = Some(batch_dir);
        self.events.send(TaskEvent::BatchPrepared {
            task: self.task.clone(),
        });

        let total = self.task.files.len().max(1);
        for index in 0..self.task.files.len() {
            if self.cancel.is_cancelled() {
                self.events.log("task cancelled by user");
                let file = &mut self.task.files[index];
                file.status = FileStatus::Cancelled;
                file.progress_label = "cancelled".to_string();
                self.events.file_updated(file);
                continue;
            }

            let file = &mut self.task.files[index];
            file.status = FileStatus::Uploading;
            file.progress_label = "uploading".to_string();
            self.events.file_updated(file);

            // Signed URLs are issued in file order.
            match self
                .upload_with_retry(index, &created.file_urls[index])
                .await
            {
                Ok(()) => {
                    let file = &mut self.task.files[index];
                    file.status = FileStatus::Processing;
                    file.progress_label = AWAITING_LABEL.to_string();
                    self.events.file_updated(file);
                    self.events.progress(((index + 1) * 40 / total) as u8);
                }
                Err(err) => {
                    let file = &mut self.task.files[index];
                    file.status = FileStatus::Failed;
                    file.error = Some(err.to_string());
                    file.progress_label = "upload failed".to_string();
                    self.events.file_updated(file);
                    let name = &self.task.files[index].display_name;
                    self.events.log(format!("{name} upload failed: {err}"));
                }
            }
        }

        self.events.progress(40);
        let uploaded: Vec<usize> = self
            .task
            .files
            .iter()
            .enumerate()
            .filter(|(_, file)| file.status == FileStatus::Processing)
            .map(|(index, _)| index)
            .collect();
        if uploaded.is_empty() {
            return Err(TaskError::AllUploadsFailed);
        }

        self.events.send(TaskEvent::BatchReady {
            task: self.task.clone(),
        });
        self.events.polling_status(format!(
            "uploads finished, awaiting parse ({} files)",
            uploaded.len()
        ));

        PollLoop {
            task: &mut self.task,
            remote: self.remote.as_ref(),
            events: &self.events,
            cancel: &self.cancel,
            output_root: &self.output_root,
        }
        .run(uploaded)
        .await
    }

    /// Uploads one file, waiting `UPLOAD_RETRY_BACKOFF * failures` between
    /// retries. Every try bumps the file's attempt counter so observers see
    /// "uploading (attempt N)" tick upward.
    async fn upload_with_retry(&mut self, index: usize, signed_url: &str) -> Result<(), TaskError> {
        let mut failures: u32 = 0;
        loop {
            if self.cancel.is_cancelled() {
                return Err(TaskError::Cancelled);
            }

            let file = &mut self.task.files[index];
            file.attempts += 1;
            file.progress_label = format!("uploading (attempt {})", file.attempts);
            self.events.file_updated(file);

            let name = self.task.files[index].display_name.clone();
            let path = self.task.files[index].path.clone();
            match self.remote.upload_file(signed_url, &path).await {
                Ok(()) => {
                    self.events.log(format!("{name} uploaded"));
                    return Ok(());
                }
                Err(err) => {
                    failures += 1;
                    warn!("Upload failed for {name} (attempt {failures}): {err}");
                    if !self.options.auto_retry || failures > self.options.max_retry_attempts {
                        return Err(err.into());
                    }
                    tokio::time::sleep(UPLOAD_RETRY_BACKOFF * failures).await;
                }
            }
        }
    }
}
