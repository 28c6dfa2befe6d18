//! Polling loop shared by fresh batches and resumed ones.
//!
//! Once every file is uploaded, progress only advances through remote status
//! snapshots. The loop keeps fetching until each outstanding file reaches a
//! terminal state, downloading and unpacking result packages as files finish.

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::debug;

use crate::api::{ExtractItem, RemoteService};
use crate::broadcast::TaskEventSender;
use crate::error::TaskError;
use crate::storage::ResultMaterializer;
use crate::task::model::{BatchTask, FileStatus};
use crate::task::CancelFlag;

/// Delay between consecutive status fetches.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Label for files that are uploaded but not yet picked up by the parser.
pub(crate) const AWAITING_LABEL: &str = "awaiting parse";

/// Drives a batch from "all uploads finished" to a terminal state.
///
/// `pending` holds indices into `task.files` for files still awaiting a
/// verdict; the loop removes an index once its file completes or fails. The
/// caller emits whatever introductory status line fits its flow before
/// handing over.
pub(crate) struct PollLoop<'a> {
    pub task: &'a mut BatchTask,
    pub remote: &'a dyn RemoteService,
    pub events: &'a TaskEventSender,
    pub cancel: &'a CancelFlag,
    /// Fallback root for batches that never recorded an output directory.
    pub output_root: &'a Path,
}

impl PollLoop<'_> {
    /// Polls until `pending` drains or the task is cancelled.
    ///
    /// On success the task is stamped completed and the final progress and
    /// status lines are emitted; the caller still owns the terminal batch
    /// event. Cancellation marks every outstanding file cancelled and
    /// returns [`TaskError::Cancelled`].
    pub(crate) async fn run(mut self, mut pending: Vec<usize>) -> Result<(), TaskError> {
        let total = self.task.files.len().max(1);
        let batch_id = self.task.batch_id.clone().unwrap_or_default();

        while !pending.is_empty() && !self.cancel.is_cancelled() {
            self.events.polling_status(format!(
                "parsing, {} / {} files remaining",
                pending.len(),
                total
            ));
            debug!("Polling batch {batch_id}: {} files pending", pending.len());

            let status = self.remote.fetch_batch_status(&batch_id).await?;
            for item in &status.extract_result {
                let Some(name) = item.file_name.as_deref() else {
                    continue;
                };
                let Some(slot) = pending
                    .iter()
                    .position(|&index| self.task.files[index].display_name == name)
                else {
                    continue;
                };
                if self.apply_remote_state(pending[slot], item).await {
                    pending.remove(slot);
                }
            }

            let completed = self.task.success_count();
            let overall = (40 + completed * 60 / total).min(100);
            self.events.progress(overall as u8);

            tokio::time::sleep(POLL_INTERVAL).await;
        }

        if self.cancel.is_cancelled() {
            for &index in &pending {
                let file = &mut self.task.files[index];
                file.status = FileStatus::Cancelled;
                file.progress_label = "cancelled".to_string();
                self.events.file_updated(file);
            }
            self.events.polling_status("task cancelled");
            return Err(TaskError::Cancelled);
        }

        self.task.mark_completed();
        self.events.progress(100);
        self.events.polling_status("parsing finished");
        Ok(())
    }

    /// Applies one snapshot item to the file at `index`. Returns true when
    /// the file reached a terminal state and should leave the pending set.
    async fn apply_remote_state(&mut self, index: usize, item: &ExtractItem) -> bool {
        let state = item
            .state
            .as_deref()
            .unwrap_or_default()
            .to_ascii_lowercase();

        match state.as_str() {
            "done" => {
                let name = self.task.files[index].display_name.clone();
                match self.download_and_store(index, item).await {
                    Ok(target_dir) => {
                        let file = &mut self.task.files[index];
                        file.status = FileStatus::Completed;
                        file.progress_label = "parse complete".to_string();
                        file.error = None;
                        self.events.file_updated(file);
                        self.events.log(format!(
                            "{name} parsed, results saved to {}",
                            target_dir.display()
                        ));
                    }
                    Err(err) => {
                        let file = &mut self.task.files[index];
                        file.status = FileStatus::Failed;
                        file.error = Some(err.to_string());
                        file.progress_label = "result processing failed".to_string();
                        self.events.file_updated(file);
                        self.events
                            .log(format!("{name} download or unpack failed: {err}"));
                    }
                }
                true
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
                self.events.file_updated(file);
                let name = &self.task.files[index].display_name;
                self.events.log(format!("{name} parse failed: {message}"));
                true
            }
            "pending" | "queued" => {
                let file = &mut self.task.files[index];
                file.progress_label = AWAITING_LABEL.to_string();
                self.events.file_updated(file);
                false
            }
            "running" | "processing" => {
                let label = match item.extract_progress {
                    Some(pages) => match (pages.extracted_pages, pages.total_pages) {
                        (Some(done), Some(total)) if total > 0 => {
                            format!("parsing ({done}/{total})")
                        }
                        _ => "parsing".to_string(),
                    },
                    None => "parsing".to_string(),
                };
                let file = &mut self.task.files[index];
                file.progress_label = label;
                self.events.file_updated(file);
                false
            }
            "converting" => {
                let file = &mut self.task.files[index];
                file.progress_label = "converting".to_string();
                self.events.file_updated(file);
                false
            }
            // Unrecognized states leave the file untouched until the service
            // reports something actionable.
            _ => false,
        }
    }

    /// Downloads the finished package for the file at `index` and unpacks it
    /// under the batch output directory.
    async fn download_and_store(
        &self,
        index: usize,
        item: &ExtractItem,
    ) -> Result<PathBuf, TaskError> {
        let display_name = self.task.files[index].display_name.clone();
        let zip_url = item
            .full_zip_url
            .as_deref()
            .filter(|url| !url.is_empty())
            .ok_or_else(|| TaskError::MissingResultLink {
                name: display_name.clone(),
            })?;

        let package = self.remote.download_result(zip_url).await?;
        let materializer = ResultMaterializer::new(self.batch_root());
        let stored = materializer.materialize(&display_name, &package)?;
        if stored.summary_path.is_none() {
            self.events
                .log(format!("warning: no full.md found in results for {display_name}"));
        }
        Ok(stored.target_dir)
    }

    fn batch_root(&self) -> PathBuf {
        match &self.task.output_dir {
            Some(dir) => dir.clone(),
            None => {
                let id = self
                    .task
                    .batch_id
                    .as_deref()
                    .filter(|id| !id.is_empty())
                    .unwrap_or("batch");
                self.output_root.join(id)
            }
        }
    }
}
