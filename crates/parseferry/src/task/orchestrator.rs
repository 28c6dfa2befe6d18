//! Single-flight coordinator for batch executions.
//!
//! The orchestrator accepts start, resume, redownload, and cancel requests,
//! runs at most one execution at a time on a spawned task, and mirrors the
//! execution's event stream into history upserts before republishing it to
//! observers. History writes happen on the event pump, so every snapshot an
//! observer receives reflects what is already on disk.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, Instrument, Span};

use crate::api::RemoteService;
use crate::broadcast::{TaskEvent, TaskEventBroadcaster, TaskEventSender};
use crate::config::AppConfig;
use crate::error::{ParseferryError, TaskError};
use crate::history::{
    format_timestamp, parse_timestamp, HistoryEntry, HistoryFileRef, HistoryPatch, HistoryStatus,
    HistoryStore,
};
use crate::task::batch::BatchExecution;
use crate::task::model::{BatchKind, BatchTask, UploadFile};
use crate::task::recovery::{RecoveryExecution, RecoveryMode};
use crate::task::CancelFlag;

/// Coordinates executions, history persistence, and event fan-out.
pub struct TaskOrchestrator {
    config: AppConfig,
    remote: Arc<dyn RemoteService>,
    history: HistoryStore,
    broadcaster: TaskEventBroadcaster,
    active: Option<ActiveTask>,
}

struct ActiveTask {
    handle: JoinHandle<()>,
    cancel: CancelFlag,
}

impl TaskOrchestrator {
    pub fn new(config: AppConfig, remote: Arc<dyn RemoteService>, history: HistoryStore) -> Self {
        history.set_limit(config.history_limit);
        Self {
            config,
            remote,
            history,
            broadcaster: TaskEventBroadcaster::default(),
            active: None,
        }
    }

    /// Opens a new subscription to the orchestrator's event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.broadcaster.subscribe()
    }

    /// Starts a fresh batch over `file_paths`, writing results under
    /// `output_dir`. Must be called from within a Tokio runtime.
    pub fn start_batch(
        &mut self,
        file_paths: Vec<PathBuf>,
        output_dir: &str,
    ) -> Result<(), ParseferryError> {
        self.ensure_idle()?;
        let destination = expand_dir(output_dir)?;

        let files: Vec<UploadFile> = file_paths.into_iter().map(UploadFile::new).collect();
        let mut task = BatchTask::new(files);
        task.output_dir = Some(destination.clone());

        self.broadcaster.send(TaskEvent::BatchStarted {
            task: task.clone(),
        });

        let (events, receiver) = TaskEventSender::channel();
        let cancel = CancelFlag::new();
        let span = info_span!("batch_execution", files = task.files.len());
        let execution = BatchExecution::new(
            task,
            Arc::clone(&self.remote),
            self.config.options.clone(),
            destination,
            cancel.clone(),
            events,
        );
        self.launch(cancel, span, execution.run(), receiver);
        Ok(())
    }

    /// Resumes polling for a batch whose uploads finished but whose results
    /// were never collected.
    pub fn resume_batch(&mut self, batch_id: &str) -> Result<(), ParseferryError> {
        self.start_recovery(batch_id, BatchKind::Recovery, RecoveryMode::Resume)
    }

    /// Downloads the finished results of a completed batch again.
    pub fn redownload_batch(&mut self, batch_id: &str) -> Result<(), ParseferryError> {
        self.start_recovery(batch_id, BatchKind::Redownload, RecoveryMode::Redownload)
    }

    fn start_recovery(
        &mut self,
        batch_id: &str,
        kind: BatchKind,
        mode: RecoveryMode,
    ) -> Result<(), ParseferryError> {
        self.ensure_idle()?;

        let entry = self
            .history
            .find(batch_id)
            .ok_or_else(|| TaskError::MissingHistory {
                batch_id: batch_id.to_string(),
            })?;
        let destination = expand_dir(&entry.output_dir)?;

        let mut task = BatchTask::rehydrated(batch_id, files_from_history(&entry), kind, &destination);
        if let Some(created_at) = parse_timestamp(&entry.created_at) {
            task.created_at = created_at;
        }

        self.broadcaster.send(TaskEvent::BatchStarted {
            task: task.clone(),
        });
        let entries = self.history.upsert(
            batch_id,
            HistoryPatch {
                status: Some(HistoryStatus::Processing),
                ..Default::default()
            },
        )?;
        self.broadcaster.send(TaskEvent::HistoryUpdated { entries });

        let (events, receiver) = TaskEventSender::channel();
        let cancel = CancelFlag::new();
        let span = info_span!("recovery_execution", batch_id = %batch_id, mode = ?mode);
        let execution = RecoveryExecution::new(
            task,
            Arc::clone(&self.remote),
            destination,
            mode,
            cancel.clone(),
            events,
        );
        self.launch(cancel, span, execution.run(), receiver);
        Ok(())
    }

    fn launch(
        &mut self,
        cancel: CancelFlag,
        span: Span,
        execution: impl Future<Output = ()> + Send + 'static,
        receiver: mpsc::UnboundedReceiver<TaskEvent>,
    ) {
        let pump = EventPump {
            history: self.history.clone(),
            broadcaster: self.broadcaster.clone(),
        };
        let handle = tokio::spawn(
            async move {
                tokio::join!(execution, pump.run(receiver));
            }
            .instrument(span),
        );
        self.active = Some(ActiveTask { handle, cancel });
    }

    /// Requests cancellation of the in-flight execution, if any.
    pub fn cancel_active(&self) {
        if let Some(active) = &self.active {
            if !active.handle.is_finished() {
                active.cancel.cancel();
            }
        }
    }

    pub fn has_active_task(&self) -> bool {
        self.active
            .as_ref()
            .map(|active| !active.handle.is_finished())
            .unwrap_or(false)
    }

    /// Snapshot of the persisted history, newest first.
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.history.entries()
    }

    pub fn find_history_entry(&self, batch_id: &str) -> Option<HistoryEntry> {
        self.history.find(batch_id)
    }

    /// Replaces the configuration used by future executions.
    pub fn update_config(&mut self, config: AppConfig) {
        self.history.set_limit(config.history_limit);
        self.config = config;
    }

    /// Swaps the remote service backing future executions, e.g. after the
    /// API key changes.
    pub fn set_remote(&mut self, remote: Arc<dyn RemoteService>) {
        self.remote = remote;
    }

    fn ensure_idle(&self) -> Result<(), TaskError> {
        if self.has_active_task() {
            return Err(TaskError::Busy);
        }
        Ok(())
    }
}

/// Drains one execution's event channel, persisting history at phase
/// boundaries and forwarding everything observers care about.
struct EventPump {
    history: HistoryStore,
    broadcaster: TaskEventBroadcaster,
}

impl EventPump {
    async fn run(self, mut receiver: mpsc::UnboundedReceiver<TaskEvent>) {
        while let Some(event) = receiver.recv().await {
            self.handle(event);
        }
    }

    fn handle(&self, event: TaskEvent) {
        match event {
            // Prepared and ready mark history phases but are not part of
            // the observer-facing stream.
            TaskEvent::BatchPrepared { task } => {
                self.record(
                    task.batch_id.as_deref(),
                    HistoryPatch {
                        created_at: Some(format_timestamp(task.created_at)),
                        output_dir: Some(
                            task.output_dir
                                .as_deref()
                                .map(|dir| dir.to_string_lossy().into_owned())
                                .unwrap_or_default(),
                        ),
                        files: Some(file_refs(&task.files)),
                        status: Some(HistoryStatus::Uploading),
                        success: Some(0),
                        failed: Some(0),
                        ..Default::default()
                    },
                );
            }
            TaskEvent::BatchReady { task } => {
                self.record(
                    task.batch_id.as_deref(),
                    HistoryPatch {
                        status: Some(HistoryStatus::Processing),
                        ..Default::default()
                    },
                );
            }
            TaskEvent::BatchCompleted { task } => {
                info!(
                    "Batch {} completed",
                    task.batch_id.as_deref().unwrap_or("-")
                );
                let completed_at =
                    format_timestamp(task.completed_at.unwrap_or_else(Utc::now));
                self.record(
                    task.batch_id.as_deref(),
                    HistoryPatch {
                        status: Some(HistoryStatus::Completed),
                        success: Some(task.success_count() as u32),
                        failed: Some(task.failure_count() as u32),
                        completed_at: Some(completed_at.clone()),
                        timestamp: Some(completed_at),
                        ..Default::default()
                    },
                );
                self.broadcaster.send(TaskEvent::BatchCompleted { task });
            }
            TaskEvent::BatchFailed { task, message } => {
                error!(
                    "Batch {} failed: {message}",
                    task.batch_id.as_deref().unwrap_or("-")
                );
                self.record(
                    task.batch_id.as_deref(),
                    HistoryPatch {
                        status: Some(HistoryStatus::Failed),
                        last_error: Some(message.clone()),
                        timestamp: Some(format_timestamp(Utc::now())),
                        ..Default::default()
                    },
                );
                self.broadcaster.send(TaskEvent::BatchFailed { task, message });
            }
            other => self.broadcaster.send(other),
        }
    }

    fn record(&self, batch_id: Option<&str>, patch: HistoryPatch) {
        let Some(batch_id) = batch_id.filter(|id| !id.is_empty()) else {
            return;
        };
        match self.history.upsert(batch_id, patch) {
            Ok(entries) => self.broadcaster.send(TaskEvent::HistoryUpdated { entries }),
            Err(err) => error!("Failed to persist history for batch {batch_id}: {err}"),
        }
    }
}

/// Expands a leading tilde and requires the directory to exist.
fn expand_dir(raw: &str) -> Result<PathBuf, TaskError> {
    let path = PathBuf::from(shellexpand::tilde(raw).as_ref());
    if !path.is_dir() {
        return Err(TaskError::OutputDirMissing { path });
    }
    Ok(path)
}

fn file_refs(files: &[UploadFile]) -> Vec<HistoryFileRef> {
    files
        .iter()
        .map(|file| HistoryFileRef {
            path: file.path.to_string_lossy().into_owned(),
            display_name: file.display_name.clone(),
        })
        .collect()
}

fn files_from_history(entry: &HistoryEntry) -> Vec<UploadFile> {
    entry
        .files
        .iter()
        .map(|info| {
            let path = if info.path.is_empty() {
                PathBuf::from(&info.display_name)
            } else {
                PathBuf::from(&info.path)
            };
            UploadFile::from_parts(path, info.display_name.clone())
        })
        .collect()
}
