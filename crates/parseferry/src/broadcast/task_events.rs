//! Task event stream: executions emit into an mpsc channel, the orchestrator
//! drains it and republishes to observers over a broadcast channel.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc};

use crate::history::HistoryEntry;
use crate::task::{BatchTask, UploadFile};

/// Everything an execution or the orchestrator reports to the outside world.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum TaskEvent {
    /// A new execution was accepted and is about to run.
    BatchStarted { task: BatchTask },
    /// Upload URLs were issued; the batch id and output dir are now known.
    BatchPrepared { task: BatchTask },
    /// All uploads attempted, server-side parsing begins.
    BatchReady { task: BatchTask },
    /// Terminal success; ownership of the task passes with the event.
    BatchCompleted { task: BatchTask },
    /// Terminal failure with a human-readable reason.
    BatchFailed { task: BatchTask, message: String },
    /// A single file changed state; carries a full snapshot.
    FileUpdated { name: String, file: UploadFile },
    /// Overall batch progress, 0-100.
    Progress { percent: u8 },
    /// Human-readable log line for the activity feed.
    Log { message: String },
    /// Short status line for the polling indicator, separate from the log.
    PollingStatus { message: String },
    /// The persisted history changed; carries a full snapshot.
    HistoryUpdated { entries: Vec<HistoryEntry> },
}

/// Write half of the execution-to-orchestrator channel.
///
/// Executions are the single writer; the orchestrator's pump is the single
/// reader, so observers see events in emission order.
#[derive(Clone)]
pub struct TaskEventSender {
    inner: mpsc::UnboundedSender<TaskEvent>,
}

impl TaskEventSender {
    /// Creates a connected sender/receiver pair.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TaskEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { inner: tx }, rx)
    }

    /// Sends an event to the orchestrator.
    pub fn send(&self, event: TaskEvent) {
        // Ignore errors - a dropped pump means nobody is listening anymore
        let _ = self.inner.send(event);
    }

    pub fn progress(&self, percent: u8) {
        self.send(TaskEvent::Progress {
            percent: percent.min(100),
        });
    }

    pub fn log(&self, message: impl Into<String>) {
        self.send(TaskEvent::Log {
            message: message.into(),
        });
    }

    pub fn polling_status(&self, message: impl Into<String>) {
        self.send(TaskEvent::PollingStatus {
            message: message.into(),
        });
    }

    /// Emits a snapshot of a file whose state just changed.
    pub fn file_updated(&self, file: &UploadFile) {
        self.send(TaskEvent::FileUpdated {
            name: file.display_name.clone(),
            file: file.clone(),
        });
    }
}

/// Broadcasts task events to any number of observers (UI, logs, tests).
#[derive(Clone)]
pub struct TaskEventBroadcaster {
    sender: Arc<broadcast::Sender<TaskEvent>>,
}

impl TaskEventBroadcaster {
    /// Creates a broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sends an event to all subscribers.
    pub fn send(&self, event: TaskEvent) {
        // Ignore errors - no active receivers is fine
        let _ = self.sender.send(event);
    }

    /// Creates a new subscriber for task events.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.sender.subscribe()
    }
}

impl Default for TaskEventBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}
