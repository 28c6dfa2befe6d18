//! Test harness for driving the orchestrator in isolation.
//!
//! `TestHarness` wires a `TaskOrchestrator` to a `FakeRemoteService` and an
//! on-disk history file inside a temp directory, and exposes the broadcast
//! event stream for assertions.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::broadcast;

use parseferry::api::RemoteService;
use parseferry::broadcast::TaskEvent;
use parseferry::config::AppConfig;
use parseferry::history::{HistoryPatch, HistoryStore};
use parseferry::task::{BatchTask, TaskOrchestrator, UploadFile};

use super::fake_remote::FakeRemoteService;

/// Isolated orchestrator environment backed by temp directories.
pub struct TestHarness {
    /// Owns the input files, output directory and history file for one test.
    temp_dir: TempDir,
    /// Destination directory passed to `start_batch`.
    pub output_dir: PathBuf,
    /// Path of the history JSON file.
    pub history_path: PathBuf,
    /// Scripted remote shared with the orchestrator.
    pub remote: Arc<FakeRemoteService>,
    /// History store shared with the orchestrator, for seeding and asserts.
    pub history: HistoryStore,
    pub orchestrator: TaskOrchestrator,
    events: broadcast::Receiver<TaskEvent>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(AppConfig::default())
    }

    pub fn with_config(config: AppConfig) -> Self {
        let temp_dir = TempDir::new().expect("create temp dir");
        let output_dir = temp_dir.path().join("results");
        std::fs::create_dir_all(&output_dir).expect("create output dir");
        let history_path = temp_dir.path().join("history.json");
        let history = HistoryStore::load(&history_path, config.history_limit)
            .expect("load empty history store");
        let remote = Arc::new(FakeRemoteService::new());
        let orchestrator = TaskOrchestrator::new(
            config,
            Arc::clone(&remote) as Arc<dyn RemoteService>,
            history.clone(),
        );
        let events = orchestrator.subscribe();
        Self {
            temp_dir,
            output_dir,
            history_path,
            remote,
            history,
            orchestrator,
            events,
        }
    }

    /// Writes a small input file under the temp dir and returns its path.
    pub fn input_file(&self, name: &str) -> PathBuf {
        let dir = self.temp_dir.path().join("inbox");
        std::fs::create_dir_all(&dir).expect("create inbox dir");
        let path = dir.join(name);
        std::fs::write(&path, b"%PDF-1.4\ntest-bytes").expect("write input file");
        path
    }

    pub fn output_dir_str(&self) -> String {
        self.output_dir.to_string_lossy().into_owned()
    }

    /// Seeds one history entry, as a previous run would have left it.
    pub fn seed_history(&self, batch_id: &str, patch: HistoryPatch) {
        self.history.upsert(batch_id, patch).expect("seed history");
    }

    /// Receives events until one matches, returning everything seen
    /// including the match.
    pub async fn events_until(&mut self, matches: impl Fn(&TaskEvent) -> bool) -> Vec<TaskEvent> {
        let mut seen = Vec::new();
        while seen.len() < 500 {
            let event = tokio::time::timeout(Duration::from_secs(60), self.events.recv())
                .await
                .expect("timed out waiting for a matching event")
                .expect("event channel closed");
            let hit = matches(&event);
            seen.push(event);
            if hit {
                return seen;
            }
        }
        panic!("no matching event within 500 events");
    }

    /// Drains the event stream until the running execution reports a
    /// terminal batch event.
    pub async fn collect_until_terminal(&mut self) -> Vec<TaskEvent> {
        self.events_until(|event| {
            matches!(
                event,
                TaskEvent::BatchCompleted { .. } | TaskEvent::BatchFailed { .. }
            )
        })
        .await
    }

    /// Waits for the spawned execution to finish winding down after its
    /// terminal event.
    pub async fn settle(&mut self) {
        for _ in 0..100 {
            if !self.orchestrator.has_active_task() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("active task did not finish");
    }

    /// Asserts that no event is currently queued.
    pub fn assert_no_events(&mut self) {
        match self.events.try_recv() {
            Err(broadcast::error::TryRecvError::Empty) => {}
            other => panic!("expected an empty event stream, got {other:?}"),
        }
    }
}

/// All progress percentages in emission order.
pub fn progress_values(events: &[TaskEvent]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|event| match event {
            TaskEvent::Progress { percent } => Some(*percent),
            _ => None,
        })
        .collect()
}

/// All polling status lines in emission order.
pub fn polling_messages(events: &[TaskEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            TaskEvent::PollingStatus { message } => Some(message.clone()),
            _ => None,
        })
        .collect()
}

/// All activity log lines in emission order.
pub fn log_lines(events: &[TaskEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            TaskEvent::Log { message } => Some(message.clone()),
            _ => None,
        })
        .collect()
}

/// Progress labels one file went through, in emission order.
pub fn labels_for(events: &[TaskEvent], name: &str) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            TaskEvent::FileUpdated {
                name: event_name,
                file,
            } if event_name == name => Some(file.progress_label.clone()),
            _ => None,
        })
        .collect()
}

/// Latest file snapshot emitted for a display name.
pub fn last_snapshot(events: &[TaskEvent], name: &str) -> Option<UploadFile> {
    events.iter().rev().find_map(|event| match event {
        TaskEvent::FileUpdated {
            name: event_name,
            file,
        } if event_name == name => Some(file.clone()),
        _ => None,
    })
}

/// Unwraps the terminal task, panicking unless the batch completed.
pub fn completed_task(events: &[TaskEvent]) -> BatchTask {
    match events.last() {
        Some(TaskEvent::BatchCompleted { task }) => task.clone(),
        other => panic!("expected BatchCompleted, got {other:?}"),
    }
}

/// Unwraps the terminal failure, panicking unless the batch failed.
pub fn failed_batch(events: &[TaskEvent]) -> (BatchTask, String) {
    match events.last() {
        Some(TaskEvent::BatchFailed { task, message }) => (task.clone(), message.clone()),
        other => panic!("expected BatchFailed, got {other:?}"),
    }
}
