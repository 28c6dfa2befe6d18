//! Event plumbing between executions, the orchestrator and observers.

pub mod task_events;

pub use task_events::{TaskEvent, TaskEventBroadcaster, TaskEventSender};
