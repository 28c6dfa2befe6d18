//! Batch task lifecycle: file intake, upload, polling, and recovery.
//!
//! The orchestrator owns one execution at a time; executions report back
//! exclusively through [`crate::broadcast::TaskEventSender`] so observers and
//! the history store see the same stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub mod batch;
pub mod intake;
pub mod model;
pub mod orchestrator;
pub mod poll;
pub mod recovery;

pub use batch::BatchExecution;
pub use intake::collect_pdf_inputs;
pub use model::{BatchKind, BatchTask, FileStatus, UploadFile};
pub use orchestrator::TaskOrchestrator;
pub use recovery::{RecoveryExecution, RecoveryMode};

/// Cooperative cancellation handle shared between the orchestrator and the
/// running execution.
///
/// Executions check the flag between steps: before each upload, before each
/// poll round, and before each retry. Cancellation is therefore prompt but
/// never tears down an in-flight request.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    inner: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation; the execution notices at its next checkpoint.
    pub fn cancel(&self) {
        self.inner.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_flag_shared_between_clones() {
        let flag = CancelFlag::new();
        let observer = flag.clone();
        assert!(!observer.is_cancelled());

        flag.cancel();
        assert!(observer.is_cancelled());
    }
}
