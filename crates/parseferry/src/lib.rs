pub mod api;
pub mod broadcast;
pub mod config;
pub mod error;
pub mod history;
pub mod storage;
pub mod task;

pub use api::{BatchCreation, BatchStatus, ExtractItem, HttpRemoteService, RemoteService};
pub use broadcast::{TaskEvent, TaskEventBroadcaster, TaskEventSender};
pub use config::{load_config, save_config, AppConfig, ParseOptions};
pub use error::{
    ApiError, ConfigError, HistoryError, ParseferryError, Result, StorageError, TaskError,
};
pub use history::{default_history_path, HistoryEntry, HistoryStatus, HistoryStore};
pub use task::{
    collect_pdf_inputs, BatchKind, BatchTask, CancelFlag, FileStatus, TaskOrchestrator, UploadFile,
};
