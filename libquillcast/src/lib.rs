//! Quillcast - publish orchestration for API-less blogging platforms
//!
//! This library drives article publishing through the platforms' ordinary
//! web editors: a persistent job queue, a cancellable publish scheduler,
//! and a browser automation layer for the editor itself.

pub mod browser;
pub mod cancel;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod images;
pub mod insert;
pub mod logging;
pub mod ports;
pub mod publisher;
pub mod queue;
pub mod scheduler;
pub mod session;
pub mod taxonomy;
pub mod throttle;
pub mod types;

// Re-export commonly used types
pub use cancel::CancelToken;
pub use config::Config;
pub use db::Database;
pub use error::{PublishError, QuillcastError, Result};
pub use events::{Event, EventBus};
pub use queue::JobQueue;
pub use scheduler::{PublishScheduler, SchedulerDeps, SchedulerStatus};
pub use types::{Job, JobPayload, JobStatus, JobType, PublishStage};
