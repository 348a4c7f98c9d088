//! Error handling for the task engine

pub mod types;

pub use types::SchedulerError;

/// Result alias for scheduler, registry and cron driver operations
pub type Result<T> = std::result::Result<T, SchedulerError>;
