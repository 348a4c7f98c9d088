//! Error type definitions for the task engine
//!
//! Every failure a caller of the scheduler can observe is a variant of
//! [`SchedulerError`]. Failures raised *inside* task executors are not part of
//! this taxonomy: they are captured on the job as a `failed` result and never
//! surface as a `SchedulerError`.

use thiserror::Error;

use crate::models::JobId;

/// Errors surfaced by the scheduler, the task registry and the cron driver
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// A run was requested before a data-store handle was bound
    #[error("Scheduler has not been initialized")]
    Uninitialized,

    /// `initialize` was called on a scheduler that already holds a handle
    #[error("Scheduler is already initialized")]
    AlreadyInitialized,

    /// `run_task` was called from a thread with no tokio runtime to spawn on
    #[error("No tokio runtime available to run task {task}")]
    NoRuntime { task: String },

    /// Lookup of a task name that is not in the registry
    #[error("Task not found: {name}")]
    TaskNotFound { name: String },

    /// A run was requested for a task whose previous job is still active
    #[error("Task {task} is already running as job {job_id}")]
    AlreadyRunning { task: String, job_id: JobId },

    /// Two tasks were registered under the same name
    #[error("Duplicate task name: {name}")]
    DuplicateTask { name: String },

    /// Synthetic tasks cannot be attached to a timer
    #[error("Task {name} is synthetic and cannot be scheduled")]
    SyntheticTask { name: String },

    /// A cron expression failed to parse
    #[error("Invalid schedule for task {task}: '{expression}' - {message}")]
    InvalidSchedule {
        task: String,
        expression: String,
        message: String,
    },

    /// A duration string in the configuration failed to parse
    #[error("Invalid duration '{value}': {message}")]
    InvalidDuration { value: String, message: String },

    /// Lookup of a job id that was never allocated or has been evicted
    #[error("Job not found: {id}")]
    JobNotFound { id: JobId },
}

impl SchedulerError {
    /// Create a task-not-found error
    pub fn task_not_found<S: Into<String>>(name: S) -> Self {
        Self::TaskNotFound { name: name.into() }
    }

    /// Create an invalid-duration error
    pub fn invalid_duration<V: Into<String>, M: Into<String>>(value: V, message: M) -> Self {
        Self::InvalidDuration {
            value: value.into(),
            message: message.into(),
        }
    }

    /// True for errors caused by the state of an in-flight run rather than by
    /// the request itself.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::AlreadyRunning { .. })
    }
}
