pub mod job;
pub mod task;

pub use job::{Job, JobDetail, JobId, JobResult, JobSummary, LogEntry, LogLevel, RunTrigger};
pub use task::TaskOverview;
