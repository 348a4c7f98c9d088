//! Job logger: the only write path an executor has into its job.
//!
//! Every call is applied to the job (when one is attached) and forwarded to
//! the process-wide `tracing` stream, so task activity shows up in the general
//! log as well as in the per-job log.

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, error, info, trace, warn};

use super::table::{lock_table, SharedJobTable};
use crate::models::{JobId, LogEntry, LogLevel};

/// Executor-facing capability for leveled logging and progress reporting
pub trait JobLogger: Send + Sync {
    /// Append a log line with optional structured data
    fn log(&self, level: LogLevel, message: &str, data: Option<Value>);

    /// Report progress as a fraction in [0, 1] with an optional label
    fn set_progress(&self, fraction: f64, label: Option<&str>);

    /// Reset progress to "not reported"
    fn clear_progress(&self);

    fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message, None);
    }

    fn verbose(&self, message: &str) {
        self.log(LogLevel::Verbose, message, None);
    }

    fn info(&self, message: &str) {
        self.log(LogLevel::Info, message, None);
    }

    fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message, None);
    }

    fn error(&self, message: &str) {
        self.log(LogLevel::Error, message, None);
    }

    fn crit(&self, message: &str) {
        self.log(LogLevel::Crit, message, None);
    }

    /// Log an error together with its cause chain
    fn error_with(&self, message: &str, err: &anyhow::Error) {
        let chain: Vec<String> = err.chain().map(|cause| cause.to_string()).collect();
        self.log(
            LogLevel::Error,
            message,
            Some(json!({ "error": err.to_string(), "chain": chain })),
        );
    }
}

/// Emit a job log line on the operational `tracing` stream
pub(crate) fn forward(task: &str, job_id: Option<JobId>, level: LogLevel, message: &str, data: Option<&Value>) {
    let job_id = job_id.map(|id| id.to_string()).unwrap_or_else(|| "-".to_string());
    let data = data.map(|d| d.to_string()).unwrap_or_default();
    match level {
        LogLevel::Debug => trace!(task = %task, job_id = %job_id, data = %data, "{}", message),
        LogLevel::Verbose => debug!(task = %task, job_id = %job_id, data = %data, "{}", message),
        LogLevel::Info => info!(task = %task, job_id = %job_id, data = %data, "{}", message),
        LogLevel::Warn => warn!(task = %task, job_id = %job_id, data = %data, "{}", message),
        LogLevel::Error | LogLevel::Crit => {
            error!(task = %task, job_id = %job_id, level = %level, data = %data, "{}", message)
        }
    }
}

/// Logger bound to one scheduler-managed job
#[derive(Clone)]
pub struct ScheduledJobLogger {
    job_id: JobId,
    task: String,
    table: SharedJobTable,
}

impl ScheduledJobLogger {
    pub(crate) fn new(job_id: JobId, task: &str, table: SharedJobTable) -> Self {
        Self {
            job_id,
            task: task.to_string(),
            table,
        }
    }
}

impl JobLogger for ScheduledJobLogger {
    fn log(&self, level: LogLevel, message: &str, data: Option<Value>) {
        forward(&self.task, Some(self.job_id), level, message, data.as_ref());

        let entry = LogEntry {
            level,
            message: message.to_string(),
            timestamp: Utc::now(),
            data,
        };
        if !lock_table(&self.table).append_log(self.job_id, entry) {
            trace!(
                "Job {} ({}) is finalized; log line kept out of the job log",
                self.job_id,
                self.task
            );
        }
    }

    fn set_progress(&self, fraction: f64, label: Option<&str>) {
        trace!(
            "Job {} ({}) progress {:.3} {}",
            self.job_id,
            self.task,
            fraction,
            label.unwrap_or_default()
        );
        lock_table(&self.table).set_progress(self.job_id, Some(fraction), label.map(str::to_string));
    }

    fn clear_progress(&self) {
        lock_table(&self.table).set_progress(self.job_id, None, None);
    }
}

/// Logger for runs outside the scheduler (CLI invocations); writes only to
/// the console through `tracing`.
#[derive(Debug, Clone)]
pub struct ConsoleJobLogger {
    task: String,
}

impl ConsoleJobLogger {
    pub fn new(task: &str) -> Self {
        Self {
            task: task.to_string(),
        }
    }
}

impl JobLogger for ConsoleJobLogger {
    fn log(&self, level: LogLevel, message: &str, data: Option<Value>) {
        forward(&self.task, None, level, message, data.as_ref());
    }

    fn set_progress(&self, fraction: f64, label: Option<&str>) {
        info!(
            task = %self.task,
            "progress {:.0}% {}",
            fraction.clamp(0.0, 1.0) * 100.0,
            label.unwrap_or_default()
        );
    }

    fn clear_progress(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{JobResult, RunTrigger};
    use crate::scheduler::table::{JobTable, SchedulerSettings};
    use std::sync::{Arc, Mutex};

    fn table() -> SharedJobTable {
        Arc::new(Mutex::new(JobTable::new(SchedulerSettings::default())))
    }

    #[test]
    fn test_logger_writes_in_call_order_and_overwrites_progress() {
        let table = table();
        let id = lock_table(&table).start("syncRoster", RunTrigger::Manual, None, Utc::now());
        let logger = ScheduledJobLogger::new(id, "syncRoster", table.clone());

        logger.info("starting");
        logger.set_progress(0.25, Some("fetching"));
        logger.warn("slow upstream");
        logger.error_with("page failed", &anyhow::anyhow!("boom").context("page 3"));
        logger.set_progress(0.5, Some("halfway"));

        let guard = lock_table(&table);
        let job = guard.get(id).unwrap();
        let levels: Vec<_> = job.log.iter().map(|e| e.level).collect();
        assert_eq!(levels, vec![LogLevel::Info, LogLevel::Warn, LogLevel::Error]);
        assert_eq!(job.log[2].data.as_ref().unwrap()["chain"][1], "boom");
        assert_eq!(job.progress, Some(0.5));
        assert_eq!(job.progress_label.as_deref(), Some("halfway"));
    }

    #[test]
    fn test_logger_is_inert_after_job_finishes() {
        let table = table();
        let id = lock_table(&table).start("slowImport", RunTrigger::Manual, None, Utc::now());
        let logger = ScheduledJobLogger::new(id, "slowImport", table.clone());
        lock_table(&table).finish(id, JobResult::TimedOut { timeout_ms: 100 }, Utc::now());

        logger.info("finished anyway");
        logger.clear_progress();

        let guard = lock_table(&table);
        let job = guard.get(id).unwrap();
        assert!(job.log.is_empty());
        assert_eq!(job.result, Some(JobResult::TimedOut { timeout_ms: 100 }));
    }

    #[test]
    fn test_console_logger_accepts_every_level() {
        let logger = ConsoleJobLogger::new("vacuumDatabase");
        logger.debug("d");
        logger.verbose("v");
        logger.crit("c");
        logger.set_progress(2.0, None);
        logger.clear_progress();
    }
}
