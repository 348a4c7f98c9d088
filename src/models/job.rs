use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifier of a job, unique for the lifetime of one scheduler
pub type JobId = u64;

/// Severity of a job log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Verbose,
    Info,
    Warn,
    Error,
    Crit,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LogLevel::Debug => "debug",
            LogLevel::Verbose => "verbose",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Crit => "crit",
        };
        write!(f, "{s}")
    }
}

/// One line of a job's log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Terminal outcome of a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum JobResult {
    Succeeded {
        value: Value,
    },
    Failed {
        error: String,
    },
    #[serde(rename_all = "camelCase")]
    TimedOut {
        timeout_ms: u64,
    },
}

impl JobResult {
    pub fn is_success(&self) -> bool {
        matches!(self, JobResult::Succeeded { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            JobResult::Succeeded { .. } => "succeeded",
            JobResult::Failed { .. } => "failed",
            JobResult::TimedOut { .. } => "timed-out",
        }
    }
}

/// What caused a job to be started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunTrigger {
    Manual,
    Scheduled,
    Api,
}

impl Default for RunTrigger {
    fn default() -> Self {
        RunTrigger::Manual
    }
}

/// Runtime record of one execution attempt of a task.
///
/// Jobs are owned by the scheduler's job table. Writes go through the
/// methods below, which refuse to touch a job once it is `processed`.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub task: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub processed: bool,
    pub progress: Option<f64>,
    pub progress_label: Option<String>,
    pub result: Option<JobResult>,
    pub log: Vec<LogEntry>,
    pub dropped_log_entries: usize,
    pub trigger: RunTrigger,
    pub metadata: Option<Value>,
}

impl Job {
    pub fn new(
        id: JobId,
        task: &str,
        start_time: DateTime<Utc>,
        trigger: RunTrigger,
        metadata: Option<Value>,
    ) -> Self {
        Self {
            id,
            task: task.to_string(),
            start_time,
            end_time: None,
            processed: false,
            progress: None,
            progress_label: None,
            result: None,
            log: Vec::new(),
            dropped_log_entries: 0,
            trigger,
            metadata,
        }
    }

    /// Append a log line, keeping at most `max_entries` (oldest dropped first).
    ///
    /// Returns false when the job is already terminal and the entry was ignored.
    pub fn append_log(&mut self, entry: LogEntry, max_entries: usize) -> bool {
        if self.processed {
            return false;
        }
        self.log.push(entry);
        if max_entries > 0 && self.log.len() > max_entries {
            let excess = self.log.len() - max_entries;
            self.log.drain(..excess);
            self.dropped_log_entries += excess;
        }
        true
    }

    /// Overwrite progress and its label. Last write wins.
    pub fn set_progress(&mut self, fraction: Option<f64>, label: Option<String>) -> bool {
        if self.processed {
            return false;
        }
        self.progress = fraction.filter(|f| f.is_finite()).map(|f| f.clamp(0.0, 1.0));
        self.progress_label = label;
        true
    }

    /// Move the job to its terminal state. Only the first call has any effect.
    pub fn finish(&mut self, result: JobResult, at: DateTime<Utc>) -> bool {
        if self.processed {
            return false;
        }
        self.processed = true;
        self.end_time = Some(at);
        self.result = Some(result);
        true
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id,
            task: self.task.clone(),
            start_time: self.start_time,
            processed: self.processed,
            progress: self.progress,
            progress_label: self.progress_label.clone(),
            end_time: self.end_time,
            result: self.result.clone(),
        }
    }

    pub fn detail(&self) -> JobDetail {
        JobDetail {
            summary: self.summary(),
            trigger: self.trigger,
            metadata: self.metadata.clone(),
            dropped_log_entries: self.dropped_log_entries,
            log: self.log.clone(),
        }
    }

    /// The last `count` log lines, oldest first
    pub fn log_tail(&self, count: usize) -> Vec<LogEntry> {
        let start = self.log.len().saturating_sub(count);
        self.log[start..].to_vec()
    }
}

/// Polling view of a job, as consumed by monitoring UIs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub id: JobId,
    pub task: String,
    pub start_time: DateTime<Utc>,
    pub processed: bool,
    pub progress: Option<f64>,
    pub progress_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
}

/// Full view of a job including its log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDetail {
    #[serde(flatten)]
    pub summary: JobSummary,
    pub trigger: RunTrigger,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    pub dropped_log_entries: usize,
    pub log: Vec<LogEntry>,
}
