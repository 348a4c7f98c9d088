use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::job::{JobSummary, LogEntry};

/// Admin view of one registered task and its most recent job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskOverview {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub is_synthetic: bool,
    pub timeout_ms: u64,
    /// Cron expression, for tasks attached to a timer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run: Option<DateTime<Utc>>,
    pub job: Option<JobSummary>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recent_log: Vec<LogEntry>,
}
