//! In-memory job table shared by the scheduler and every job logger.
//!
//! Holds all retained jobs keyed by id, the latest job per task name and the
//! id counter. Callers wrap it in one mutex so that each control point
//! (start, log write, completion, timeout) applies its update atomically.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use crate::config::SchedulerConfig;
use crate::models::{Job, JobId, JobResult, JobSummary, LogEntry, RunTrigger};

/// Retention and buffering limits for the job table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub history_limit: usize,
    pub max_log_entries: usize,
    pub log_tail: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        SchedulerSettings::from(&SchedulerConfig::default())
    }
}

impl From<&SchedulerConfig> for SchedulerSettings {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            history_limit: config.history_limit,
            max_log_entries: config.max_log_entries,
            log_tail: config.log_tail,
        }
    }
}

pub(crate) type SharedJobTable = std::sync::Arc<Mutex<JobTable>>;

/// Lock the job table, recovering the data if a previous holder panicked.
pub(crate) fn lock_table(table: &Mutex<JobTable>) -> MutexGuard<'_, JobTable> {
    table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug)]
pub(crate) struct JobTable {
    next_id: JobId,
    jobs: BTreeMap<JobId, Job>,
    latest: HashMap<String, JobId>,
    settings: SchedulerSettings,
}

impl JobTable {
    pub fn new(settings: SchedulerSettings) -> Self {
        Self {
            next_id: 1,
            jobs: BTreeMap::new(),
            latest: HashMap::new(),
            settings,
        }
    }

    pub fn settings(&self) -> SchedulerSettings {
        self.settings
    }

    /// Allocate and register a new job, making it the latest for its task.
    pub fn start(
        &mut self,
        task: &str,
        trigger: RunTrigger,
        metadata: Option<Value>,
        now: DateTime<Utc>,
    ) -> JobId {
        let id = self.next_id;
        self.next_id += 1;
        self.jobs
            .insert(id, Job::new(id, task, now, trigger, metadata));
        self.latest.insert(task.to_string(), id);
        id
    }

    /// Id of an active job for `task`, if any
    pub fn running_job_for(&self, task: &str) -> Option<JobId> {
        self.jobs
            .values()
            .find(|job| !job.processed && job.task == task)
            .map(|job| job.id)
    }

    pub fn running(&self) -> Vec<JobSummary> {
        self.jobs
            .values()
            .filter(|job| !job.processed)
            .map(Job::summary)
            .collect()
    }

    pub fn get(&self, id: JobId) -> Option<&Job> {
        self.jobs.get(&id)
    }

    pub fn latest(&self, task: &str) -> Option<&Job> {
        self.latest.get(task).and_then(|id| self.jobs.get(id))
    }

    pub fn append_log(&mut self, id: JobId, entry: LogEntry) -> bool {
        let max_entries = self.settings.max_log_entries;
        match self.jobs.get_mut(&id) {
            Some(job) => job.append_log(entry, max_entries),
            None => false,
        }
    }

    pub fn set_progress(&mut self, id: JobId, fraction: Option<f64>, label: Option<String>) -> bool {
        match self.jobs.get_mut(&id) {
            Some(job) => job.set_progress(fraction, label),
            None => false,
        }
    }

    /// Finalize a job. Returns false when it was already terminal (or evicted),
    /// in which case nothing changes.
    pub fn finish(&mut self, id: JobId, result: JobResult, now: DateTime<Utc>) -> bool {
        let finished = match self.jobs.get_mut(&id) {
            Some(job) => job.finish(result, now),
            None => false,
        };
        if finished {
            self.evict();
        }
        finished
    }

    /// Drop the oldest finished jobs beyond `history_limit`, never touching a
    /// job that is the latest for its task.
    fn evict(&mut self) {
        let finished: Vec<JobId> = self
            .jobs
            .values()
            .filter(|job| job.processed && self.latest.get(&job.task) != Some(&job.id))
            .map(|job| job.id)
            .collect();

        let excess = finished.len().saturating_sub(self.settings.history_limit);
        for id in finished.into_iter().take(excess) {
            self.jobs.remove(&id);
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }
}
