//! Task scheduler and job execution engine
//!
//! The [`Scheduler`] is the single authority for starting, tracking and
//! finalizing task runs. One instance is constructed by the hosting process
//! and passed (it is a cheap clone) to everything that needs it: the HTTP
//! layer, the cron driver and tests.
//!
//! # Run lifecycle
//!
//! 1. [`Scheduler::run_task`] checks the scheduler is initialized, resolves the
//!    task and applies the concurrency gate (one active job per task name).
//! 2. A job is allocated and immediately visible in
//!    [`Scheduler::get_running_jobs`].
//! 3. The executor is spawned with the data-store handle and a
//!    [`ScheduledJobLogger`]; a supervisor races it against the task timeout.
//! 4. The first of completion, failure, panic or timeout finalizes the job.
//!
//! # Timeouts are advisory
//!
//! A timed-out executor is **not** cancelled. It keeps running detached; its
//! eventual result is discarded and any log or progress writes it makes after
//! the timeout are ignored for job state. There is no operator "kill".

pub mod cron_driver;
pub mod logger;
pub mod table;

use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use std::any::Any;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::errors::{Result, SchedulerError};
use crate::models::{JobDetail, JobId, JobResult, JobSummary, RunTrigger, TaskOverview};
use crate::tasks::{DataStore, Task, TaskRegistry};
use crate::utils::format_duration;

pub use cron_driver::{CronDriver, ScheduleTable};
pub use logger::{ConsoleJobLogger, JobLogger, ScheduledJobLogger};
pub use table::SchedulerSettings;

use table::{lock_table, JobTable, SharedJobTable};

/// Per-request options for [`Scheduler::run_task`]
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunOptions {
    /// Start a new job even if one is already active for the task
    pub allow_concurrent: bool,
    /// Caller-supplied data stored on the job
    pub metadata: Option<Value>,
    #[serde(skip)]
    pub trigger: RunTrigger,
}

impl RunOptions {
    pub fn with_trigger(trigger: RunTrigger) -> Self {
        Self {
            trigger,
            ..Self::default()
        }
    }
}

/// Handle to a started job; resolves when the job reaches a terminal state.
///
/// Dropping the handle does not affect the run.
#[derive(Debug)]
pub struct JobHandle {
    id: JobId,
    task: String,
    done: oneshot::Receiver<JobResult>,
}

impl JobHandle {
    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    /// Wait for the job's terminal result
    pub async fn wait(self) -> JobResult {
        match self.done.await {
            Ok(result) => result,
            Err(_) => JobResult::Failed {
                error: "job supervisor stopped before reporting a result".to_string(),
            },
        }
    }
}

struct SchedulerInner<S> {
    registry: TaskRegistry<S>,
    store: OnceLock<S>,
    table: SharedJobTable,
}

/// Orchestrates task runs: concurrency gating, timeouts and outcome recording
pub struct Scheduler<S> {
    inner: Arc<SchedulerInner<S>>,
}

impl<S> Clone for Scheduler<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: DataStore> Scheduler<S> {
    /// Create a scheduler over a sealed registry. Runs are refused until
    /// [`Scheduler::initialize`] binds a data-store handle.
    pub fn new(registry: TaskRegistry<S>, settings: SchedulerSettings) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                registry,
                store: OnceLock::new(),
                table: Arc::new(Mutex::new(JobTable::new(settings))),
            }),
        }
    }

    /// Bind the data-store handle. May be called exactly once.
    pub fn initialize(&self, store: S) -> Result<()> {
        self.inner
            .store
            .set(store)
            .map_err(|_| SchedulerError::AlreadyInitialized)?;
        info!(
            "Scheduler initialized with {} registered tasks",
            self.inner.registry.len()
        );
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.store.get().is_some()
    }

    pub fn registry(&self) -> &TaskRegistry<S> {
        &self.inner.registry
    }

    /// Start a run of the named task.
    ///
    /// Must be called from within a tokio runtime; elsewhere it fails with
    /// `NoRuntime`. Fails with `Uninitialized`, `TaskNotFound` or
    /// `AlreadyRunning` without creating a job. On success the job is already visible in
    /// [`Scheduler::get_running_jobs`] and the returned handle resolves when it
    /// finishes.
    pub fn run_task(&self, name: &str, options: RunOptions) -> Result<JobHandle> {
        let store = self
            .inner
            .store
            .get()
            .cloned()
            .ok_or(SchedulerError::Uninitialized)?;
        let task = self.inner.registry.get(name)?;
        let runtime = Handle::try_current().map_err(|_| SchedulerError::NoRuntime {
            task: task.name().to_string(),
        })?;

        let job_id = {
            let mut table = lock_table(&self.inner.table);
            if !options.allow_concurrent {
                if let Some(job_id) = table.running_job_for(task.name()) {
                    return Err(SchedulerError::AlreadyRunning {
                        task: task.name().to_string(),
                        job_id,
                    });
                }
            }
            table.start(task.name(), options.trigger, options.metadata, Utc::now())
        };

        info!(
            "Starting job {} for task '{}' ({:?}, timeout {})",
            job_id,
            task.name(),
            options.trigger,
            format_duration(task.timeout())
        );

        let (done_tx, done_rx) = oneshot::channel();
        let table = Arc::clone(&self.inner.table);
        let supervised_task = Arc::clone(&task);
        runtime.spawn(async move {
            let result = supervise(supervised_task, job_id, store, table).await;
            let _ = done_tx.send(result);
        });

        Ok(JobHandle {
            id: job_id,
            task: task.name().to_string(),
            done: done_rx,
        })
    }

    /// Start a run and wait for its terminal result
    pub async fn run_task_and_wait(&self, name: &str, options: RunOptions) -> Result<JobResult> {
        Ok(self.run_task(name, options)?.wait().await)
    }

    /// Snapshot of every job that has not reached a terminal state, oldest first
    pub fn get_running_jobs(&self) -> Vec<JobSummary> {
        lock_table(&self.inner.table).running()
    }

    /// Full view of a retained job
    pub fn job(&self, id: JobId) -> Result<JobDetail> {
        lock_table(&self.inner.table)
            .get(id)
            .map(|job| job.detail())
            .ok_or(SchedulerError::JobNotFound { id })
    }

    /// Most recent job (running or finished) of a task
    pub fn latest_job(&self, name: &str) -> Option<JobSummary> {
        lock_table(&self.inner.table).latest(name).map(|job| job.summary())
    }

    /// Admin overview of every registered task
    pub fn task_overviews(&self) -> Vec<TaskOverview> {
        let table = lock_table(&self.inner.table);
        self.inner
            .registry
            .iter()
            .map(|task| overview(task, &table))
            .collect()
    }

    /// Admin overview of one task
    pub fn task_overview(&self, name: &str) -> Result<TaskOverview> {
        let task = self.inner.registry.get(name)?;
        let table = lock_table(&self.inner.table);
        Ok(overview(&task, &table))
    }
}

fn overview<S>(task: &Task<S>, table: &JobTable) -> TaskOverview {
    let latest = table.latest(task.name());
    TaskOverview {
        name: task.name().to_string(),
        display_name: task.display_name().to_string(),
        description: task.description().to_string(),
        is_synthetic: task.is_synthetic(),
        timeout_ms: duration_ms(task.timeout()),
        schedule: None,
        next_run: None,
        job: latest.map(|job| job.summary()),
        recent_log: latest
            .map(|job| job.log_tail(table.settings().log_tail))
            .unwrap_or_default(),
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run one job's executor, race it against the task timeout and record the
/// outcome. Returns the result that was recorded.
async fn supervise<S: DataStore>(
    task: Arc<Task<S>>,
    job_id: JobId,
    store: S,
    table: SharedJobTable,
) -> JobResult {
    let logger = ScheduledJobLogger::new(job_id, task.name(), Arc::clone(&table));
    let job_logger: Arc<dyn JobLogger> = Arc::new(logger.clone());
    let executor = task.executor();
    let timeout = task.timeout();

    let mut handle: JoinHandle<anyhow::Result<Value>> =
        tokio::spawn(async move { executor.execute(store, job_logger).await });

    let result = tokio::select! {
        joined = &mut handle => match joined {
            Ok(Ok(value)) => JobResult::Succeeded { value },
            Ok(Err(err)) => {
                logger.error_with("Task failed", &err);
                JobResult::Failed { error: format!("{:#}", err) }
            }
            Err(join_error) if join_error.is_panic() => {
                let message = format!("executor panicked: {}", panic_message(join_error.into_panic()));
                logger.crit(&message);
                JobResult::Failed { error: message }
            }
            Err(join_error) => {
                let message = format!("executor was cancelled: {}", join_error);
                logger.error(&message);
                JobResult::Failed { error: message }
            }
        },
        _ = tokio::time::sleep(timeout) => {
            logger.warn(&format!("Task timed out after {}", format_duration(timeout)));
            discard_late_completion(task.name().to_string(), job_id, handle);
            JobResult::TimedOut { timeout_ms: duration_ms(timeout) }
        }
    };

    if lock_table(&table).finish(job_id, result.clone(), Utc::now()) {
        match &result {
            JobResult::Succeeded { .. } => {
                info!("Job {} for task '{}' {}", job_id, task.name(), result.label())
            }
            JobResult::Failed { error } => {
                error!("Job {} for task '{}' failed: {}", job_id, task.name(), error)
            }
            JobResult::TimedOut { .. } => warn!(
                "Job {} for task '{}' timed out after {}",
                job_id,
                task.name(),
                format_duration(timeout)
            ),
        }
    } else {
        debug!(
            "Job {} for task '{}' was already finalized; {} outcome dropped",
            job_id,
            task.name(),
            result.label()
        );
    }

    result
}

/// Let a timed-out executor finish in the background; its outcome only
/// reaches the operational log.
fn discard_late_completion(task: String, job_id: JobId, handle: JoinHandle<anyhow::Result<Value>>) {
    tokio::spawn(async move {
        match handle.await {
            Ok(Ok(_)) => debug!(
                "Job {} for task '{}' completed after its timeout; result discarded",
                job_id, task
            ),
            Ok(Err(err)) => debug!(
                "Job {} for task '{}' failed after its timeout; error discarded: {:#}",
                job_id, task, err
            ),
            Err(join_error) => debug!(
                "Job {} for task '{}' ended abnormally after its timeout: {}",
                job_id, task, join_error
            ),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn quick(_store: (), logger: Arc<dyn JobLogger>) -> anyhow::Result<Value> {
        logger.info("quick run");
        Ok(json!("done"))
    }

    fn scheduler() -> Scheduler<()> {
        let registry = TaskRegistry::builder()
            .register(Task::new("quick", "Quick", quick))
            .build()
            .unwrap();
        Scheduler::new(registry, SchedulerSettings::default())
    }

    #[tokio::test]
    async fn test_run_before_initialize_creates_no_job() {
        let scheduler = scheduler();
        let err = scheduler.run_task("quick", RunOptions::default()).unwrap_err();
        assert_eq!(err, SchedulerError::Uninitialized);
        assert!(scheduler.get_running_jobs().is_empty());
        assert!(scheduler.latest_job("quick").is_none());
    }

    #[tokio::test]
    async fn test_initialize_is_single_shot() {
        let scheduler = scheduler();
        scheduler.initialize(()).unwrap();
        assert!(scheduler.is_initialized());
        assert_eq!(scheduler.initialize(()), Err(SchedulerError::AlreadyInitialized));
    }

    #[tokio::test]
    async fn test_unknown_task_is_rejected() {
        let scheduler = scheduler();
        scheduler.initialize(()).unwrap();
        let err = scheduler.run_task("nope", RunOptions::default()).unwrap_err();
        assert_eq!(err, SchedulerError::task_not_found("nope"));
    }

    #[tokio::test]
    async fn test_overview_reflects_latest_job() {
        let scheduler = scheduler();
        scheduler.initialize(()).unwrap();
        let result = scheduler
            .run_task_and_wait("quick", RunOptions::with_trigger(RunTrigger::Api))
            .await
            .unwrap();
        assert_eq!(result, JobResult::Succeeded { value: json!("done") });

        let overview = scheduler.task_overview("quick").unwrap();
        let job = overview.job.unwrap();
        assert!(job.processed);
        assert_eq!(overview.recent_log.len(), 1);
        assert_eq!(overview.recent_log[0].message, "quick run");

        let detail = scheduler.job(job.id).unwrap();
        assert_eq!(detail.trigger, RunTrigger::Api);
        assert_eq!(
            scheduler.job(999).unwrap_err(),
            SchedulerError::JobNotFound { id: 999 }
        );
    }

    #[test]
    fn test_run_outside_runtime_is_an_error() {
        let scheduler = scheduler();
        scheduler.initialize(()).unwrap();

        let err = scheduler.run_task("quick", RunOptions::default()).unwrap_err();
        assert_eq!(
            err,
            SchedulerError::NoRuntime {
                task: "quick".to_string()
            }
        );
        assert!(scheduler.latest_job("quick").is_none());
    }

    #[test]
    fn test_panic_message_extracts_text() {
        assert_eq!(panic_message(Box::new("static")), "static");
        assert_eq!(panic_message(Box::new(String::from("owned"))), "owned");
        assert_eq!(panic_message(Box::new(7_u8)), "unknown panic");
    }
}
