use chrono::{DateTime, Utc};
use cron::Schedule;
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use super::{RunOptions, Scheduler};
use crate::errors::{Result, SchedulerError};
use crate::models::RunTrigger;
use crate::tasks::{DataStore, TaskRegistry};

#[derive(Debug, Clone)]
struct ScheduleEntry {
    task: String,
    expression: String,
    schedule: Schedule,
}

/// Parsed timer table: which tasks fire on which cron expression.
///
/// Immutable once built; shared between the driver and the admin views.
#[derive(Debug, Clone, Default)]
pub struct ScheduleTable {
    entries: Vec<ScheduleEntry>,
}

impl ScheduleTable {
    /// Build the table from `task name -> cron expression` pairs.
    ///
    /// Every entry must name a registered, non-synthetic task and carry a
    /// valid expression; the first offending entry is returned as an error.
    pub fn from_config<S: DataStore>(
        registry: &TaskRegistry<S>,
        schedules: &BTreeMap<String, String>,
    ) -> Result<Self> {
        let mut entries = Vec::with_capacity(schedules.len());

        for (task_name, expression) in schedules {
            let task = registry.get(task_name)?;
            if task.is_synthetic() {
                return Err(SchedulerError::SyntheticTask {
                    name: task_name.clone(),
                });
            }

            let schedule =
                Schedule::from_str(expression).map_err(|e| SchedulerError::InvalidSchedule {
                    task: task_name.clone(),
                    expression: expression.clone(),
                    message: e.to_string(),
                })?;

            entries.push(ScheduleEntry {
                task: task_name.clone(),
                expression: expression.clone(),
                schedule,
            });
        }

        Ok(Self { entries })
    }

    pub fn expression(&self, task: &str) -> Option<&str> {
        self.entry(task).map(|e| e.expression.as_str())
    }

    /// First fire time strictly after `after`
    pub fn next_run(&self, task: &str, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.entry(task).and_then(|e| e.schedule.after(&after).next())
    }

    pub fn tasks(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.task.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(&self, task: &str) -> Option<&ScheduleEntry> {
        self.entries.iter().find(|e| e.task == task)
    }
}

/// Timer driver: starts scheduled tasks through the [`Scheduler`] when their
/// cron expression comes due.
///
/// Fire times missed while a tick was delayed are coalesced into one run. A
/// fire that hits an already-running task is skipped with a warning.
pub struct CronDriver<S> {
    scheduler: Scheduler<S>,
    table: Arc<ScheduleTable>,
    next_fire: HashMap<String, DateTime<Utc>>,
}

impl<S: DataStore> CronDriver<S> {
    pub fn new(scheduler: Scheduler<S>, table: Arc<ScheduleTable>) -> Self {
        Self::starting_at(scheduler, table, Utc::now())
    }

    /// Driver whose first fire times are computed relative to `start`
    pub fn starting_at(scheduler: Scheduler<S>, table: Arc<ScheduleTable>, start: DateTime<Utc>) -> Self {
        let next_fire = table
            .tasks()
            .filter_map(|task| table.next_run(task, start).map(|at| (task.to_string(), at)))
            .collect();

        Self {
            scheduler,
            table,
            next_fire,
        }
    }

    /// Tasks due at `now`, advancing each one's next fire time past `now`
    pub fn due_at(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let mut due = Vec::new();

        for (task, next) in self.next_fire.iter_mut() {
            if now >= *next {
                trace!(
                    "Task '{}' due: next_time={}, now={}",
                    task,
                    next.format("%Y-%m-%d %H:%M:%S UTC"),
                    now.format("%Y-%m-%d %H:%M:%S UTC")
                );
                due.push(task.clone());
                if let Some(following) = self.table.next_run(task, now) {
                    *next = following;
                }
            }
        }

        // Exhausted schedules never fire again.
        self.next_fire
            .retain(|task, next| *next > now || !due.contains(task));

        due.sort();
        due
    }

    /// Start one scheduled run; rejections are logged, never propagated.
    pub fn fire(&self, task: &str) {
        match self
            .scheduler
            .run_task(task, RunOptions::with_trigger(RunTrigger::Scheduled))
        {
            Ok(handle) => debug!("Scheduled run of '{}' started as job {}", task, handle.id()),
            Err(e) if e.is_conflict() => {
                warn!("Skipping scheduled run of '{}': {}", task, e)
            }
            Err(e) => error!("Scheduled run of '{}' failed to start: {}", task, e),
        }
    }

    fn log_startup_schedule(&self) {
        for task in self.table.tasks() {
            match self.next_fire.get(task) {
                Some(next_time) => info!(
                    "Task '{}' - Next scheduled run: {} (cron: {})",
                    task,
                    next_time.format("%Y-%m-%d %H:%M:%S UTC"),
                    self.table.expression(task).unwrap_or_default()
                ),
                None => warn!("Task '{}' has no upcoming scheduled runs", task),
            }
        }
    }

    /// Tick once per second until `shutdown` turns true.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("Starting cron driver with {} scheduled tasks", self.table.len());
        self.log_startup_schedule();

        let mut ticker = interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    for task in self.due_at(Utc::now()) {
                        self.fire(&task);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Cron driver shutting down");
                        break;
                    }
                }
            }
        }
    }
}
