use anyhow::anyhow;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

use taskhub::errors::SchedulerError;
use taskhub::models::{JobResult, LogLevel};
use taskhub::scheduler::{JobLogger, RunOptions, Scheduler, SchedulerSettings};
use taskhub::tasks::{Task, TaskRegistry};

async fn sync_roster(_store: (), logger: Arc<dyn JobLogger>) -> anyhow::Result<Value> {
    logger.info("fetching roster");
    logger.set_progress(0.5, Some("halfway"));
    tokio::time::sleep(Duration::from_millis(100)).await;
    logger.info("roster stored");
    Ok(json!({ "synced": 3 }))
}

async fn slow_import(_store: (), logger: Arc<dyn JobLogger>) -> anyhow::Result<Value> {
    logger.info("waiting for upstream");
    std::future::pending::<()>().await;
    Ok(Value::Null)
}

async fn late_finisher(_store: (), logger: Arc<dyn JobLogger>) -> anyhow::Result<Value> {
    tokio::time::sleep(Duration::from_millis(200)).await;
    logger.info("late line");
    logger.set_progress(0.9, Some("late"));
    Ok(json!("too late"))
}

async fn broken(_store: (), logger: Arc<dyn JobLogger>) -> anyhow::Result<Value> {
    logger.verbose("about to fail");
    Err(anyhow!("upstream returned 500"))
}

async fn explode(_store: (), _logger: Arc<dyn JobLogger>) -> anyhow::Result<Value> {
    panic!("kaboom");
}

async fn chatty(_store: (), logger: Arc<dyn JobLogger>) -> anyhow::Result<Value> {
    logger.debug("one");
    logger.info("two");
    logger.warn("three");
    Ok(Value::Null)
}

fn scheduler() -> Scheduler<()> {
    let registry = TaskRegistry::builder()
        .register(Task::new("syncRoster", "Sync roster", sync_roster))
        .register(
            Task::new("slowImport", "Slow import", slow_import)
                .with_timeout(Duration::from_millis(100)),
        )
        .register(
            Task::new("lateFinisher", "Late finisher", late_finisher)
                .with_timeout(Duration::from_millis(100)),
        )
        .register(Task::new("broken", "Broken", broken))
        .register(Task::new("explode", "Explode", explode))
        .register(Task::new("chatty", "Chatty", chatty))
        .build()
        .unwrap();

    let scheduler = Scheduler::new(registry, SchedulerSettings::default());
    scheduler.initialize(()).unwrap();
    scheduler
}

#[tokio::test(start_paused = true)]
async fn test_job_is_visible_immediately_and_reports_progress() {
    let scheduler = scheduler();
    let before = Utc::now();

    let handle = scheduler.run_task("syncRoster", RunOptions::default()).unwrap();

    let running = scheduler.get_running_jobs();
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].id, handle.id());
    assert_eq!(running[0].task, "syncRoster");
    assert!(!running[0].processed);
    assert!(running[0].start_time >= before);
    assert!(running[0].start_time - before < chrono::Duration::seconds(5));

    tokio::time::sleep(Duration::from_millis(50)).await;
    let running = scheduler.get_running_jobs();
    assert_eq!(running[0].progress, Some(0.5));
    assert_eq!(running[0].progress_label.as_deref(), Some("halfway"));

    let result = handle.wait().await;
    assert_eq!(result, JobResult::Succeeded { value: json!({ "synced": 3 }) });

    assert!(scheduler.get_running_jobs().is_empty());
    let job = scheduler.latest_job("syncRoster").unwrap();
    assert!(job.processed);
    assert!(job.end_time.is_some());
    // Progress is left where the executor put it.
    assert_eq!(job.progress, Some(0.5));
}

#[tokio::test(start_paused = true)]
async fn test_hanging_executor_times_out() {
    let scheduler = scheduler();
    let started = tokio::time::Instant::now();

    let handle = scheduler.run_task("slowImport", RunOptions::default()).unwrap();
    let id = handle.id();
    let result = handle.wait().await;
    assert_eq!(result, JobResult::TimedOut { timeout_ms: 100 });
    // Finalized exactly at start + timeout on the paused clock.
    assert_eq!(started.elapsed(), Duration::from_millis(100));

    let detail = scheduler.job(id).unwrap();
    assert!(detail.summary.processed);
    assert_eq!(detail.summary.result, Some(JobResult::TimedOut { timeout_ms: 100 }));
    assert!(detail
        .log
        .iter()
        .any(|entry| entry.level == LogLevel::Warn && entry.message.contains("timed out")));
    assert!(scheduler.get_running_jobs().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_late_completion_does_not_override_timeout() {
    let scheduler = scheduler();

    let handle = scheduler.run_task("lateFinisher", RunOptions::default()).unwrap();
    let id = handle.id();
    assert_eq!(handle.wait().await, JobResult::TimedOut { timeout_ms: 100 });

    // Let the detached executor run to completion.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let detail = scheduler.job(id).unwrap();
    assert_eq!(detail.summary.result, Some(JobResult::TimedOut { timeout_ms: 100 }));
    assert_eq!(detail.summary.progress, None);
    assert!(!detail.log.iter().any(|entry| entry.message == "late line"));
}

#[tokio::test(start_paused = true)]
async fn test_second_run_is_rejected_while_active() {
    let scheduler = scheduler();

    let first = assert_ok!(scheduler.run_task("slowImport", RunOptions::default()));
    let err = assert_err!(scheduler.run_task("slowImport", RunOptions::default()));
    assert_eq!(
        err,
        SchedulerError::AlreadyRunning {
            task: "slowImport".to_string(),
            job_id: first.id(),
        }
    );
    assert_eq!(scheduler.get_running_jobs().len(), 1);

    // Once the first run ends a new one is accepted.
    first.wait().await;
    assert_ok!(scheduler.run_task("slowImport", RunOptions::default()));
}

#[tokio::test(start_paused = true)]
async fn test_allow_concurrent_starts_parallel_jobs() {
    let scheduler = scheduler();

    let first = scheduler.run_task("syncRoster", RunOptions::default()).unwrap();
    let second = scheduler
        .run_task(
            "syncRoster",
            RunOptions {
                allow_concurrent: true,
                metadata: Some(json!({ "reason": "backfill" })),
                ..RunOptions::default()
            },
        )
        .unwrap();
    assert_ne!(first.id(), second.id());
    assert_eq!(scheduler.get_running_jobs().len(), 2);

    let second_id = second.id();
    assert!(first.wait().await.is_success());
    assert!(second.wait().await.is_success());

    assert_eq!(scheduler.latest_job("syncRoster").unwrap().id, second_id);
    assert_eq!(
        scheduler.job(second_id).unwrap().metadata,
        Some(json!({ "reason": "backfill" }))
    );
}

#[tokio::test(start_paused = true)]
async fn test_failures_and_panics_are_recorded() {
    let scheduler = scheduler();

    let handle = scheduler.run_task("broken", RunOptions::default()).unwrap();
    let id = handle.id();
    assert_eq!(
        handle.wait().await,
        JobResult::Failed {
            error: "upstream returned 500".to_string()
        }
    );
    let detail = scheduler.job(id).unwrap();
    let last = detail.log.last().unwrap();
    assert_eq!(last.level, LogLevel::Error);
    assert_eq!(last.data.as_ref().unwrap()["error"], "upstream returned 500");

    let handle = scheduler.run_task("explode", RunOptions::default()).unwrap();
    match handle.wait().await {
        JobResult::Failed { error } => assert!(error.contains("kaboom")),
        other => panic!("expected failure, got {:?}", other),
    }

    // The scheduler keeps serving after a panic.
    assert!(scheduler
        .run_task_and_wait("chatty", RunOptions::default())
        .await
        .unwrap()
        .is_success());
}

#[tokio::test(start_paused = true)]
async fn test_log_entries_keep_call_order() {
    let scheduler = scheduler();

    let handle = scheduler.run_task("chatty", RunOptions::default()).unwrap();
    let id = handle.id();
    handle.wait().await;

    let detail = scheduler.job(id).unwrap();
    let lines: Vec<(LogLevel, &str)> = detail
        .log
        .iter()
        .map(|entry| (entry.level, entry.message.as_str()))
        .collect();
    assert_eq!(
        lines,
        vec![
            (LogLevel::Debug, "one"),
            (LogLevel::Info, "two"),
            (LogLevel::Warn, "three"),
        ]
    );
    assert!(detail
        .log
        .windows(2)
        .all(|pair| pair[0].timestamp <= pair[1].timestamp));
}

#[tokio::test]
async fn test_uninitialized_scheduler_refuses_runs() {
    let registry: TaskRegistry<()> = TaskRegistry::builder()
        .register(Task::new("syncRoster", "Sync roster", sync_roster))
        .build()
        .unwrap();
    let scheduler = Scheduler::new(registry, SchedulerSettings::default());

    assert_eq!(
        scheduler
            .run_task("syncRoster", RunOptions::default())
            .unwrap_err(),
        SchedulerError::Uninitialized
    );
    assert!(scheduler.get_running_jobs().is_empty());
}
