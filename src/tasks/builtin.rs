//! Tasks shipped with the binary, operating on the SQLite [`Database`].

use anyhow::{bail, Result};
use serde_json::{json, Value};
use sqlx::Row;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use super::{Task, TaskRegistry};
use crate::config::TaskOverride;
use crate::database::Database;
use crate::scheduler::JobLogger;

pub const VACUUM_DATABASE: &str = "vacuumDatabase";
pub const OPTIMIZE_DATABASE: &str = "optimizeDatabase";
pub const INTEGRITY_CHECK: &str = "integrityCheck";
pub const PROGRESS_DEMO: &str = "progressDemo";

const PROGRESS_DEMO_STEPS: u32 = 10;

/// Registry of the built-in tasks with configuration overrides applied
pub fn builtin_registry(overrides: &BTreeMap<String, TaskOverride>) -> crate::errors::Result<TaskRegistry<Database>> {
    TaskRegistry::builder()
        .register(
            Task::new(VACUUM_DATABASE, "Vacuum database", vacuum_database)
                .with_description("Rebuild the database file to reclaim free pages")
                .with_timeout(Duration::from_secs(30 * 60)),
        )
        .register(
            Task::new(OPTIMIZE_DATABASE, "Optimize database", optimize_database)
                .with_description("Refresh query planner statistics")
                .with_timeout(Duration::from_secs(5 * 60)),
        )
        .register(
            Task::new(INTEGRITY_CHECK, "Integrity check", integrity_check)
                .with_description("Verify the database file is not corrupt")
                .with_timeout(Duration::from_secs(10 * 60)),
        )
        .register(
            Task::new(PROGRESS_DEMO, "Progress demo", progress_demo)
                .with_description("Development task that walks through progress updates")
                .with_timeout(Duration::from_secs(60))
                .synthetic(),
        )
        .with_overrides(overrides)
        .build()
}

async fn vacuum_database(db: Database, logger: Arc<dyn JobLogger>) -> Result<Value> {
    logger.info("Running VACUUM");
    sqlx::query("VACUUM").execute(&db.pool()).await?;
    logger.info("VACUUM complete");
    Ok(json!({ "vacuumed": true }))
}

async fn optimize_database(db: Database, logger: Arc<dyn JobLogger>) -> Result<Value> {
    logger.verbose("Running PRAGMA optimize");
    sqlx::query("PRAGMA optimize").execute(&db.pool()).await?;
    Ok(json!({ "optimized": true }))
}

async fn integrity_check(db: Database, logger: Arc<dyn JobLogger>) -> Result<Value> {
    logger.set_progress(0.0, Some("checking"));

    let rows = sqlx::query("PRAGMA integrity_check")
        .fetch_all(&db.pool())
        .await?;
    let messages = rows
        .iter()
        .map(|row| row.try_get::<String, _>(0))
        .collect::<Result<Vec<_>, _>>()?;

    logger.set_progress(1.0, Some("checked"));

    if messages.len() == 1 && messages[0] == "ok" {
        logger.info("Database integrity ok");
        Ok(json!({ "status": "ok" }))
    } else {
        logger.log(
            crate::models::LogLevel::Crit,
            "Database integrity check reported problems",
            Some(json!({ "problems": messages })),
        );
        bail!("integrity check reported {} problem(s)", messages.len())
    }
}

async fn progress_demo(_db: Database, logger: Arc<dyn JobLogger>) -> Result<Value> {
    for step in 0..PROGRESS_DEMO_STEPS {
        let fraction = f64::from(step) / f64::from(PROGRESS_DEMO_STEPS);
        let label = format!("step {} of {}", step + 1, PROGRESS_DEMO_STEPS);
        logger.set_progress(fraction, Some(label.as_str()));
        logger.debug(&format!("demo step {}", step + 1));
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    logger.set_progress(1.0, Some("done"));
    Ok(json!({ "steps": PROGRESS_DEMO_STEPS }))
}
