//! Direct task invocation for command-line runs.
//!
//! This path bypasses the scheduler entirely: no job is created, no timeout is
//! applied and nothing shows up in the admin views. The executor gets a
//! [`ConsoleJobLogger`] instead of a job-bound logger.

use anyhow::{anyhow, Result};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

use super::{DataStore, TaskRegistry};
use crate::scheduler::{panic_message, ConsoleJobLogger, JobLogger};

/// Run one task's executor to completion outside scheduler bookkeeping.
///
/// Panics inside the executor are contained and returned as errors.
pub async fn run_direct<S: DataStore>(registry: &TaskRegistry<S>, name: &str, store: S) -> Result<Value> {
    let task = registry.get(name)?;
    let logger: Arc<dyn JobLogger> = Arc::new(ConsoleJobLogger::new(task.name()));
    let executor = task.executor();

    info!("Running task '{}' directly", task.name());

    match tokio::spawn(async move { executor.execute(store, logger).await }).await {
        Ok(result) => result,
        Err(join_error) if join_error.is_panic() => Err(anyhow!(
            "Task '{}' panicked: {}",
            name,
            panic_message(join_error.into_panic())
        )),
        Err(join_error) => Err(anyhow!("Task '{}' was cancelled: {}", name, join_error)),
    }
}
