//! Task definitions and the static task registry
//!
//! A [`Task`] is an immutable descriptor of a named background operation:
//! presentation strings, a timeout policy, a synthetic flag and an executor.
//! Tasks are collected into a [`TaskRegistry`] once at startup; after that the
//! set of runnable tasks is fixed.
//!
//! Executors receive the data-store handle by value and a [`JobLogger`]. Any
//! `async fn(S, Arc<dyn JobLogger>) -> anyhow::Result<Value>` is an executor.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::scheduler::JobLogger;

pub mod builtin;
pub mod direct;
pub mod registry;

pub use direct::run_direct;
pub use registry::{TaskRegistry, TaskRegistryBuilder};

/// Timeout applied to tasks that do not set their own
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Any handle that can be shared with concurrently running executors
pub trait DataStore: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> DataStore for T {}

/// The work performed by a task
#[async_trait]
pub trait TaskExecutor<S>: Send + Sync {
    async fn execute(&self, store: S, logger: Arc<dyn JobLogger>) -> Result<Value>;
}

#[async_trait]
impl<S, F, Fut> TaskExecutor<S> for F
where
    S: DataStore,
    F: Fn(S, Arc<dyn JobLogger>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    async fn execute(&self, store: S, logger: Arc<dyn JobLogger>) -> Result<Value> {
        (self)(store, logger).await
    }
}

/// Static descriptor of a runnable background operation
pub struct Task<S> {
    name: String,
    display_name: String,
    description: String,
    timeout: Duration,
    synthetic: bool,
    executor: Arc<dyn TaskExecutor<S>>,
}

impl<S: DataStore> Task<S> {
    pub fn new<E>(name: &str, display_name: &str, executor: E) -> Self
    where
        E: TaskExecutor<S> + 'static,
    {
        Self {
            name: name.to_string(),
            display_name: display_name.to_string(),
            description: String::new(),
            timeout: DEFAULT_TASK_TIMEOUT,
            synthetic: false,
            executor: Arc::new(executor),
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Exclude the task from timer-driven triggering
    pub fn synthetic(mut self) -> Self {
        self.synthetic = true;
        self
    }
}

impl<S> Task<S> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_synthetic(&self) -> bool {
        self.synthetic
    }

    pub fn executor(&self) -> Arc<dyn TaskExecutor<S>> {
        Arc::clone(&self.executor)
    }

    pub(crate) fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }
}

impl<S> std::fmt::Debug for Task<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("display_name", &self.display_name)
            .field("timeout", &self.timeout)
            .field("synthetic", &self.synthetic)
            .finish_non_exhaustive()
    }
}
