use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use super::{DataStore, Task};
use crate::config::TaskOverride;
use crate::errors::{Result, SchedulerError};
use crate::utils::parse_duration;

/// Catalog of every known task, indexed by unique name.
///
/// Built once through [`TaskRegistry::builder`]; there is no way to add or
/// remove tasks afterwards. Cloning shares the same catalog.
pub struct TaskRegistry<S> {
    tasks: Arc<BTreeMap<String, Arc<Task<S>>>>,
}

impl<S> Clone for TaskRegistry<S> {
    fn clone(&self) -> Self {
        Self {
            tasks: Arc::clone(&self.tasks),
        }
    }
}

impl<S: DataStore> TaskRegistry<S> {
    pub fn builder() -> TaskRegistryBuilder<S> {
        TaskRegistryBuilder {
            tasks: Vec::new(),
            overrides: BTreeMap::new(),
        }
    }
}

impl<S> TaskRegistry<S> {
    /// Look up a task by name
    pub fn get(&self, name: &str) -> Result<Arc<Task<S>>> {
        self.tasks
            .get(name)
            .cloned()
            .ok_or_else(|| SchedulerError::task_not_found(name))
    }

    /// All tasks in name order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Task<S>>> {
        self.tasks.values()
    }

    /// Tasks eligible for timer-driven triggering (synthetic tasks excluded)
    pub fn schedulable(&self) -> impl Iterator<Item = &Arc<Task<S>>> {
        self.tasks.values().filter(|task| !task.is_synthetic())
    }

    pub fn names(&self) -> Vec<&str> {
        self.tasks.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl<S> std::fmt::Debug for TaskRegistry<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tasks", &self.names())
            .finish()
    }
}

/// Collects task definitions before the registry is sealed
pub struct TaskRegistryBuilder<S> {
    tasks: Vec<Task<S>>,
    overrides: BTreeMap<String, TaskOverride>,
}

impl<S: DataStore> TaskRegistryBuilder<S> {
    pub fn register(mut self, task: Task<S>) -> Self {
        self.tasks.push(task);
        self
    }

    /// Policy overrides (e.g. timeouts) from configuration, keyed by task name
    pub fn with_overrides(mut self, overrides: &BTreeMap<String, TaskOverride>) -> Self {
        self.overrides
            .extend(overrides.iter().map(|(name, o)| (name.clone(), o.clone())));
        self
    }

    /// Seal the registry. Fails on duplicate names, overrides for unknown
    /// tasks and unparseable override values.
    pub fn build(self) -> Result<TaskRegistry<S>> {
        let mut tasks: BTreeMap<String, Task<S>> = BTreeMap::new();

        for task in self.tasks {
            if tasks.contains_key(task.name()) {
                return Err(SchedulerError::DuplicateTask {
                    name: task.name().to_string(),
                });
            }
            tasks.insert(task.name().to_string(), task);
        }

        for (name, task_override) in &self.overrides {
            let task = tasks
                .get_mut(name)
                .ok_or_else(|| SchedulerError::task_not_found(name.as_str()))?;

            if let Some(ref value) = task_override.timeout {
                let timeout = parse_duration(value)
                    .map_err(|message| SchedulerError::invalid_duration(value.as_str(), message))?;
                debug!("Task '{}' timeout overridden to {:?}", name, timeout);
                task.set_timeout(timeout);
            }
        }

        info!("Task registry sealed with {} tasks", tasks.len());

        Ok(TaskRegistry {
            tasks: Arc::new(
                tasks
                    .into_iter()
                    .map(|(name, task)| (name, Arc::new(task)))
                    .collect(),
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::JobLogger;
    use serde_json::{json, Value};
    use std::time::Duration;

    async fn noop(_store: (), _logger: Arc<dyn JobLogger>) -> anyhow::Result<Value> {
        Ok(json!(null))
    }

    fn registry() -> TaskRegistryBuilder<()> {
        TaskRegistry::builder()
            .register(Task::new("syncRoster", "Sync roster", noop).with_timeout(Duration::from_secs(5)))
            .register(Task::new("devSeed", "Seed dev data", noop).synthetic())
            .register(Task::new("importMarket", "Import market data", noop))
    }

    #[test]
    fn test_lookup_and_enumeration() {
        let registry = registry().build().unwrap();

        assert_eq!(registry.len(), 3);
        assert_eq!(registry.names(), vec!["devSeed", "importMarket", "syncRoster"]);
        assert_eq!(
            registry.get("syncRoster").unwrap().timeout(),
            Duration::from_secs(5)
        );
        assert_eq!(
            registry.get("nope").unwrap_err(),
            SchedulerError::task_not_found("nope")
        );

        let schedulable: Vec<_> = registry.schedulable().map(|t| t.name().to_string()).collect();
        assert_eq!(schedulable, vec!["importMarket", "syncRoster"]);
    }

    #[test]
    fn test_duplicate_names_are_rejected() {
        let err = registry()
            .register(Task::new("syncRoster", "Again", noop))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            SchedulerError::DuplicateTask {
                name: "syncRoster".to_string()
            }
        );
    }

    #[test]
    fn test_overrides_apply_and_validate() {
        let mut overrides = BTreeMap::new();
        overrides.insert(
            "importMarket".to_string(),
            TaskOverride {
                timeout: Some("2m".to_string()),
            },
        );
        let overridden = registry().with_overrides(&overrides).build().unwrap();
        assert_eq!(
            overridden.get("importMarket").unwrap().timeout(),
            Duration::from_secs(120)
        );

        overrides.insert("ghost".to_string(), TaskOverride { timeout: None });
        assert!(matches!(
            registry().with_overrides(&overrides).build(),
            Err(SchedulerError::TaskNotFound { .. })
        ));

        let mut bad = BTreeMap::new();
        bad.insert(
            "syncRoster".to_string(),
            TaskOverride {
                timeout: Some("forever".to_string()),
            },
        );
        assert!(matches!(
            registry().with_overrides(&bad).build(),
            Err(SchedulerError::InvalidDuration { .. })
        ));
    }
}
