use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Timer table: task name -> cron expression (with a seconds field)
    #[serde(default)]
    pub schedules: BTreeMap<String, String>,
    /// Per-task policy overrides applied when the registry is built
    #[serde(default)]
    pub tasks: BTreeMap<String, TaskOverride>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Finished jobs kept in memory, not counting each task's latest job
    pub history_limit: usize,
    /// Log lines kept per job; older lines are dropped first
    pub max_log_entries: usize,
    /// Log lines included with each task in the admin overview
    pub log_tail: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskOverride {
    /// Duration string such as "30m" or "90s"
    pub timeout: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://./taskhub.db".to_string(),
            max_connections: Some(5),
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            history_limit: 50,
            max_log_entries: 1000,
            log_tail: 20,
        }
    }
}

impl Config {
    /// Load the configuration from `path`, writing the defaults there first
    /// when the file does not exist yet.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&contents)?)
        } else {
            let default_config = Self::default();
            let contents = toml::to_string_pretty(&default_config)?;
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            std::fs::write(path, contents)?;
            Ok(default_config)
        }
    }
}
