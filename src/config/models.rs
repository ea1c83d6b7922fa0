use crate::humanize::HumanDuration;
use crate::interval::Interval;
use crate::partitioner::Partitioner;
use crate::runner::RunnerConfig;
use serde::{Deserialize, Serialize};

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub runner: RunnerSettings,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub tables: Vec<TableConfig>,
}

/// Scheduling of periodic passes
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunnerSettings {
    #[serde(default = "default_period")]
    pub period: HumanDuration,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            period: default_period(),
        }
    }
}

impl RunnerSettings {
    pub fn to_runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            period: self.period.as_duration(),
        }
    }
}

fn default_period() -> HumanDuration {
    HumanDuration::from_secs(6 * 60 * 60) // 6 hours
}

/// PostgreSQL connection settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Connection URL (falls back to the `DATABASE_URL` environment variable)
    #[serde(default, skip_serializing)]
    pub url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout: HumanDuration,
    /// Treat "already exists" / "does not exist" DDL errors as success
    #[serde(default = "default_tolerate_existing")]
    pub tolerate_existing: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
            acquire_timeout: default_acquire_timeout(),
            tolerate_existing: default_tolerate_existing(),
        }
    }
}

fn default_max_connections() -> u32 {
    4
}

fn default_acquire_timeout() -> HumanDuration {
    HumanDuration::from_secs(10)
}

fn default_tolerate_existing() -> bool {
    true
}

/// One partitioned parent table
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TableConfig {
    pub name: String,
    pub interval: Interval,
    /// Past buckets retained besides the current one
    pub keep: u32,
    /// Partitions that are never dropped (e.g. the DEFAULT partition)
    #[serde(default)]
    pub protected: Vec<String>,
}

impl TableConfig {
    pub fn to_partitioner(&self) -> Partitioner {
        let partitioner = Partitioner::new(self.name.clone(), self.interval, self.keep);
        if self.protected.is_empty() {
            partitioner
        } else {
            partitioner.protecting(self.protected.iter().cloned())
        }
    }
}
