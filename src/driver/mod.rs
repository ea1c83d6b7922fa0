//! Storage driver boundary
//!
//! The reconciliation core only ever talks to a [`Driver`]. Turning
//! "create partition X for `[from, to)`" into DDL for a specific engine is the
//! driver's job, and so is any tolerance for "already exists" / "doesn't exist"
//! races between processes. The core propagates every error as-is.
//!
//! - [`MemoryDriver`] - in-process partition set (tests, `--memory` mode)
//! - [`TracingDriver`] - logs every create/drop outcome of a wrapped driver
//! - [`DryRunDriver`] - records create/drop requests without executing them
//! - `PostgresDriver` - native PostgreSQL declarative partitioning (feature `postgres`)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;

mod dry_run;
mod logging;
mod memory;
#[cfg(feature = "postgres")]
mod postgres;

pub use dry_run::{DryRunDriver, PlannedChange};
pub use logging::TracingDriver;
pub use memory::MemoryDriver;
#[cfg(feature = "postgres")]
pub use postgres::{PostgresDriver, PostgresOptions};

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("partition already exists: {0}")]
    AlreadyExists(String),

    #[error("no such partition: {0}")]
    NotFound(String),

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[cfg(feature = "postgres")]
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, DriverError>;

/// Everything a driver needs to attach a new partition
///
/// The partition covers the half-open range `[from_date, to_date)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreatePartitionInfo {
    pub parent_table: String,
    pub name: String,
    pub from_date: DateTime<Utc>,
    pub to_date: DateTime<Utc>,
}

/// Partition management capability of a relational store
#[async_trait]
pub trait Driver: Send + Sync {
    /// Names of all partitions currently attached to `table`
    ///
    /// May include partitions that don't follow the naming scheme.
    async fn list_existing_partitions(&self, table: &str) -> Result<BTreeSet<String>>;

    async fn create_partition(&self, info: &CreatePartitionInfo) -> Result<()>;

    async fn drop_partition(&self, name: &str) -> Result<()>;
}

#[async_trait]
impl<D: Driver + ?Sized> Driver for Arc<D> {
    async fn list_existing_partitions(&self, table: &str) -> Result<BTreeSet<String>> {
        (**self).list_existing_partitions(table).await
    }

    async fn create_partition(&self, info: &CreatePartitionInfo) -> Result<()> {
        (**self).create_partition(info).await
    }

    async fn drop_partition(&self, name: &str) -> Result<()> {
        (**self).drop_partition(name).await
    }
}
