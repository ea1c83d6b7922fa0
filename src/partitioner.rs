//! Partition reconciliation
//!
//! A [`Partitioner`] compares the partitions a table *should* have at a given
//! moment with what the driver reports, then creates and drops the difference.
//!
//! Three watermarks, all bucket starts derived from `now`:
//!
//! - `min_keep = truncate(now) - keep` - oldest bucket that is retained
//! - `min_create = truncate(now) - 1` - oldest bucket created when missing
//! - `max_ts = truncate(now) + 1` - newest bucket that must exist
//!
//! Buckets in `[min_create, max_ts]` are created if missing. Existing
//! partitions matching no bucket in `[min_keep, max_ts]` are dropped, unless
//! the drop filter protects them. Gaps older than `min_create` are never
//! backfilled.

use bon::Builder;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::driver::{CreatePartitionInfo, Driver, DriverError};
use crate::interval::Interval;

/// Veto over dropping a partition; returning `false` keeps it forever
pub type DropFilter = Arc<dyn Fn(&str) -> bool + Send + Sync>;

#[derive(Debug, Error)]
pub enum PartitionError {
    #[error("failed to list partitions of {table}: {source}")]
    List {
        table: String,
        #[source]
        source: DriverError,
    },

    #[error("failed to create partition {name}: {source}")]
    Create {
        name: String,
        #[source]
        source: DriverError,
        /// Changes the pass made before failing
        partial: RunInfo,
    },

    #[error("failed to drop partition {name}: {source}")]
    Drop {
        name: String,
        #[source]
        source: DriverError,
        partial: RunInfo,
    },

    #[error("partition window of {table} is out of the supported date range")]
    OutOfRange { table: String },
}

impl PartitionError {
    /// The partition (or table, for listing failures) the error is about
    pub fn subject(&self) -> &str {
        match self {
            PartitionError::List { table, .. } | PartitionError::OutOfRange { table } => table,
            PartitionError::Create { name, .. } | PartitionError::Drop { name, .. } => name,
        }
    }
}

impl PartitionError {
    /// What an aborted pass had already changed; `None` for failures before any change
    pub fn partial_run(&self) -> Option<RunInfo> {
        match self {
            PartitionError::Create { partial, .. } | PartitionError::Drop { partial, .. } => {
                Some(*partial)
            }
            PartitionError::List { .. } | PartitionError::OutOfRange { .. } => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, PartitionError>;

/// Summary of one reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunInfo {
    /// Partitions the driver reported before any change
    pub existing: usize,
    pub created: usize,
    pub dropped: usize,
}

/// Changes one pass would make, in execution order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Plan {
    pub create: Vec<CreatePartitionInfo>,
    pub drop: Vec<String>,
    /// Existing partitions inside the retention window
    pub kept: Vec<String>,
    /// Partitions due for deletion that the drop filter vetoed
    pub protected: Vec<String>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.drop.is_empty()
    }
}

/// Where an existing partition stands relative to the window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionState {
    /// Bucket inside the retention window
    Retained,
    /// Bucket older than the retention floor
    Expired,
    /// Bucket newer than the next one
    Ahead,
    /// Name doesn't follow the table's naming scheme
    Foreign,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionStatus {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<DateTime<Utc>>,
    pub state: PartitionState,
    /// Vetoed by the drop filter
    pub protected: bool,
}

/// Rolling window of time-range partitions for one parent table
#[derive(Clone, Builder)]
pub struct Partitioner {
    #[builder(start_fn, into)]
    parent_table: String,
    #[builder(start_fn)]
    interval: Interval,
    /// Number of past buckets retained besides the current one
    #[builder(start_fn)]
    keep: u32,
    can_drop: Option<DropFilter>,
}

impl Partitioner {
    pub fn new(parent_table: impl Into<String>, interval: Interval, keep: u32) -> Self {
        Self::builder(parent_table, interval, keep).build()
    }

    /// Protect partitions from being dropped
    pub fn with_drop_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.can_drop = Some(Arc::new(filter));
        self
    }

    /// Never drop any of `names`
    pub fn protecting<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let protected: BTreeSet<String> = names.into_iter().map(Into::into).collect();
        self.with_drop_filter(move |name| !protected.contains(name))
    }

    pub fn parent_table(&self) -> &str {
        &self.parent_table
    }

    pub fn interval(&self) -> Interval {
        self.interval
    }

    pub fn keep(&self) -> u32 {
        self.keep
    }

    /// Name of the partition that holds `ts`
    pub fn partition_name(&self, ts: DateTime<Utc>) -> String {
        self.interval.partition_name(ts, &self.parent_table)
    }

    fn may_drop(&self, name: &str) -> bool {
        self.can_drop.as_ref().is_none_or(|filter| filter(name))
    }

    fn out_of_range(&self) -> PartitionError {
        PartitionError::OutOfRange {
            table: self.parent_table.clone(),
        }
    }

    /// `(min_keep, min_create, max_ts)` for `now`
    fn watermarks(&self, now: DateTime<Utc>) -> Result<(DateTime<Utc>, DateTime<Utc>, DateTime<Utc>)> {
        let interval = self.interval;
        let current = interval.truncate(now);
        let min_keep = interval
            .decrement(current, self.keep)
            .ok_or_else(|| self.out_of_range())?;
        let min_create = interval.decrement(current, 1).ok_or_else(|| self.out_of_range())?;
        let max_ts = interval.increment(current, 1).ok_or_else(|| self.out_of_range())?;
        Ok((min_keep, min_create, max_ts))
    }

    /// Diff `existing` against the window around `now` without touching anything
    pub fn plan(&self, existing: &BTreeSet<String>, now: DateTime<Utc>) -> Result<Plan> {
        let interval = self.interval;
        let (min_keep, min_create, max_ts) = self.watermarks(now)?;

        let mut plan = Plan::default();
        let mut matched = BTreeSet::new();

        let mut ts = min_keep;
        while ts <= max_ts {
            let next = interval.increment(ts, 1).ok_or_else(|| self.out_of_range())?;
            let name = self.partition_name(ts);

            if existing.contains(&name) {
                plan.kept.push(name.clone());
                matched.insert(name);
            } else if ts >= min_create {
                plan.create.push(CreatePartitionInfo {
                    parent_table: self.parent_table.clone(),
                    name,
                    from_date: ts,
                    to_date: next,
                });
            }

            ts = next;
        }

        for name in existing.iter().filter(|name| !matched.contains(*name)) {
            if self.may_drop(name) {
                plan.drop.push(name.clone());
            } else {
                plan.protected.push(name.clone());
            }
        }

        Ok(plan)
    }

    /// Classify every existing partition against the window around `now`
    pub fn status(&self, existing: &BTreeSet<String>, now: DateTime<Utc>) -> Result<Vec<PartitionStatus>> {
        let (min_keep, _, max_ts) = self.watermarks(now)?;

        Ok(existing
            .iter()
            .map(|name| {
                let bucket = self.interval.parse_partition_name(name, &self.parent_table);
                let state = match bucket {
                    None => PartitionState::Foreign,
                    Some(ts) if ts < min_keep => PartitionState::Expired,
                    Some(ts) if ts > max_ts => PartitionState::Ahead,
                    Some(_) => PartitionState::Retained,
                };
                PartitionStatus {
                    name: name.clone(),
                    bucket,
                    state,
                    protected: !self.may_drop(name),
                }
            })
            .collect())
    }

    /// Run one reconciliation pass against `driver`
    ///
    /// Stops at the first driver failure. Changes made earlier in the pass
    /// stay in place; the next pass picks up from there.
    pub async fn manage_partitions<D>(&self, driver: &D, now: DateTime<Utc>) -> Result<RunInfo>
    where
        D: Driver + ?Sized,
    {
        let existing = driver
            .list_existing_partitions(&self.parent_table)
            .await
            .map_err(|source| PartitionError::List {
                table: self.parent_table.clone(),
                source,
            })?;

        let plan = self.plan(&existing, now)?;
        debug!(
            table = %self.parent_table,
            existing = existing.len(),
            create = plan.create.len(),
            drop = plan.drop.len(),
            protected = plan.protected.len(),
            "Reconciling partitions"
        );

        let mut run = RunInfo {
            existing: existing.len(),
            ..RunInfo::default()
        };

        for info in &plan.create {
            driver
                .create_partition(info)
                .await
                .map_err(|source| PartitionError::Create {
                    name: info.name.clone(),
                    source,
                    partial: run,
                })?;
            run.created += 1;
        }

        for name in &plan.drop {
            driver
                .drop_partition(name)
                .await
                .map_err(|source| PartitionError::Drop {
                    name: name.clone(),
                    source,
                    partial: run,
                })?;
            run.dropped += 1;
        }

        if run.created > 0 || run.dropped > 0 {
            info!(
                table = %self.parent_table,
                created = run.created,
                dropped = run.dropped,
                "Partitions reconciled"
            );
        }

        Ok(run)
    }
}

impl fmt::Debug for Partitioner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Partitioner")
            .field("parent_table", &self.parent_table)
            .field("interval", &self.interval)
            .field("keep", &self.keep)
            .field("can_drop", &self.can_drop.as_ref().map(|_| "<filter>"))
            .finish()
    }
}
