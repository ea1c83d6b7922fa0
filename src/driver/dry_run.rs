use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::{Mutex, PoisonError};
use tracing::info;

use super::{CreatePartitionInfo, Driver, Result};

/// A create or drop that would have been sent to the store
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum PlannedChange {
    Create(CreatePartitionInfo),
    Drop { name: String },
}

/// Reads from the wrapped driver but only records mutations
///
/// Every recorded change reports success, so a pass over a dry-run driver
/// returns the same counts a real pass would.
#[derive(Debug)]
pub struct DryRunDriver<D> {
    next: D,
    changes: Mutex<Vec<PlannedChange>>,
}

impl<D: Driver> DryRunDriver<D> {
    pub fn new(next: D) -> Self {
        Self {
            next,
            changes: Mutex::new(Vec::new()),
        }
    }

    pub fn changes(&self) -> Vec<PlannedChange> {
        self.changes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, change: PlannedChange) {
        self.changes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(change);
    }
}

#[async_trait]
impl<D: Driver> Driver for DryRunDriver<D> {
    async fn list_existing_partitions(&self, table: &str) -> Result<BTreeSet<String>> {
        self.next.list_existing_partitions(table).await
    }

    async fn create_partition(&self, info: &CreatePartitionInfo) -> Result<()> {
        info!(partition = %info.name, "Would create partition (dry run)");
        self.record(PlannedChange::Create(info.clone()));
        Ok(())
    }

    async fn drop_partition(&self, name: &str) -> Result<()> {
        info!(partition = name, "Would drop partition (dry run)");
        self.record(PlannedChange::Drop {
            name: name.to_string(),
        });
        Ok(())
    }
}
