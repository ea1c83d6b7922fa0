use async_trait::async_trait;
use std::collections::BTreeSet;
use tracing::{debug, error, info};

use super::{CreatePartitionInfo, Driver, Result};

/// Logs the outcome of every call made to the wrapped driver
#[derive(Debug, Clone)]
pub struct TracingDriver<D> {
    next: D,
}

impl<D: Driver> TracingDriver<D> {
    pub fn new(next: D) -> Self {
        Self { next }
    }

    pub fn inner(&self) -> &D {
        &self.next
    }
}

#[async_trait]
impl<D: Driver> Driver for TracingDriver<D> {
    async fn list_existing_partitions(&self, table: &str) -> Result<BTreeSet<String>> {
        match self.next.list_existing_partitions(table).await {
            Ok(partitions) => {
                debug!(table, count = partitions.len(), "Listed partitions");
                Ok(partitions)
            }
            Err(e) => {
                error!(table, error = %e, "Failed to list partitions");
                Err(e)
            }
        }
    }

    async fn create_partition(&self, info: &CreatePartitionInfo) -> Result<()> {
        match self.next.create_partition(info).await {
            Ok(()) => {
                info!(
                    partition = %info.name,
                    parent = %info.parent_table,
                    from = %info.from_date,
                    to = %info.to_date,
                    "Created partition"
                );
                Ok(())
            }
            Err(e) => {
                error!(partition = %info.name, error = %e, "Failed to create partition");
                Err(e)
            }
        }
    }

    async fn drop_partition(&self, name: &str) -> Result<()> {
        match self.next.drop_partition(name).await {
            Ok(()) => {
                info!(partition = name, "Dropped partition");
                Ok(())
            }
            Err(e) => {
                error!(partition = name, error = %e, "Failed to drop partition");
                Err(e)
            }
        }
    }
}
