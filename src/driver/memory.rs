//! In-memory driver
//!
//! Keeps a partition-name -> parent-table map and a journal of every
//! successful create/drop. Creating an existing partition or dropping a
//! missing one fails, so tests notice when the core issues redundant DDL.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{CreatePartitionInfo, Driver, DriverError, Result};

#[derive(Debug, Default)]
struct State {
    partitions: BTreeMap<String, String>,
    created: Vec<CreatePartitionInfo>,
    dropped: Vec<String>,
    list_calls: usize,
    fail_list: HashSet<String>,
    fail_create: HashSet<String>,
    fail_drop: HashSet<String>,
}

#[derive(Debug, Default)]
pub struct MemoryDriver {
    state: Mutex<State>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed existing partitions of `table`
    pub fn with_partitions<I, S>(self, table: &str, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        {
            let mut state = self.lock();
            for name in names {
                state.partitions.insert(name.into(), table.to_string());
            }
        }
        self
    }

    /// Current partitions of `table`
    pub fn partitions(&self, table: &str) -> BTreeSet<String> {
        self.lock()
            .partitions
            .iter()
            .filter(|(_, parent)| parent.as_str() == table)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn created(&self) -> Vec<CreatePartitionInfo> {
        self.lock().created.clone()
    }

    pub fn created_names(&self) -> Vec<String> {
        self.lock().created.iter().map(|info| info.name.clone()).collect()
    }

    pub fn dropped(&self) -> Vec<String> {
        self.lock().dropped.clone()
    }

    /// Number of `list_existing_partitions` calls so far (one per reconciliation pass)
    pub fn list_calls(&self) -> usize {
        self.lock().list_calls
    }

    /// Forget the create/drop journal, keeping the partitions themselves
    pub fn reset_journal(&self) {
        let mut state = self.lock();
        state.created.clear();
        state.dropped.clear();
    }

    pub fn fail_list_on(&self, table: &str) {
        self.lock().fail_list.insert(table.to_string());
    }

    pub fn fail_create_on(&self, name: &str) {
        self.lock().fail_create.insert(name.to_string());
    }

    pub fn fail_drop_on(&self, name: &str) {
        self.lock().fail_drop.insert(name.to_string());
    }

    pub fn clear_faults(&self) {
        let mut state = self.lock();
        state.fail_list.clear();
        state.fail_create.clear();
        state.fail_drop.clear();
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Driver for MemoryDriver {
    async fn list_existing_partitions(&self, table: &str) -> Result<BTreeSet<String>> {
        let mut state = self.lock();
        state.list_calls += 1;
        if state.fail_list.contains(table) {
            return Err(DriverError::Backend(format!("listing {} failed", table)));
        }

        Ok(state
            .partitions
            .iter()
            .filter(|(_, parent)| parent.as_str() == table)
            .map(|(name, _)| name.clone())
            .collect())
    }

    async fn create_partition(&self, info: &CreatePartitionInfo) -> Result<()> {
        let mut state = self.lock();
        if state.fail_create.contains(&info.name) {
            return Err(DriverError::Backend(format!("creating {} failed", info.name)));
        }
        if state.partitions.contains_key(&info.name) {
            return Err(DriverError::AlreadyExists(info.name.clone()));
        }

        state
            .partitions
            .insert(info.name.clone(), info.parent_table.clone());
        state.created.push(info.clone());
        Ok(())
    }

    async fn drop_partition(&self, name: &str) -> Result<()> {
        let mut state = self.lock();
        if state.fail_drop.contains(name) {
            return Err(DriverError::Backend(format!("dropping {} failed", name)));
        }
        if state.partitions.remove(name).is_none() {
            return Err(DriverError::NotFound(name.to_string()));
        }

        state.dropped.push(name.to_string());
        Ok(())
    }
}
