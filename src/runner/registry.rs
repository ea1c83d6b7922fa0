use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use crate::partitioner::Partitioner;

/// Handle of a partitioner registered with a [`Runner`](super::Runner)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
pub struct PartitionerId(Uuid);

impl PartitionerId {
    fn generate() -> Self {
        // v7 ids sort by creation time, so passes visit tables in registration order
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for PartitionerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Registered partitioners; the lock is never held across an await
#[derive(Debug, Default)]
pub(crate) struct Registry {
    entries: Mutex<BTreeMap<PartitionerId, Arc<Partitioner>>>,
}

impl Registry {
    pub(crate) fn insert(&self, partitioner: Partitioner) -> PartitionerId {
        let id = PartitionerId::generate();
        self.lock().insert(id, Arc::new(partitioner));
        id
    }

    pub(crate) fn remove(&self, id: PartitionerId) -> bool {
        self.lock().remove(&id).is_some()
    }

    pub(crate) fn get(&self, id: PartitionerId) -> Option<Arc<Partitioner>> {
        self.lock().get(&id).cloned()
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<Partitioner>> {
        self.lock().values().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<PartitionerId, Arc<Partitioner>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
