//! Reconciliation counters

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::partitioner::RunInfo;

/// Metrics handle shared by a runner and whoever wants to read it
#[derive(Debug, Default)]
pub struct Metrics {
    passes: AtomicU64,
    passes_failed: AtomicU64,
    partitions_created: AtomicU64,
    partitions_dropped: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// One partitioner reconciled successfully
    pub fn record_run(&self, run: &RunInfo) {
        self.partitions_created
            .fetch_add(run.created as u64, Ordering::Relaxed);
        self.partitions_dropped
            .fetch_add(run.dropped as u64, Ordering::Relaxed);
        tracing::debug!(
            created = run.created,
            dropped = run.dropped,
            "Metric incremented"
        );
    }

    pub fn pass_completed(&self) {
        self.passes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn pass_failed(&self) {
        self.passes.fetch_add(1, Ordering::Relaxed);
        self.passes_failed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "passes_failed", "Metric incremented");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            passes: self.passes.load(Ordering::Relaxed),
            passes_failed: self.passes_failed.load(Ordering::Relaxed),
            partitions_created: self.partitions_created.load(Ordering::Relaxed),
            partitions_dropped: self.partitions_dropped.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Finished passes, failed ones included
    pub passes: u64,
    pub passes_failed: u64,
    pub partitions_created: u64,
    pub partitions_dropped: u64,
}
