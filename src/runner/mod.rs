//! Periodic partition maintenance
//!
//! A [`Runner`] owns a set of partitioners and keeps their tables reconciled:
//!
//! 1. [`Runner::start`] runs one bootstrap pass over every registered
//!    partitioner. If it fails, the runner never becomes ready.
//! 2. On success the runner is ready and a background task repeats the pass
//!    every [`RunnerConfig::period`] until the cancellation token fires.
//!
//! Passes of one runner never overlap. Errors of periodic passes go through
//! the error filter and are otherwise ignored; the next tick is the retry.
//!
//! ```rust,ignore
//! let runner = Runner::new(shutdown.clone());
//! runner.add(Partitioner::new("events", Interval::Monthly, 12));
//! runner.start(driver).await?;
//! // ...
//! shutdown.cancel();
//! runner.done().await;
//! ```

mod clock;
mod registry;

pub use clock::{Clock, ManualClock, SystemClock};
pub use registry::PartitionerId;

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::driver::Driver;
use crate::observability::Metrics;
use crate::partitioner::{PartitionError, Partitioner, RunInfo};
use registry::Registry;

/// Default time between two periodic passes
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(6 * 60 * 60);

/// Inspects errors before the runner acts on them
///
/// Return the error (possibly a different one) to report it, or `None` to
/// swallow it. Only the bootstrap pass aborts on a reported error.
pub type ErrorFilter = Arc<dyn Fn(&Runner, PartitionError) -> Option<PartitionError> + Send + Sync>;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("runner was already started")]
    AlreadyStarted,

    #[error("runner was cancelled before it started")]
    Cancelled,

    #[error("bootstrap pass failed: {0}")]
    Bootstrap(#[source] PartitionError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerState {
    Created,
    Bootstrapping,
    Running,
    Stopped,
    /// Bootstrap pass failed; the runner never became ready
    Failed,
}

impl RunnerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunnerState::Stopped | RunnerState::Failed)
    }
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub period: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            period: DEFAULT_PERIOD,
        }
    }
}

struct Inner {
    registry: Registry,
    config: RunnerConfig,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
    state: watch::Sender<RunnerState>,
    ready: AtomicBool,
    on_error: Mutex<Option<ErrorFilter>>,
    // serializes passes, including ones triggered through `run_once`
    pass_lock: tokio::sync::Mutex<()>,
    metrics: Arc<Metrics>,
}

/// Cheap to clone; all clones drive the same runner
#[derive(Clone)]
pub struct Runner {
    inner: Arc<Inner>,
}

impl Runner {
    /// `cancel` stops the runner; the runner gets its own child token so
    /// [`Runner::shutdown`] never cancels the caller's token.
    pub fn new(cancel: CancellationToken) -> Self {
        Self::with_config(cancel, RunnerConfig::default(), Arc::new(SystemClock))
    }

    pub fn with_config(cancel: CancellationToken, config: RunnerConfig, clock: Arc<dyn Clock>) -> Self {
        let (state, _) = watch::channel(RunnerState::Created);
        Self {
            inner: Arc::new(Inner {
                registry: Registry::default(),
                config,
                clock,
                cancel: cancel.child_token(),
                state,
                ready: AtomicBool::new(false),
                on_error: Mutex::new(None),
                pass_lock: tokio::sync::Mutex::new(()),
                metrics: Arc::new(Metrics::new()),
            }),
        }
    }

    /// Register a partitioner; it takes part in every pass from now on
    pub fn add(&self, partitioner: Partitioner) -> PartitionerId {
        let id = self.inner.registry.insert(partitioner);
        debug!(%id, "Partitioner registered");
        id
    }

    /// Unregister a partitioner, returns `false` if `id` wasn't registered
    pub fn remove(&self, id: PartitionerId) -> bool {
        self.inner.registry.remove(id)
    }

    pub fn get(&self, id: PartitionerId) -> Option<Arc<Partitioner>> {
        self.inner.registry.get(id)
    }

    pub fn len(&self) -> usize {
        self.inner.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn set_error_filter<F>(&self, filter: F)
    where
        F: Fn(&Runner, PartitionError) -> Option<PartitionError> + Send + Sync + 'static,
    {
        *self
            .inner
            .on_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(filter));
    }

    pub fn state(&self) -> RunnerState {
        *self.inner.state.borrow()
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.inner.metrics.clone()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Stop the periodic task after the pass in flight, if any
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
    }

    /// Whether the bootstrap pass has succeeded
    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::Acquire)
    }

    /// Wait until the runner became ready (`true`) or ended without ever
    /// getting there (`false`)
    pub async fn ready(&self) -> bool {
        let mut rx = self.inner.state.subscribe();
        tokio::select! {
            _ = rx.wait_for(|s| !matches!(s, RunnerState::Created | RunnerState::Bootstrapping)) => {}
            _ = self.cancelled_before_start() => {}
        }
        self.is_ready()
    }

    pub fn is_done(&self) -> bool {
        let state = self.state();
        state.is_terminal() || (state == RunnerState::Created && self.inner.cancel.is_cancelled())
    }

    /// Wait for the periodic task to exit, for bootstrap to fail, or for
    /// cancellation of a runner that was never started
    pub async fn done(&self) {
        let mut rx = self.inner.state.subscribe();
        tokio::select! {
            _ = rx.wait_for(RunnerState::is_terminal) => {}
            _ = self.cancelled_before_start() => {}
        }
    }

    /// Resolves once the token fires while `start` hasn't claimed the runner;
    /// a started runner reports its end through the state instead
    async fn cancelled_before_start(&self) {
        self.inner.cancel.cancelled().await;
        if self.state() != RunnerState::Created {
            std::future::pending::<()>().await;
        }
    }

    /// Run the bootstrap pass and spawn the periodic task
    pub async fn start(&self, driver: Arc<dyn Driver>) -> Result<(), RunnerError> {
        let claimed = self.inner.state.send_if_modified(|state| {
            if *state == RunnerState::Created {
                *state = RunnerState::Bootstrapping;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(RunnerError::AlreadyStarted);
        }

        if self.inner.cancel.is_cancelled() {
            self.set_state(RunnerState::Stopped);
            return Err(RunnerError::Cancelled);
        }

        info!(partitioners = self.len(), "Running bootstrap partition pass");
        if let Err(e) = self.run_once(driver.as_ref()).await {
            if let Some(e) = self.filter_error(e) {
                error!(error = %e, "Bootstrap partition pass failed");
                self.inner.cancel.cancel();
                self.set_state(RunnerState::Failed);
                return Err(RunnerError::Bootstrap(e));
            }
        }

        self.inner.ready.store(true, Ordering::Release);
        self.set_state(RunnerState::Running);
        info!(period = ?self.inner.config.period, "Partition runner ready");

        // first tick is one period after readiness, not after the task is first polled
        let first_tick = Instant::now() + self.inner.config.period;
        let runner = self.clone();
        tokio::spawn(async move { runner.run(driver, first_tick).await });
        Ok(())
    }

    /// One pass over every registered partitioner, in registration order
    ///
    /// The first failure aborts the rest of the pass.
    pub async fn run_once(&self, driver: &dyn Driver) -> Result<Vec<(String, RunInfo)>, PartitionError> {
        let _pass = self.inner.pass_lock.lock().await;
        let now = self.inner.clock.now();
        let partitioners = self.inner.registry.snapshot();

        let mut runs = Vec::with_capacity(partitioners.len());
        for partitioner in partitioners {
            match partitioner.manage_partitions(driver, now).await {
                Ok(run) => {
                    self.inner.metrics.record_run(&run);
                    runs.push((partitioner.parent_table().to_string(), run));
                }
                Err(e) => {
                    if let Some(partial) = e.partial_run() {
                        self.inner.metrics.record_run(&partial);
                    }
                    self.inner.metrics.pass_failed();
                    return Err(e);
                }
            }
        }

        self.inner.metrics.pass_completed();
        Ok(runs)
    }

    async fn run(self, driver: Arc<dyn Driver>, first_tick: Instant) {
        let mut ticker = tokio::time::interval_at(first_tick, self.inner.config.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.inner.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    debug!("Running periodic partition pass");
                    if let Err(e) = self.run_once(driver.as_ref()).await {
                        // reported, but never stops the loop
                        if let Some(e) = self.filter_error(e) {
                            warn!(error = %e, "Periodic partition pass failed");
                        }
                    }
                }
            }
        }

        self.set_state(RunnerState::Stopped);
        info!("Partition runner stopped");
    }

    fn filter_error(&self, err: PartitionError) -> Option<PartitionError> {
        let filter = self
            .inner
            .on_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        match filter {
            Some(filter) => filter(self, err),
            None => Some(err),
        }
    }

    fn set_state(&self, state: RunnerState) {
        self.inner.state.send_replace(state);
    }
}

impl fmt::Debug for Runner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runner")
            .field("state", &self.state())
            .field("partitioners", &self.len())
            .field("period", &self.inner.config.period)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::MemoryDriver;
    use crate::interval::Interval;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::AtomicUsize;

    const PERIOD: Duration = Duration::from_secs(60);

    fn runner_at(clock: Arc<ManualClock>) -> Runner {
        Runner::with_config(CancellationToken::new(), RunnerConfig { period: PERIOD }, clock)
    }

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2023, 2, 6, 0, 0, 0).unwrap()))
    }

    async fn wait_for_passes(runner: &Runner, passes: u64) {
        for _ in 0..1000 {
            if runner.metrics().snapshot().passes >= passes {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("runner did not reach {passes} passes");
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_bootstraps_and_becomes_ready() {
        let driver = Arc::new(MemoryDriver::new());
        let runner = runner_at(clock());
        runner.add(Partitioner::new("t", Interval::Monthly, 10));

        assert_eq!(runner.state(), RunnerState::Created);
        runner.start(driver.clone()).await.unwrap();

        assert_eq!(runner.state(), RunnerState::Running);
        assert!(runner.ready().await);
        assert_eq!(driver.created_names(), vec!["t_2023_01", "t_2023_02", "t_2023_03"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bootstrap_failure_never_signals_ready() {
        let driver = Arc::new(MemoryDriver::new());
        driver.fail_list_on("t");
        let runner = runner_at(clock());
        runner.add(Partitioner::new("t", Interval::Monthly, 10));

        let err = runner.start(driver.clone()).await.unwrap_err();
        assert!(matches!(err, RunnerError::Bootstrap(PartitionError::List { .. })));

        assert_eq!(runner.state(), RunnerState::Failed);
        assert!(!runner.ready().await);
        assert!(runner.is_done());
        runner.done().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_filter_can_suppress_bootstrap_failure() {
        let driver = Arc::new(MemoryDriver::new());
        driver.fail_list_on("t");
        let runner = runner_at(clock());
        runner.add(Partitioner::new("t", Interval::Monthly, 10));
        runner.set_error_filter(|_, _| None);

        runner.start(driver).await.unwrap();
        assert!(runner.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_is_rejected() {
        let driver: Arc<dyn Driver> = Arc::new(MemoryDriver::new());
        let runner = runner_at(clock());

        runner.start(driver.clone()).await.unwrap();
        assert!(matches!(
            runner.start(driver).await.unwrap_err(),
            RunnerError::AlreadyStarted
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_after_cancel() {
        let token = CancellationToken::new();
        let runner = Runner::with_config(token.clone(), RunnerConfig { period: PERIOD }, clock());
        token.cancel();

        let err = runner.start(Arc::new(MemoryDriver::new())).await.unwrap_err();
        assert!(matches!(err, RunnerError::Cancelled));
        assert_eq!(runner.state(), RunnerState::Stopped);
        assert!(!runner.ready().await);
        runner.done().await;
    }

    #[tokio::test]
    async fn test_cancel_without_start_resolves_waiters() {
        let token = CancellationToken::new();
        let runner = Runner::with_config(token.clone(), RunnerConfig { period: PERIOD }, clock());

        let waiter = runner.clone();
        let done = tokio::spawn(async move { waiter.done().await });
        tokio::task::yield_now().await;
        assert!(!runner.is_done());

        token.cancel();
        tokio::time::timeout(Duration::from_secs(2), done)
            .await
            .expect("done() should resolve after cancellation")
            .unwrap();

        assert!(runner.is_done());
        assert!(!runner.ready().await);
        assert_eq!(runner.state(), RunnerState::Created);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_pass_uses_clock() {
        let clock = clock();
        let driver = Arc::new(MemoryDriver::new());
        let runner = runner_at(clock.clone());
        runner.add(Partitioner::new("t", Interval::Monthly, 10));
        runner.start(driver.clone()).await.unwrap();
        assert_eq!(runner.metrics().snapshot().passes, 1);

        clock.set(Utc.with_ymd_and_hms(2023, 3, 18, 0, 0, 0).unwrap());
        driver.reset_journal();
        tokio::time::advance(PERIOD).await;
        wait_for_passes(&runner, 2).await;

        assert_eq!(driver.created_names(), vec!["t_2023_04"]);
        assert!(driver.dropped().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_errors_do_not_stop_the_loop() {
        let driver = Arc::new(MemoryDriver::new());
        let runner = runner_at(clock());
        runner.add(Partitioner::new("t", Interval::Monthly, 10));

        let reported = Arc::new(AtomicUsize::new(0));
        let counter = reported.clone();
        runner.set_error_filter(move |_, e| {
            counter.fetch_add(1, Ordering::SeqCst);
            Some(e)
        });

        runner.start(driver.clone()).await.unwrap();
        driver.fail_list_on("t");

        tokio::time::advance(PERIOD).await;
        wait_for_passes(&runner, 2).await;
        tokio::time::advance(PERIOD).await;
        wait_for_passes(&runner, 3).await;

        assert_eq!(reported.load(Ordering::SeqCst), 2);
        assert_eq!(runner.metrics().snapshot().passes_failed, 2);
        assert_eq!(runner.state(), RunnerState::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_done_fires_after_cancel() {
        let token = CancellationToken::new();
        let runner = Runner::with_config(token.clone(), RunnerConfig { period: PERIOD }, clock());
        runner.start(Arc::new(MemoryDriver::new())).await.unwrap();
        assert!(!runner.is_done());

        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), runner.done())
            .await
            .expect("runner should stop after cancellation");
        assert_eq!(runner.state(), RunnerState::Stopped);
        assert!(runner.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_leaves_parent_token_alone() {
        let token = CancellationToken::new();
        let runner = Runner::with_config(token.clone(), RunnerConfig { period: PERIOD }, clock());
        runner.start(Arc::new(MemoryDriver::new())).await.unwrap();

        runner.shutdown();
        runner.done().await;
        assert!(!token.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_removed_partitioner_is_skipped() {
        let driver = MemoryDriver::new();
        let runner = runner_at(clock());
        let a = runner.add(Partitioner::new("a", Interval::Monthly, 1));
        runner.add(Partitioner::new("b", Interval::Monthly, 1));

        assert!(runner.remove(a));
        assert!(!runner.remove(a));
        assert_eq!(runner.len(), 1);

        let runs = runner.run_once(&driver).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].0, "b");
        assert!(driver.partitions("a").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_aborts_rest_of_pass() {
        let driver = MemoryDriver::new();
        driver.fail_list_on("a");
        let runner = runner_at(clock());
        runner.add(Partitioner::new("a", Interval::Monthly, 1));
        runner.add(Partitioner::new("b", Interval::Monthly, 1));

        assert!(runner.run_once(&driver).await.is_err());
        assert!(driver.partitions("b").is_empty());
    }

    #[tokio::test]
    async fn test_aborted_pass_still_counts_its_changes() {
        let driver = MemoryDriver::new();
        driver.fail_create_on("t_2023_03");
        let runner = runner_at(clock());
        runner.add(Partitioner::new("t", Interval::Monthly, 10));

        assert!(runner.run_once(&driver).await.is_err());

        let stats = runner.metrics().snapshot();
        assert_eq!(stats.partitions_created, driver.created().len() as u64);
        assert_eq!(stats.partitions_created, 2);
        assert_eq!(stats.passes_failed, 1);
    }
}
