use chrono::{DateTime, Utc};
use partitioner::config::Config;
use partitioner::driver::{DryRunDriver, Driver, MemoryDriver, PlannedChange, TracingDriver};
use partitioner::partitioner::{PartitionStatus, Plan, RunInfo};
use partitioner::runner::{ManualClock, Runner, RunnerConfig, SystemClock};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Serialize)]
struct TableRun {
    table: String,
    #[serde(flatten)]
    run: RunInfo,
}

#[derive(Debug, Serialize)]
struct OnceReport {
    at: DateTime<Utc>,
    dry_run: bool,
    tables: Vec<TableRun>,
    #[serde(skip_serializing_if = "Option::is_none")]
    changes: Option<Vec<PlannedChange>>,
}

/// Build the driver every command talks to
pub async fn connect(config: &Config, memory: bool) -> Result<Arc<dyn Driver>, AnyError> {
    if memory {
        warn!("Using the in-memory partition store; nothing is persisted");
        return Ok(Arc::new(TracingDriver::new(MemoryDriver::new())));
    }
    connect_database(config).await
}

#[cfg(feature = "postgres")]
async fn connect_database(config: &Config) -> Result<Arc<dyn Driver>, AnyError> {
    use partitioner::driver::PostgresDriver;

    let options = config.postgres_options()?;
    let driver = PostgresDriver::connect(&options).await?;
    info!(max_connections = options.max_connections, "Connected to PostgreSQL");
    Ok(Arc::new(TracingDriver::new(driver)))
}

#[cfg(not(feature = "postgres"))]
async fn connect_database(_config: &Config) -> Result<Arc<dyn Driver>, AnyError> {
    Err("built without the `postgres` feature; use --memory or rebuild with --features postgres".into())
}

/// Bootstrap, then reconcile periodically until Ctrl+C / SIGTERM
pub async fn run(config: &Config, driver: Arc<dyn Driver>) -> Result<(), AnyError> {
    let shutdown = CancellationToken::new();
    let runner = Runner::with_config(
        shutdown.clone(),
        config.runner.to_runner_config(),
        Arc::new(SystemClock),
    );
    for partitioner in config.partitioners() {
        runner.add(partitioner);
    }

    runner.start(driver).await?;
    info!(
        tables = runner.len(),
        period = %config.runner.period,
        "Partition maintenance running"
    );

    tokio::select! {
        _ = shutdown_signal() => {},
        _ = runner.done() => {},
    }
    shutdown.cancel();
    runner.done().await;

    let stats = runner.metrics().snapshot();
    info!(
        passes = stats.passes,
        failed = stats.passes_failed,
        created = stats.partitions_created,
        dropped = stats.partitions_dropped,
        "Partition maintenance stopped"
    );
    Ok(())
}

/// A single pass over every configured table, printed as JSON
pub async fn once(
    config: &Config,
    driver: Arc<dyn Driver>,
    dry_run: bool,
    at: Option<DateTime<Utc>>,
) -> Result<(), AnyError> {
    let at = at.unwrap_or_else(Utc::now);
    let runner = Runner::with_config(
        CancellationToken::new(),
        RunnerConfig::default(),
        Arc::new(ManualClock::new(at)),
    );
    for partitioner in config.partitioners() {
        runner.add(partitioner);
    }

    let report = if dry_run {
        let recorder = DryRunDriver::new(driver);
        let runs = runner.run_once(&recorder).await?;
        OnceReport {
            at,
            dry_run,
            tables: table_runs(runs),
            changes: Some(recorder.changes()),
        }
    } else {
        let runs = runner.run_once(driver.as_ref()).await?;
        OnceReport {
            at,
            dry_run,
            tables: table_runs(runs),
            changes: None,
        }
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Per-table plan against the current partitions, printed as JSON
pub async fn plan(
    config: &Config,
    driver: Arc<dyn Driver>,
    at: Option<DateTime<Utc>>,
) -> Result<(), AnyError> {
    let at = at.unwrap_or_else(Utc::now);
    let mut plans: BTreeMap<String, Plan> = BTreeMap::new();

    for partitioner in config.partitioners() {
        let existing = driver
            .list_existing_partitions(partitioner.parent_table())
            .await?;
        let plan = partitioner.plan(&existing, at)?;
        plans.insert(partitioner.parent_table().to_string(), plan);
    }

    println!("{}", serde_json::to_string_pretty(&plans)?);
    Ok(())
}

/// Per-table classification of the current partitions, printed as JSON
pub async fn status(
    config: &Config,
    driver: Arc<dyn Driver>,
    at: Option<DateTime<Utc>>,
) -> Result<(), AnyError> {
    let at = at.unwrap_or_else(Utc::now);
    let mut report: BTreeMap<String, Vec<PartitionStatus>> = BTreeMap::new();

    for partitioner in config.partitioners() {
        let existing = driver
            .list_existing_partitions(partitioner.parent_table())
            .await?;
        report.insert(
            partitioner.parent_table().to_string(),
            partitioner.status(&existing, at)?,
        );
    }

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn table_runs(runs: Vec<(String, RunInfo)>) -> Vec<TableRun> {
    runs.into_iter()
        .map(|(table, run)| TableRun { table, run })
        .collect()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
