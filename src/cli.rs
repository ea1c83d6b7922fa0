use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "partitioner")]
#[command(about = "Keeps a rolling window of time-range table partitions", long_about = None)]
pub struct Cli {
    /// Configuration file (default: $PARTITIONER_CONFIG or config/partitioner.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Use an in-memory partition store instead of the database
    #[arg(long, global = true)]
    pub memory: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Reconcile once, then keep reconciling periodically until interrupted
    Run,
    /// Run a single reconciliation pass over all configured tables
    Once(OnceArgs),
    /// Show what a reconciliation pass would change, without changing anything
    Plan(PlanArgs),
    /// Classify existing partitions as retained, expired, ahead or foreign
    Status(PlanArgs),
}

#[derive(clap::Args, Debug)]
pub struct OnceArgs {
    /// Record creates/drops instead of executing them
    #[arg(long)]
    pub dry_run: bool,

    /// Reconcile as if it were this moment (RFC 3339)
    #[arg(long)]
    pub at: Option<DateTime<Utc>>,
}

#[derive(clap::Args, Debug)]
pub struct PlanArgs {
    /// Evaluate as if it were this moment (RFC 3339)
    #[arg(long)]
    pub at: Option<DateTime<Utc>>,
}
