pub mod config;
pub mod driver;
pub mod humanize;
pub mod interval;
pub mod observability;
pub mod partitioner;
pub mod runner;

pub use driver::{CreatePartitionInfo, Driver, DriverError};
pub use interval::Interval;
pub use partitioner::{PartitionError, Partitioner, RunInfo};
pub use runner::{Runner, RunnerError};
