//! Bounded worker pool for mirror jobs
//!
//! This crate runs many independent jobs with a fixed number of workers,
//! isolates their failures, and records failed jobs in a failure list file.

pub mod failed;
pub mod monitor;
pub mod pool;

pub use failed::FailedList;
pub use monitor::{MonitorConfig, PoolMonitor, PoolProgress, ProgressStats};
pub use pool::{PoolSummary, WorkerPool};
