//! Pool monitor for periodic progress reporting

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info};

/// Live counters updated by the pool.
#[derive(Debug, Default)]
pub struct PoolProgress {
    pending: AtomicUsize,
    active: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
}

impl PoolProgress {
    pub(crate) fn queued(&self) {
        self.pending.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn unqueued(&self) {
        let _ = self
            .pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    pub(crate) fn started(&self) {
        self.unqueued();
        self.active.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn finished(&self, succeeded: bool) {
        let _ = self
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if succeeded {
            self.succeeded.fetch_add(1, Ordering::SeqCst);
        } else {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn snapshot(&self) -> ProgressStats {
        ProgressStats {
            pending: self.pending.load(Ordering::SeqCst),
            active: self.active.load(Ordering::SeqCst),
            succeeded: self.succeeded.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
        }
    }
}

/// Point-in-time pool statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressStats {
    pub pending: usize,
    pub active: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Pool monitor configuration
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Reporting interval
    pub interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
        }
    }
}

/// Pool monitor
pub struct PoolMonitor {
    progress: Arc<PoolProgress>,
    config: MonitorConfig,
}

impl PoolMonitor {
    /// Create a new pool monitor
    pub fn new(progress: Arc<PoolProgress>) -> Self {
        Self::with_config(progress, MonitorConfig::default())
    }

    /// Create a new pool monitor with custom configuration
    pub fn with_config(progress: Arc<PoolProgress>, config: MonitorConfig) -> Self {
        Self { progress, config }
    }

    /// Start reporting. Abort the returned handle to stop.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        let mut ticker = interval(self.config.interval);

        tokio::spawn(async move {
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.report();
            }
        })
    }

    fn report(&self) -> ProgressStats {
        let stats = self.progress.snapshot();
        if stats.pending == 0 && stats.active == 0 {
            debug!("Pool idle");
        } else {
            info!(
                pending = stats.pending,
                active = stats.active,
                succeeded = stats.succeeded,
                failed = stats.failed,
                "Mirror progress"
            );
        }
        stats
    }
}
