//! Bounded worker pool.
//!
//! N workers share one job channel. The channel holds at most N queued
//! jobs, so the producer blocks while every worker is busy. Closing the
//! channel is how workers learn the input is exhausted.

use a3s_mirror_core::config::MAX_JOBS;
use a3s_mirror_core::error::MirrorError;
use a3s_mirror_core::job::{Job, JobOutcome};
use anyhow::{bail, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::failed::FailedList;
use crate::monitor::PoolProgress;

type JobReceiver = Arc<Mutex<mpsc::Receiver<Box<dyn Job>>>>;

/// Totals for one pool run.
#[derive(Debug, Clone, Default)]
pub struct PoolSummary {
    pub succeeded: usize,
    pub failed: usize,
    /// Jobs never started because the run was cancelled
    pub cancelled: usize,
    pub outcomes: Vec<JobOutcome>,
}

impl PoolSummary {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.cancelled
    }

    /// Every dispatched job ran and succeeded.
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.cancelled == 0
    }
}

/// Fixed-size pool of job workers.
pub struct WorkerPool {
    workers: usize,
    timeout: Duration,
    failed: Arc<FailedList>,
    cancel: CancellationToken,
    progress: Arc<PoolProgress>,
}

impl WorkerPool {
    /// Create a pool of `workers` workers (1..=20), each job bounded by `timeout`.
    pub fn new(workers: usize, timeout: Duration, failed: Arc<FailedList>) -> Result<Self> {
        if workers == 0 || workers > MAX_JOBS {
            bail!("worker count must be between 1 and {}, got {}", MAX_JOBS, workers);
        }
        Ok(Self {
            workers,
            timeout,
            failed,
            cancel: CancellationToken::new(),
            progress: Arc::new(PoolProgress::default()),
        })
    }

    /// Use an externally owned cancellation token (e.g. wired to Ctrl-C).
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn progress(&self) -> Arc<PoolProgress> {
        Arc::clone(&self.progress)
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run every job and wait for all of them to finish.
    ///
    /// A failed job is written to the failure file and never stops the
    /// others. Only a failure file write error aborts the run.
    pub async fn run<I>(&self, jobs: I) -> Result<PoolSummary>
    where
        I: IntoIterator<Item = Box<dyn Job>>,
    {
        let (tx, rx) = mpsc::channel::<Box<dyn Job>>(self.workers);
        let rx: JobReceiver = Arc::new(Mutex::new(rx));
        // Cancelled by the operator token, or by a worker that cannot
        // record a failure.
        let abort = self.cancel.child_token();

        let mut handles = Vec::with_capacity(self.workers);
        for worker in 0..self.workers {
            let rx = Arc::clone(&rx);
            let failed = Arc::clone(&self.failed);
            let cancel = abort.clone();
            let progress = Arc::clone(&self.progress);
            let timeout = self.timeout;
            handles.push(tokio::spawn(async move {
                run_worker(worker, rx, failed, cancel, progress, timeout).await
            }));
        }

        let mut cancelled = 0;
        let mut jobs = jobs.into_iter();
        while let Some(job) = jobs.next() {
            if abort.is_cancelled() {
                cancelled += 1 + jobs.by_ref().count();
                break;
            }
            self.progress.queued();
            tokio::select! {
                biased;
                _ = abort.cancelled() => {
                    self.progress.unqueued();
                    cancelled += 1 + jobs.by_ref().count();
                    break;
                }
                sent = tx.send(job) => {
                    if sent.is_err() {
                        self.progress.unqueued();
                        cancelled += 1 + jobs.by_ref().count();
                        break;
                    }
                }
            }
        }
        drop(tx);

        let mut summary = PoolSummary::default();
        let mut fatal = None;
        for handle in handles {
            match handle.await {
                Ok(Ok(outcomes)) => summary.outcomes.extend(outcomes),
                Ok(Err(e)) => fatal = fatal.or(Some(e)),
                Err(e) => fatal = fatal.or(Some(anyhow::anyhow!("worker panicked: {}", e))),
            }
        }

        // Jobs still queued when the workers stopped.
        let mut rx = rx.lock().await;
        while rx.try_recv().is_ok() {
            self.progress.unqueued();
            cancelled += 1;
        }

        if let Some(e) = fatal {
            return Err(e);
        }

        summary.succeeded = summary.outcomes.iter().filter(|o| o.succeeded).count();
        summary.failed = summary.outcomes.len() - summary.succeeded;
        summary.cancelled = cancelled;
        if cancelled > 0 {
            tracing::warn!(cancelled, "Run cancelled, queued jobs were abandoned");
        }
        tracing::info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            cancelled = summary.cancelled,
            failure_file = %self.failed.path().display(),
            "Worker pool finished"
        );
        Ok(summary)
    }
}

async fn next_job(rx: &JobReceiver, cancel: &CancellationToken) -> Option<Box<dyn Job>> {
    let mut rx = rx.lock().await;
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        job = rx.recv() => job,
    }
}

async fn run_worker(
    worker: usize,
    rx: JobReceiver,
    failed: Arc<FailedList>,
    cancel: CancellationToken,
    progress: Arc<PoolProgress>,
    timeout: Duration,
) -> Result<Vec<JobOutcome>> {
    let mut outcomes = Vec::new();
    while let Some(mut job) = next_job(&rx, &cancel).await {
        let id = job.id();
        progress.started();
        tracing::debug!(worker, job = %id, job_type = job.job_type(), "Job started");

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(MirrorError::Cancelled(id.clone())),
            r = tokio::time::timeout(timeout, job.execute()) => match r {
                Ok(r) => r,
                Err(_) => Err(MirrorError::Timeout(format!(
                    "{} did not finish within {}s",
                    id,
                    timeout.as_secs()
                ))),
            },
        };

        match result {
            Ok(()) => {
                progress.finished(true);
                outcomes.push(JobOutcome::success(id));
            }
            Err(e) => {
                progress.finished(false);
                tracing::warn!(worker, job = %id, error = %e, "Job failed");
                if let Err(write_error) = failed.append(&job.failure_line()).await {
                    tracing::error!(worker, error = %write_error, "Cannot record failed job, stopping the run");
                    cancel.cancel();
                    return Err(write_error);
                }
                outcomes.push(JobOutcome::failure(id, &e));
            }
        }
    }
    tracing::debug!(worker, "Worker stopped");
    Ok(outcomes)
}
