use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::scheduler::{ClaimedJob, Scheduler};
use crate::worker::executor::JobExecutor;
use crate::worker::outcome::JobOutcome;

/// Per-outcome counters shared by all workers.
#[derive(Debug, Default)]
pub struct OutcomeTally {
    succeeded: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    cancelled: AtomicU64,
    skipped: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TallySnapshot {
    pub succeeded: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub cancelled: u64,
    /// Queued jobs dropped after cancellation without running
    pub skipped: u64,
}

impl TallySnapshot {
    /// Every job a worker took off the queue.
    pub fn processed(&self) -> u64 {
        self.succeeded + self.failed + self.timed_out + self.cancelled + self.skipped
    }
}

impl OutcomeTally {
    fn record(&self, outcome: &JobOutcome) {
        let counter = match outcome {
            JobOutcome::Succeeded { .. } => &self.succeeded,
            JobOutcome::Failed { .. } | JobOutcome::OutOfMemory { .. } => &self.failed,
            JobOutcome::TimedOut { .. } => &self.timed_out,
            JobOutcome::Cancelled => &self.cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    fn record_skip(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TallySnapshot {
        TallySnapshot {
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

/// Fixed set of workers pulling from one [`Scheduler`].
pub struct WorkerPool {
    size: usize,
    scheduler: Arc<Scheduler>,
    executor: Arc<JobExecutor>,
    token: CancellationToken,
    tally: Arc<OutcomeTally>,
}

impl WorkerPool {
    pub fn new(
        size: usize,
        scheduler: Arc<Scheduler>,
        executor: JobExecutor,
        token: CancellationToken,
    ) -> Self {
        Self {
            size,
            scheduler,
            executor: Arc::new(executor),
            token,
            tally: Arc::new(OutcomeTally::default()),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Spawn every worker. Each handle completes when its worker exits.
    pub fn spawn(&self) -> Vec<JoinHandle<()>> {
        (0..self.size)
            .map(|id| {
                let scheduler = Arc::clone(&self.scheduler);
                let executor = Arc::clone(&self.executor);
                let token = self.token.clone();
                let tally = Arc::clone(&self.tally);
                tokio::spawn(worker_loop(id, scheduler, executor, token, tally))
            })
            .collect()
    }

    pub fn tally(&self) -> TallySnapshot {
        self.tally.snapshot()
    }
}

async fn worker_loop(
    id: usize,
    scheduler: Arc<Scheduler>,
    executor: Arc<JobExecutor>,
    token: CancellationToken,
    tally: Arc<OutcomeTally>,
) {
    tracing::debug!(worker = id, "Worker started");

    while let Some(claim) = scheduler.next_job(&token).await {
        if token.is_cancelled() {
            tracing::debug!(worker = id, height = claim.job().height, "Skipping queued job");
            tally.record_skip();
            claim.release();
            continue;
        }
        process(id, claim, &executor, &token, &tally).await;
    }

    tracing::debug!(worker = id, "Worker is exiting");
}

/// Run one claimed job in its own task so a panic stays contained.
async fn process(
    id: usize,
    claim: ClaimedJob,
    executor: &Arc<JobExecutor>,
    token: &CancellationToken,
    tally: &OutcomeTally,
) {
    let height = claim.job().height;
    let executor = Arc::clone(executor);
    let token = token.clone();

    // The claim moves into the task; its weight is released when the task
    // finishes or unwinds.
    let handle = tokio::spawn(async move {
        let report = executor.execute(claim.job(), &token).await;
        drop(claim);
        report.outcome
    });

    match handle.await {
        Ok(outcome) => tally.record(&outcome),
        Err(e) => {
            tracing::error!(worker = id, height, error = %e, "Unexpected error while processing job");
            tally.record_failure();
        }
    }
}
