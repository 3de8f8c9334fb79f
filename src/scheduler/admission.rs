//! Weighted admission control shared by the producer and the workers.
//!
//! # Correctness Invariants
//!
//! - **Atomic admission**: the weight check, the enqueue and the ledger
//!   increment happen under one lock.
//! - **Bounded waits**: every wait re-checks cancellation at least once per
//!   `poll_interval`, so shutdown cannot hang on a missed wake-up.
//! - **Leak-free**: a popped job is wrapped in a [`ClaimedJob`] whose `Drop`
//!   returns the weight exactly once.
//! - **No admission after cancellation**: the token is checked under the
//!   lock, so a worker that sees "cancelled and empty" can stop safely.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::scheduler::job::Job;
use crate::scheduler::ledger::{Admission, WeightLedger};
use crate::scheduler::queue::{JobQueue, QueueEntry};

/// The run was cancelled before the job could be admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl std::fmt::Display for Cancelled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "admission cancelled")
    }
}

/// Point-in-time view of the ledger and queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct LedgerSnapshot {
    pub ceiling: u64,
    pub current_weight: u64,
    pub peak_weight: u64,
    pub admitted_weight: u64,
    pub released_weight: u64,
    pub oversized_admissions: u64,
    pub pending_jobs: usize,
}

#[derive(Debug)]
struct State {
    ledger: WeightLedger,
    queue: JobQueue,
}

enum TryAdmit {
    Admitted(Admission),
    Blocked(Job),
    Cancelled,
}

enum Take {
    Job(Job, u64),
    Finished,
    Empty,
}

/// Owns the weight ledger and the job queue.
///
/// Shared as `Arc<Scheduler>` between one producer and the worker pool.
/// `changed` plays the role of a condition variable: it is notified after
/// every admission, release, pop and close.
#[derive(Debug)]
pub struct Scheduler {
    state: Mutex<State>,
    changed: Notify,
    poll_interval: Duration,
}

impl Scheduler {
    pub fn new(ceiling: u64, queue_capacity: usize, poll_interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                ledger: WeightLedger::new(ceiling),
                queue: JobQueue::with_capacity(queue_capacity),
            }),
            changed: Notify::new(),
            poll_interval,
        })
    }

    pub fn from_config(config: &ClientConfig) -> Arc<Self> {
        Self::new(
            config.max_weight,
            config.queue_capacity(),
            config.poll_interval,
        )
    }

    /// Lock state with poison recovery.
    ///
    /// Release runs from `Drop`, where a panic would abort the process. The
    /// counters stay meaningful after a panic elsewhere, so recover them.
    fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poison) => poison.into_inner(),
        }
    }

    /// Wait until `weight` fits the budget and the queue has room, then
    /// enqueue the job and charge its weight.
    ///
    /// A job heavier than the ceiling is admitted once nothing else is
    /// outstanding. Returns [`Cancelled`] as soon as the token is observed.
    pub async fn admit(
        &self,
        job: Job,
        weight: u64,
        token: &CancellationToken,
    ) -> Result<Admission, Cancelled> {
        let mut pending = job;
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let height = pending.height;
            match self.try_admit(pending, weight, token) {
                TryAdmit::Admitted(admission) => {
                    self.changed.notify_waiters();
                    return Ok(admission);
                }
                TryAdmit::Cancelled => return Err(Cancelled),
                TryAdmit::Blocked(job) => pending = job,
            }

            tracing::debug!(height, weight, "Producer is waiting for weight to be released");
            tokio::select! {
                _ = notified.as_mut() => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = token.cancelled() => {}
            }
        }
    }

    fn try_admit(&self, job: Job, weight: u64, token: &CancellationToken) -> TryAdmit {
        let mut state = self.lock();
        if token.is_cancelled() {
            return TryAdmit::Cancelled;
        }

        let admission = state.ledger.check(weight);
        if !admission.is_allowed() {
            return TryAdmit::Blocked(job);
        }

        let (height, step) = (job.height, job.step);
        if let Err(job) = state.queue.push(job, weight) {
            return TryAdmit::Blocked(job);
        }
        state.ledger.admit(weight);

        if admission == Admission::Oversized {
            tracing::warn!(
                height,
                step,
                weight,
                max_weight = state.ledger.ceiling(),
                "Job over the weight limit, admitted while idle"
            );
        }
        tracing::debug!(
            height,
            step,
            weight,
            current_weight = state.ledger.current(),
            "Produced job"
        );
        TryAdmit::Admitted(admission)
    }

    /// Append one end-of-stream marker per worker.
    pub fn close(&self, workers: usize) {
        self.lock().queue.close(workers);
        self.changed.notify_waiters();
        tracing::debug!(workers, "Consumers notified");
    }

    /// Take the next job, waiting with a bounded poll.
    ///
    /// Returns `None` on an end-of-stream marker, or once the run is
    /// cancelled and no admitted jobs remain. Jobs still queued at
    /// cancellation are handed out so their weight can be released.
    pub async fn next_job(self: &Arc<Self>, token: &CancellationToken) -> Option<ClaimedJob> {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_take(token) {
                Take::Job(job, weight) => {
                    self.changed.notify_waiters();
                    return Some(ClaimedJob {
                        job,
                        weight,
                        scheduler: Arc::clone(self),
                        released: false,
                    });
                }
                Take::Finished => return None,
                Take::Empty => {}
            }

            tokio::select! {
                _ = notified.as_mut() => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = token.cancelled() => {}
            }
        }
    }

    fn try_take(&self, token: &CancellationToken) -> Take {
        let mut state = self.lock();
        match state.queue.pop() {
            Some(QueueEntry::Job { job, weight }) => Take::Job(job, weight),
            Some(QueueEntry::EndOfStream) => Take::Finished,
            None if token.is_cancelled() => Take::Finished,
            None => Take::Empty,
        }
    }

    fn release(&self, weight: u64) {
        let current = {
            let mut state = self.lock();
            if !state.ledger.release(weight) {
                tracing::error!(weight, "Released more weight than was admitted");
            }
            state.ledger.current()
        };
        self.changed.notify_waiters();
        tracing::debug!(weight, current_weight = current, "Finished processing job");
    }

    pub fn current_weight(&self) -> u64 {
        self.lock().ledger.current()
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        let state = self.lock();
        LedgerSnapshot {
            ceiling: state.ledger.ceiling(),
            current_weight: state.ledger.current(),
            peak_weight: state.ledger.peak(),
            admitted_weight: state.ledger.admitted_total(),
            released_weight: state.ledger.released_total(),
            oversized_admissions: state.ledger.oversized_admissions(),
            pending_jobs: state.queue.len(),
        }
    }
}

/// A job taken off the queue together with its weight claim.
///
/// Dropping the claim, on any path, returns the weight to the scheduler.
#[derive(Debug)]
pub struct ClaimedJob {
    job: Job,
    weight: u64,
    scheduler: Arc<Scheduler>,
    released: bool,
}

impl ClaimedJob {
    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn weight(&self) -> u64 {
        self.weight
    }

    /// Give the weight back now instead of at end of scope.
    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if !self.released {
            self.released = true;
            self.scheduler.release(self.weight);
        }
    }
}

impl Drop for ClaimedJob {
    fn drop(&mut self) {
        self.release_once();
    }
}
