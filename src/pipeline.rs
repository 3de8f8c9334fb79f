//! End-to-end run: one producer, a worker pool, one shared scheduler.

use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::error::Result;
use crate::payload::{ArgumentFormatter, PayloadGenerator};
use crate::scheduler::{GenerationPlan, JobGenerator, Producer, ProducerStats, Scheduler};
use crate::worker::{JobExecutor, WorkerPool};

/// Totals for one run, printed at the end and optionally written as JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RunSummary {
    pub generated: u64,
    pub generation_failures: u64,
    pub admitted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub cancelled: u64,
    pub skipped: u64,
    pub oversized_admissions: u64,
    pub peak_weight: u64,
    pub admitted_weight: u64,
    pub released_weight: u64,
    pub outstanding_weight: u64,
    pub pending_jobs: usize,
    /// The run was stopped by cancellation
    pub completed_early: bool,
}

impl RunSummary {
    /// All admitted weight was given back.
    pub fn is_balanced(&self) -> bool {
        self.outstanding_weight == 0 && self.admitted_weight == self.released_weight
    }

    /// Jobs that reached a worker, whatever the outcome.
    pub fn processed(&self) -> u64 {
        self.succeeded + self.failed + self.timed_out + self.cancelled + self.skipped
    }
}

pub struct Pipeline {
    config: ClientConfig,
    payloads: Arc<dyn PayloadGenerator>,
    formatter: Arc<dyn ArgumentFormatter>,
}

impl Pipeline {
    pub fn new(
        config: ClientConfig,
        payloads: Arc<dyn PayloadGenerator>,
        formatter: Arc<dyn ArgumentFormatter>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            payloads,
            formatter,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Generate, admit and execute every job of `plan`.
    ///
    /// Returns once the producer and all workers have exited. Cancelling
    /// `token` stops generation and admission, terminates running tools,
    /// and drops queued jobs; the summary then has `completed_early` set.
    pub async fn run(&self, plan: &GenerationPlan, token: CancellationToken) -> Result<RunSummary> {
        let workers = self.config.worker_count;

        tracing::info!(
            start = plan.start,
            blocks = plan.blocks,
            step = plan.step,
            mode = %plan.mode,
            strategy = %plan.strategy,
            execute_scripts = plan.execute_scripts,
            "Starting client"
        );
        tracing::info!(
            max_weight = self.config.max_weight,
            workers,
            queue_capacity = self.config.queue_capacity(),
            "Admission limits"
        );

        let generator = JobGenerator::new(
            plan,
            Arc::clone(&self.payloads),
            &self.config.cache_dir,
            token.clone(),
        )?;
        let scheduler = Scheduler::from_config(&self.config);
        let executor = JobExecutor::new(&self.config, Arc::clone(&self.formatter));

        let pool = WorkerPool::new(workers, Arc::clone(&scheduler), executor, token.clone());
        let worker_handles = pool.spawn();

        let producer = Producer::new(generator, Arc::clone(&scheduler), workers, token.clone());
        let producer_handle = tokio::spawn(producer.run());

        let producer_stats = match producer_handle.await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::error!(error = %e, "Producer task failed");
                ProducerStats::default()
            }
        };
        for (id, handle) in worker_handles.into_iter().enumerate() {
            if let Err(e) = handle.await {
                tracing::error!(worker = id, error = %e, "Worker task failed");
            }
        }

        let ledger = scheduler.snapshot();
        let tally = pool.tally();
        let summary = RunSummary {
            generated: producer_stats.generated,
            generation_failures: producer_stats.generation_failures,
            admitted: producer_stats.admitted,
            succeeded: tally.succeeded,
            failed: tally.failed,
            timed_out: tally.timed_out,
            cancelled: tally.cancelled,
            skipped: tally.skipped,
            oversized_admissions: ledger.oversized_admissions,
            peak_weight: ledger.peak_weight,
            admitted_weight: ledger.admitted_weight,
            released_weight: ledger.released_weight,
            outstanding_weight: ledger.current_weight,
            pending_jobs: ledger.pending_jobs,
            completed_early: token.is_cancelled(),
        };

        if summary.outstanding_weight != 0 {
            tracing::error!(
                outstanding_weight = summary.outstanding_weight,
                "Weight still outstanding after all workers exited"
            );
        }
        tracing::info!(
            generated = summary.generated,
            succeeded = summary.succeeded,
            failed = summary.failed,
            timed_out = summary.timed_out,
            cancelled = summary.cancelled,
            skipped = summary.skipped,
            peak_weight = summary.peak_weight,
            "Run summary"
        );
        if summary.completed_early {
            tracing::info!("Shutdown complete.");
        } else {
            tracing::info!("All jobs have been processed.");
        }

        Ok(summary)
    }
}
