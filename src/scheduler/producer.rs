use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::scheduler::admission::Scheduler;
use crate::scheduler::generator::JobGenerator;
use crate::scheduler::ledger::Admission;

/// What the producer did before it exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ProducerStats {
    pub generated: u64,
    pub generation_failures: u64,
    pub admitted: u64,
    pub oversized: u64,
}

/// Appends the end-of-stream markers however the producer exits.
struct EndOfStreamGuard {
    scheduler: Arc<Scheduler>,
    workers: usize,
}

impl Drop for EndOfStreamGuard {
    fn drop(&mut self) {
        self.scheduler.close(self.workers);
    }
}

/// Drains a [`JobGenerator`] into the scheduler, honouring the weight budget.
pub struct Producer {
    generator: JobGenerator,
    scheduler: Arc<Scheduler>,
    workers: usize,
    token: CancellationToken,
}

impl Producer {
    pub fn new(
        generator: JobGenerator,
        scheduler: Arc<Scheduler>,
        workers: usize,
        token: CancellationToken,
    ) -> Self {
        Self {
            generator,
            scheduler,
            workers,
            token,
        }
    }

    pub async fn run(mut self) -> ProducerStats {
        let _end_of_stream = EndOfStreamGuard {
            scheduler: Arc::clone(&self.scheduler),
            workers: self.workers,
        };
        let mut stats = ProducerStats::default();

        while let Some((job, weight)) = self.generator.next_job().await {
            tracing::debug!(height = job.height, step = job.step, weight, "Adding job");
            match self.scheduler.admit(job, weight, &self.token).await {
                Ok(admission) => {
                    stats.admitted += 1;
                    if admission == Admission::Oversized {
                        stats.oversized += 1;
                    }
                }
                Err(_) => {
                    tracing::debug!("Producer stopped by cancellation");
                    break;
                }
            }
        }

        stats.generated = self.generator.generated();
        stats.generation_failures = self.generator.failed();
        tracing::debug!(
            generated = stats.generated,
            admitted = stats.admitted,
            "Producer is exiting"
        );
        stats
    }
}
