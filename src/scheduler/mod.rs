//! Producer side of the pipeline and the shared admission state.
//!
//! - [`JobGenerator`] stages one batch per height of a [`GenerationPlan`]
//! - [`Producer`] feeds those jobs through [`Scheduler::admit`]
//! - [`Scheduler`] owns the [`WeightLedger`] and the bounded [`JobQueue`]

pub mod admission;
pub mod generator;
pub mod job;
pub mod ledger;
pub mod producer;
pub mod queue;

pub use admission::{Cancelled, ClaimedJob, LedgerSnapshot, Scheduler};
pub use generator::{plan_heights, GenerationPlan, Heights, JobGenerator, Strategy};
pub use job::{Job, Mode};
pub use ledger::{Admission, WeightLedger};
pub use producer::{Producer, ProducerStats};
pub use queue::{JobQueue, QueueEntry};
