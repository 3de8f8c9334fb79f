//! Worker side of the pipeline.
//!
//! # Components
//!
//! - [`WorkerPool`]: fixed set of tasks pulling claimed jobs from the scheduler
//! - [`JobExecutor`]: formats arguments, runs the tool, reports the outcome
//! - [`process`]: cancelable child-process runner with SIGTERM/SIGKILL escalation
//! - [`outcome`]: pure classification of captured tool output
//!
//! # Execution Flow
//!
//! 1. A worker takes a [`ClaimedJob`](crate::scheduler::ClaimedJob) off the queue
//! 2. [`JobExecutor::execute`] writes `<staging>-arguments.json`
//! 3. The tool runs as `<program> <subcommand> ... --arguments-file <path>`
//! 4. Output is classified into a [`JobOutcome`] and logged once
//! 5. The claim is dropped, returning its weight to the ledger

pub mod executor;
pub mod outcome;
pub mod pool;
pub mod process;

pub use executor::{ExecutionReport, JobExecutor};
pub use outcome::{JobOutcome, ToolOutput};
pub use pool::{TallySnapshot, WorkerPool};
pub use process::{run_cancellable, signal_group, ChildGuard, ProcessExit};
