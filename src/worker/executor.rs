use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::config::{ClientConfig, ToolConfig};
use crate::error::{ClientError, Result};
use crate::payload::ArgumentFormatter;
use crate::scheduler::Job;
use crate::worker::outcome::{classify, collapse_whitespace, JobOutcome};
use crate::worker::process::{run_cancellable, ProcessExit};

/// Outcome of one job together with when it ran.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    pub outcome: JobOutcome,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl ExecutionReport {
    pub fn elapsed(&self) -> Duration {
        (self.completed_at - self.started_at)
            .to_std()
            .unwrap_or_default()
    }
}

/// Runs the external tool for one job.
///
/// Formats the arguments file next to the staging file, spawns the tool,
/// and classifies what it printed. Every call logs exactly one terminal
/// line for the job.
#[derive(Clone)]
pub struct JobExecutor {
    tool: ToolConfig,
    formatter: Arc<dyn ArgumentFormatter>,
    grace: Duration,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for JobExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobExecutor")
            .field("tool", &self.tool)
            .field("grace", &self.grace)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl JobExecutor {
    pub fn new(config: &ClientConfig, formatter: Arc<dyn ArgumentFormatter>) -> Self {
        Self {
            tool: config.tool.clone(),
            formatter,
            grace: config.termination_grace,
            timeout: config.job_timeout,
        }
    }

    pub async fn execute(&self, job: &Job, token: &CancellationToken) -> ExecutionReport {
        let started_at = Utc::now();
        tracing::debug!(
            height = job.height,
            step = job.step,
            weight = job.weight,
            "Executing job"
        );

        let outcome = match self.run(job, token).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let message = collapse_whitespace(&e.to_string());
                JobOutcome::Failed {
                    detail: message.clone(),
                    message,
                }
            }
        };

        let report = ExecutionReport {
            outcome,
            started_at,
            completed_at: Utc::now(),
        };
        log_outcome(job, &report);
        report
    }

    async fn run(&self, job: &Job, token: &CancellationToken) -> Result<JobOutcome> {
        if token.is_cancelled() {
            return Ok(JobOutcome::Cancelled);
        }

        let arguments_file = job.arguments_file();
        let formatter = Arc::clone(&self.formatter);
        let staging_file = job.staging_file.clone();
        let execute_scripts = job.execute_scripts;
        let target = arguments_file.clone();
        tokio::task::spawn_blocking(move || {
            formatter
                .format(&staging_file, execute_scripts, false)?
                .write_to(&target)
        })
        .await??;

        let mut command = Command::new(&self.tool.program);
        command.args(self.tool.command_args(&arguments_file));

        let exit = run_cancellable(command, token, self.timeout, self.grace)
            .await
            .map_err(|e| {
                ClientError::Io(std::io::Error::new(
                    e.kind(),
                    format!("failed to run {}: {}", self.tool.program.display(), e),
                ))
            })?;

        Ok(match exit {
            ProcessExit::Finished(output) => classify(&output),
            ProcessExit::Cancelled => JobOutcome::Cancelled,
            // `timeout` is always set when the runner reports a timeout
            ProcessExit::TimedOut => JobOutcome::TimedOut {
                after: self.timeout.unwrap_or_default(),
            },
        })
    }
}

fn log_outcome(job: &Job, report: &ExecutionReport) {
    let elapsed_ms = report.elapsed().as_millis() as u64;
    match &report.outcome {
        JobOutcome::Succeeded { gas_spent } => {
            tracing::info!(
                height = job.height,
                step = job.step,
                weight = job.weight,
                gas_spent = ?gas_spent,
                elapsed_ms,
                "{} succeeded",
                job
            );
            if gas_spent.is_none() {
                tracing::warn!(height = job.height, "{} reported no gas info", job);
            }
        }
        JobOutcome::Failed { message, detail } | JobOutcome::OutOfMemory { message, detail, .. } => {
            tracing::error!(
                height = job.height,
                step = job.step,
                weight = job.weight,
                elapsed_ms,
                "{} error: {}",
                job,
                message
            );
            tracing::debug!(height = job.height, output = %detail, "Full tool output");
        }
        JobOutcome::TimedOut { after } => {
            tracing::error!(
                height = job.height,
                step = job.step,
                weight = job.weight,
                timeout_ms = after.as_millis() as u64,
                "{} timed out",
                job
            );
        }
        JobOutcome::Cancelled => {
            tracing::info!(
                height = job.height,
                step = job.step,
                weight = job.weight,
                "{} cancelled",
                job
            );
        }
    }
}
