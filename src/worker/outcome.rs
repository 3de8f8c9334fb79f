//! Classification of a finished tool run.
//!
//! Works on captured text only, so every rule here is testable without
//! spawning anything.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

/// Substrings in standard output that mark a run as failed.
pub const FAILURE_MARKERS: [&str; 3] = ["FAIL", "error", "panicked"];

/// Normalised exit code of a child killed with SIGKILL, the usual OOM kill.
pub const OOM_EXIT_CODE: i32 = -9;

/// Captured result of one tool run.
///
/// `exit_code` is the process exit code, or `-signo` if a signal ended it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded {
        gas_spent: Option<u64>,
    },
    /// Non-zero exit or a failure marker in the output
    Failed { message: String, detail: String },
    /// Killed by the OS, most likely for memory
    OutOfMemory {
        gas_spent: Option<u64>,
        message: String,
        detail: String,
    },
    TimedOut { after: Duration },
    Cancelled,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Succeeded { .. })
    }

    /// Log-ready failure message, if the run failed.
    pub fn message(&self) -> Option<&str> {
        match self {
            JobOutcome::Failed { message, .. } | JobOutcome::OutOfMemory { message, .. } => {
                Some(message.as_str())
            }
            _ => None,
        }
    }

    pub fn gas_spent(&self) -> Option<u64> {
        match self {
            JobOutcome::Succeeded { gas_spent } | JobOutcome::OutOfMemory { gas_spent, .. } => {
                *gas_spent
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobOutcome::Succeeded { .. } => write!(f, "succeeded"),
            JobOutcome::Failed { .. } => write!(f, "failed"),
            JobOutcome::OutOfMemory { .. } => write!(f, "out of memory"),
            JobOutcome::TimedOut { .. } => write!(f, "timed out"),
            JobOutcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

fn gas_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"gas_spent=(\d+)").expect("gas pattern is valid"))
}

fn quoted_error_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"error='([^']*)'").expect("quoted error pattern is valid"))
}

fn generic_error_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?s)error: (.*)").expect("error pattern is valid"))
}

fn whitespace_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\s+").expect("whitespace pattern is valid"))
}

/// Digits of the first `gas_spent=<n>` figure in `text`, as printed.
pub fn raw_gas(text: &str) -> Option<&str> {
    gas_pattern()
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// First `gas_spent=<n>` figure in `text`.
///
/// `None` if there is no figure or it does not fit in a `u64`.
pub fn extract_gas(text: &str) -> Option<u64> {
    let digits = raw_gas(text)?;
    match digits.parse() {
        Ok(gas) => Some(gas),
        Err(e) => {
            tracing::warn!(raw = digits, error = %e, "Gas figure does not fit in u64");
            None
        }
    }
}

/// Pull the error message out of tool output.
///
/// Tries `error='<msg>'`, then `error: <rest>`, then falls back to the whole
/// text.
pub fn extract_error_message(text: &str) -> &str {
    if let Some(m) = quoted_error_pattern().captures(text).and_then(|c| c.get(1)) {
        return m.as_str();
    }
    if let Some(m) = generic_error_pattern().captures(text).and_then(|c| c.get(1)) {
        return m.as_str();
    }
    text
}

/// Collapse runs of whitespace into single spaces for one-line logs.
pub fn collapse_whitespace(text: &str) -> String {
    whitespace_pattern().replace_all(text, " ").trim().to_string()
}

/// Classify a finished run.
pub fn classify(output: &ToolOutput) -> JobOutcome {
    let marked = FAILURE_MARKERS
        .iter()
        .any(|marker| output.stdout.contains(marker));

    if output.exit_code == 0 && !marked {
        return JobOutcome::Succeeded {
            gas_spent: extract_gas(&output.stdout),
        };
    }

    let detail = if output.stdout.is_empty() {
        output.stderr.clone()
    } else {
        output.stdout.clone()
    };

    if output.exit_code == OOM_EXIT_CODE {
        let gas_spent = extract_gas(&output.stdout);
        let gas_info = match raw_gas(&output.stdout) {
            Some(gas) => format!(", gas spent: {}", gas),
            None => ", no gas info found".to_string(),
        };
        return JobOutcome::OutOfMemory {
            gas_spent,
            message: format!("Return code {}, killed by OOM?{}", OOM_EXIT_CODE, gas_info),
            detail,
        };
    }

    JobOutcome::Failed {
        message: collapse_whitespace(extract_error_message(&detail)),
        detail,
    }
}
