use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ClientError, Result};

/// Default ceiling on the total weight admitted at once.
pub const DEFAULT_MAX_WEIGHT: u64 = 8000;

/// Default working directory for staging and arguments files.
pub const DEFAULT_CACHE_DIR: &str = ".client_cache";

/// How long a blocked producer or worker waits before re-checking cancellation.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Time a child gets between SIGTERM and SIGKILL.
pub const DEFAULT_TERMINATION_GRACE: Duration = Duration::from_secs(5);

/// Number of workers when none is configured: one per available CPU.
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism().map_or(1, |n| n.get())
}

/// How the external program is invoked for each job.
///
/// The resulting command line is
/// `<program> <subcommand> --no-build --package <package> --function <function> --arguments-file <path>`.
#[derive(Debug, Clone)]
pub struct ToolConfig {
    /// Executable to run (looked up on `PATH` when relative)
    pub program: PathBuf,
    /// The tool's run subcommand
    pub subcommand: String,
    /// Package holding the entry point
    pub package: String,
    /// Entry point function
    pub function: String,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("scarb"),
            subcommand: "cairo-run".to_string(),
            package: "client".to_string(),
            function: "main".to_string(),
        }
    }
}

impl ToolConfig {
    /// Argument vector passed to `program` for one arguments file.
    pub fn command_args(&self, arguments_file: &Path) -> Vec<OsString> {
        vec![
            OsString::from(&self.subcommand),
            OsString::from("--no-build"),
            OsString::from("--package"),
            OsString::from(&self.package),
            OsString::from("--function"),
            OsString::from(&self.function),
            OsString::from("--arguments-file"),
            arguments_file.as_os_str().to_os_string(),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Ceiling on the summed weight of queued and running jobs
    pub max_weight: u64,
    /// Size of the worker pool
    pub worker_count: usize,
    /// Directory holding staging and arguments files
    pub cache_dir: PathBuf,
    /// Upper bound on every blocking wait
    pub poll_interval: Duration,
    /// Grace period between terminate and kill
    pub termination_grace: Duration,
    /// Optional wall-clock limit for a single tool run
    pub job_timeout: Option<Duration>,
    pub tool: ToolConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_weight: DEFAULT_MAX_WEIGHT,
            worker_count: default_worker_count(),
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            poll_interval: DEFAULT_POLL_INTERVAL,
            termination_grace: DEFAULT_TERMINATION_GRACE,
            job_timeout: None,
            tool: ToolConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Capacity of the job queue, excluding end-of-stream markers.
    pub fn queue_capacity(&self) -> usize {
        self.worker_count * 2
    }

    pub fn with_max_weight(mut self, max_weight: u64) -> Self {
        self.max_weight = max_weight;
        self
    }

    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = cache_dir.into();
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_termination_grace(mut self, grace: Duration) -> Self {
        self.termination_grace = grace;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn with_tool(mut self, tool: ToolConfig) -> Self {
        self.tool = tool;
        self
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(ClientError::InvalidConfig(
                "worker count must be at least 1".to_string(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(ClientError::InvalidConfig(
                "poll interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_config_default() {
        let cfg = ToolConfig::default();
        assert_eq!(cfg.program, PathBuf::from("scarb"));
        assert_eq!(cfg.subcommand, "cairo-run");
        assert_eq!(cfg.package, "client");
        assert_eq!(cfg.function, "main");
    }

    #[test]
    fn tool_config_command_args() {
        let cfg = ToolConfig::default();
        let args = cfg.command_args(Path::new("/tmp/light_1_1-arguments.json"));
        let args: Vec<String> = args
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec![
                "cairo-run",
                "--no-build",
                "--package",
                "client",
                "--function",
                "main",
                "--arguments-file",
                "/tmp/light_1_1-arguments.json",
            ]
        );
    }

    #[test]
    fn client_config_default() {
        let cfg = ClientConfig::default();
        assert_eq!(cfg.max_weight, 8000);
        assert!(cfg.worker_count >= 1);
        assert_eq!(cfg.cache_dir, PathBuf::from(".client_cache"));
        assert_eq!(cfg.poll_interval, Duration::from_secs(1));
        assert_eq!(cfg.termination_grace, Duration::from_secs(5));
        assert!(cfg.job_timeout.is_none());
    }

    #[test]
    fn queue_capacity_is_twice_worker_count() {
        let cfg = ClientConfig::default().with_worker_count(3);
        assert_eq!(cfg.queue_capacity(), 6);
    }

    #[test]
    fn builders_override_fields() {
        let cfg = ClientConfig::default()
            .with_max_weight(10)
            .with_cache_dir("/tmp/cache")
            .with_poll_interval(Duration::from_millis(20))
            .with_termination_grace(Duration::from_millis(100))
            .with_job_timeout(Some(Duration::from_secs(3)));
        assert_eq!(cfg.max_weight, 10);
        assert_eq!(cfg.cache_dir, PathBuf::from("/tmp/cache"));
        assert_eq!(cfg.poll_interval, Duration::from_millis(20));
        assert_eq!(cfg.termination_grace, Duration::from_millis(100));
        assert_eq!(cfg.job_timeout, Some(Duration::from_secs(3)));
    }

    #[test]
    fn validate_rejects_zero_workers() {
        let cfg = ClientConfig::default().with_worker_count(0);
        assert!(matches!(cfg.validate(), Err(ClientError::InvalidConfig(_))));
    }

    #[test]
    fn validate_rejects_zero_poll_interval() {
        let cfg = ClientConfig::default().with_poll_interval(Duration::ZERO);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_accepts_defaults() {
        assert!(ClientConfig::default().validate().is_ok());
    }
}
