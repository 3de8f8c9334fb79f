use std::io::Read;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::config::DEFAULT_TERMINATION_GRACE;
use crate::error::{ClientError, Result};
use crate::payload::{BlockBatch, PayloadGenerator};
use crate::scheduler::Mode;
use crate::worker::process::signal_group;

/// How often a running generator is checked for exit and cancellation.
const WAIT_POLL: Duration = Duration::from_millis(20);

/// Reads block batches from an external program.
///
/// Invoked as `<program> [args..] --mode <mode> --height <h> --num-blocks <n> [--fast]`;
/// the batch is read as JSON from standard output. The program runs in its
/// own process group. Once the cancellation token is set it gets SIGTERM,
/// then SIGKILL after the grace period.
#[derive(Debug, Clone)]
pub struct CommandPayloadGenerator {
    program: PathBuf,
    args: Vec<String>,
    token: CancellationToken,
    grace: Duration,
}

impl CommandPayloadGenerator {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            token: CancellationToken::new(),
            grace: DEFAULT_TERMINATION_GRACE,
        }
    }

    /// Parse a whitespace-separated command line such as `python3 generate_data.py`.
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let program = parts.next()?;
        let mut generator = Self::new(program);
        generator.args = parts.map(str::to_string).collect();
        Some(generator)
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    pub fn with_termination_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }
}

/// Kills the generator's process group unless it was reaped.
struct GeneratorChild {
    child: Child,
    reaped: bool,
}

impl GeneratorChild {
    fn try_wait(&mut self) -> std::io::Result<Option<ExitStatus>> {
        let status = self.child.try_wait()?;
        self.reaped = status.is_some();
        Ok(status)
    }

    /// SIGTERM the group, wait up to `grace`, then SIGKILL.
    fn terminate(&mut self, grace: Duration) {
        if let Err(e) = signal_group(self.child.id(), libc::SIGTERM) {
            tracing::debug!(error = %e, "SIGTERM to generator failed");
        }
        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            if let Ok(Some(_)) = self.try_wait() {
                return;
            }
            std::thread::sleep(WAIT_POLL);
        }
        tracing::warn!(
            pid = self.child.id(),
            grace_ms = grace.as_millis() as u64,
            "Generator ignored SIGTERM, killing"
        );
        let _ = signal_group(self.child.id(), libc::SIGKILL);
        let _ = self.child.kill();
        let _ = self.child.wait();
        self.reaped = true;
    }
}

impl Drop for GeneratorChild {
    fn drop(&mut self) {
        if !self.reaped {
            let _ = signal_group(self.child.id(), libc::SIGKILL);
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

fn read_all(mut reader: impl Read) -> Vec<u8> {
    let mut buf = Vec::new();
    let _ = reader.read_to_end(&mut buf);
    buf
}

fn join_reader(reader: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    reader
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

impl PayloadGenerator for CommandPayloadGenerator {
    fn generate(
        &self,
        mode: Mode,
        initial_height: u64,
        block_span: u64,
        fast: bool,
    ) -> Result<BlockBatch> {
        let failed = |reason: String| ClientError::Generation {
            height: initial_height,
            reason,
        };
        if self.token.is_cancelled() {
            return Err(failed("cancelled".to_string()));
        }

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg("--mode")
            .arg(mode.to_string())
            .arg("--height")
            .arg(initial_height.to_string())
            .arg("--num-blocks")
            .arg(block_span.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);
        if fast {
            command.arg("--fast");
        }

        let child = command
            .spawn()
            .map_err(|e| failed(format!("failed to run {}: {}", self.program.display(), e)))?;
        let mut child = GeneratorChild {
            child,
            reaped: false,
        };
        let stdout = child
            .child
            .stdout
            .take()
            .map(|s| std::thread::spawn(move || read_all(s)));
        let stderr = child
            .child
            .stderr
            .take()
            .map(|s| std::thread::spawn(move || read_all(s)));

        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if self.token.is_cancelled() {
                child.terminate(self.grace);
                return Err(failed("cancelled".to_string()));
            }
            std::thread::sleep(WAIT_POLL);
        };

        let stdout = join_reader(stdout);
        let stderr = join_reader(stderr);

        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr);
            return Err(failed(if stderr.trim().is_empty() {
                format!("generator exited with {}", status)
            } else {
                stderr.trim().to_string()
            }));
        }

        serde_json::from_slice(&stdout).map_err(|e| failed(format!("invalid batch JSON: {}", e)))
    }
}
