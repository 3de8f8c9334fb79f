//! Cancelable child-process runner.
//!
//! A [`ChildGuard`] owns the child for its whole life. Every exit path
//! (normal exit, cancellation, timeout, early return, panic) ends with the
//! child reaped or killed. The child leads its own process group, so
//! signals also reach anything it spawned.

use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::worker::outcome::ToolOutput;

/// How a tool run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessExit {
    Finished(ToolOutput),
    Cancelled,
    TimedOut,
}

/// Send `signal` to the process group led by `pgid`.
///
/// Fails with `ESRCH` once the whole group is gone.
pub fn signal_group(pgid: u32, signal: libc::c_int) -> io::Result<()> {
    // SAFETY: killpg has no memory-safety preconditions. `pgid` is the id
    // of a group we created, and a group id is not reused while any member
    // is alive.
    let rc = unsafe { libc::killpg(pgid as libc::pid_t, signal) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Scoped owner of a spawned child.
#[derive(Debug)]
pub struct ChildGuard {
    child: Child,
    pgid: Option<u32>,
    reaped: bool,
}

impl ChildGuard {
    pub fn spawn(command: &mut Command) -> io::Result<Self> {
        command.kill_on_drop(true).process_group(0);
        let child = command.spawn()?;
        let pgid = child.id();
        Ok(Self {
            child,
            pgid,
            reaped: false,
        })
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    pub async fn wait(&mut self) -> io::Result<ExitStatus> {
        let status = self.child.wait().await?;
        self.reaped = true;
        Ok(status)
    }

    /// SIGTERM, wait up to `grace`, then SIGKILL.
    pub async fn terminate(&mut self, grace: Duration) {
        if self.reaped {
            return;
        }
        if let Ok(Some(_)) = self.child.try_wait() {
            self.reaped = true;
            return;
        }

        if let Some(pgid) = self.pgid {
            if let Err(e) = signal_group(pgid, libc::SIGTERM) {
                tracing::debug!(pgid, error = %e, "SIGTERM failed");
            }
        }

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(_)) => {
                self.reaped = true;
                return;
            }
            Ok(Err(e)) => tracing::warn!(error = %e, "Waiting for terminated child failed"),
            Err(_) => tracing::warn!(
                pgid = ?self.pgid,
                grace_ms = grace.as_millis() as u64,
                "Child ignored SIGTERM, killing"
            ),
        }

        self.kill_group();
        if let Err(e) = self.child.kill().await {
            tracing::warn!(error = %e, "Failed to kill child");
        }
        self.reaped = true;
    }

    fn kill_group(&self) {
        if let Some(pgid) = self.pgid {
            // ESRCH just means every member already exited.
            let _ = signal_group(pgid, libc::SIGKILL);
        }
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if !self.reaped {
            self.kill_group();
            let _ = self.child.start_kill();
        }
    }
}

/// Exit code with signal deaths mapped to `-signo`.
pub fn exit_code(status: ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }
    status.code().unwrap_or(-1)
}

async fn read_all<R: AsyncRead + Unpin>(mut reader: R) -> String {
    let mut buf = Vec::new();
    if let Err(e) = reader.read_to_end(&mut buf).await {
        tracing::debug!(error = %e, "Reading child output failed");
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Output readers can outlive the child if it leaked the pipe to a
/// grandchild, so collecting them is bounded too.
async fn collect(reader: Option<JoinHandle<String>>, limit: Duration) -> String {
    let Some(handle) = reader else {
        return String::new();
    };
    let abort = handle.abort_handle();
    match tokio::time::timeout(limit, handle).await {
        Ok(Ok(text)) => text,
        Ok(Err(_)) => String::new(),
        Err(_) => {
            abort.abort();
            String::new()
        }
    }
}

fn abort(reader: Option<JoinHandle<String>>) {
    if let Some(handle) = reader {
        handle.abort();
    }
}

enum Wake {
    Exited(io::Result<ExitStatus>),
    Cancelled,
    TimedOut,
}

/// Run `command` to completion unless `token` fires or `timeout` expires.
///
/// Standard output and error are captured as text. On cancellation or
/// timeout the child is terminated with `grace` before being killed. A run
/// that finishes after the token was set is still reported as cancelled.
pub async fn run_cancellable(
    mut command: Command,
    token: &CancellationToken,
    timeout: Option<Duration>,
    grace: Duration,
) -> io::Result<ProcessExit> {
    if token.is_cancelled() {
        return Ok(ProcessExit::Cancelled);
    }

    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut guard = ChildGuard::spawn(&mut command)?;

    let stdout = guard.child.stdout.take().map(|s| tokio::spawn(read_all(s)));
    let stderr = guard.child.stderr.take().map(|s| tokio::spawn(read_all(s)));

    let deadline = async move {
        match timeout {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending::<()>().await,
        }
    };

    let wake = tokio::select! {
        status = guard.wait() => Wake::Exited(status),
        _ = token.cancelled() => Wake::Cancelled,
        _ = deadline => Wake::TimedOut,
    };

    match wake {
        Wake::Exited(status) => {
            let status = status?;
            let stdout = collect(stdout, grace).await;
            let stderr = collect(stderr, grace).await;
            if token.is_cancelled() {
                return Ok(ProcessExit::Cancelled);
            }
            Ok(ProcessExit::Finished(ToolOutput {
                stdout,
                stderr,
                exit_code: exit_code(status),
            }))
        }
        Wake::Cancelled => {
            guard.terminate(grace).await;
            abort(stdout);
            abort(stderr);
            Ok(ProcessExit::Cancelled)
        }
        Wake::TimedOut => {
            guard.terminate(grace).await;
            abort(stdout);
            abort(stderr);
            Ok(ProcessExit::TimedOut)
        }
    }
}
