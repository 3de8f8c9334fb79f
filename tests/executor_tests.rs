
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use test_harness::{assert_eventually, fake_tool, staged_job, test_config};
use weighted_client::config::ToolConfig;
use weighted_client::payload::FeltArgumentFormatter;
use weighted_client::worker::{JobExecutor, JobOutcome};

fn executor(dir: &std::path::Path, body: &str) -> JobExecutor {
    let config = test_config(dir, fake_tool(dir, body));
    JobExecutor::new(&config, Arc::new(FeltArgumentFormatter))
}

#[tokio::test]
async fn test_success_reports_gas() {
    let dir = tempfile::tempdir().unwrap();
    let executor = executor(dir.path(), r#"echo "Run completed, gas_spent=4242""#);
    let job = staged_job(dir.path(), 1, 1);

    let report = executor.execute(&job, &CancellationToken::new()).await;

    assert_eq!(
        report.outcome,
        JobOutcome::Succeeded {
            gas_spent: Some(4242)
        }
    );
    assert!(report.completed_at >= report.started_at);
}

#[tokio::test]
async fn test_success_without_gas_is_still_success() {
    let dir = tempfile::tempdir().unwrap();
    let executor = executor(dir.path(), "echo done");
    let job = staged_job(dir.path(), 1, 1);

    let report = executor.execute(&job, &CancellationToken::new()).await;
    assert_eq!(report.outcome, JobOutcome::Succeeded { gas_spent: None });
}

#[tokio::test]
async fn test_arguments_file_is_passed_to_tool() {
    let dir = tempfile::tempdir().unwrap();
    // Echo the arguments file back so the test can see what the tool got.
    let executor = executor(dir.path(), r#"cat "$7"; echo; echo "$1 $3 $5""#);
    let job = staged_job(dir.path(), 7, 1);

    let report = executor.execute(&job, &CancellationToken::new()).await;
    assert!(report.outcome.is_success());

    let written = std::fs::read_to_string(job.arguments_file()).unwrap();
    let felts: Vec<String> = serde_json::from_str(&written).unwrap();
    // `{"blocks": []}` is 14 bytes: no full word, one pending word, then the flags.
    assert_eq!(felts.len(), 5);
    assert_eq!(felts[0], "0x0");
    assert_eq!(felts[2], "0xe");
    assert_eq!(&felts[3..], ["0x0", "0x0"]);
}

#[tokio::test]
async fn test_execute_scripts_flag_is_forwarded() {
    let dir = tempfile::tempdir().unwrap();
    let executor = executor(dir.path(), "true");
    let mut job = staged_job(dir.path(), 3, 1);
    job.execute_scripts = true;

    executor.execute(&job, &CancellationToken::new()).await;

    let felts: Vec<String> =
        serde_json::from_str(&std::fs::read_to_string(job.arguments_file()).unwrap()).unwrap();
    assert_eq!(felts[felts.len() - 2], "0x1");
    assert_eq!(felts[felts.len() - 1], "0x0");
}

#[tokio::test]
async fn test_non_zero_exit_is_failure_with_message() {
    let dir = tempfile::tempdir().unwrap();
    let executor = executor(
        dir.path(),
        "printf 'error: invalid   block\\n   hash\\n' >&2; exit 1",
    );
    let job = staged_job(dir.path(), 1, 1);

    let report = executor.execute(&job, &CancellationToken::new()).await;
    assert!(!report.outcome.is_success());
    assert_eq!(report.outcome.message(), Some("invalid block hash"));
}

#[tokio::test]
async fn test_failure_marker_with_zero_exit() {
    let dir = tempfile::tempdir().unwrap();
    let executor = executor(dir.path(), "echo \"Run panicked with error='bad root'\"");
    let job = staged_job(dir.path(), 1, 1);

    let report = executor.execute(&job, &CancellationToken::new()).await;
    assert_eq!(report.outcome.message(), Some("bad root"));
}

#[tokio::test]
async fn test_sigkill_is_reported_as_oom() {
    let dir = tempfile::tempdir().unwrap();
    let executor = executor(dir.path(), "echo gas_spent=77; kill -9 $$");
    let job = staged_job(dir.path(), 1, 1);

    let report = executor.execute(&job, &CancellationToken::new()).await;
    match report.outcome {
        JobOutcome::OutOfMemory {
            gas_spent, message, ..
        } => {
            assert_eq!(gas_spent, Some(77));
            assert_eq!(message, "Return code -9, killed by OOM?, gas spent: 77");
        }
        other => panic!("expected OOM, got {:?}", other),
    }
}

#[tokio::test]
async fn test_cancellation_terminates_running_tool() {
    let dir = tempfile::tempdir().unwrap();
    let executor = executor(dir.path(), "exec sleep 30");
    let job = staged_job(dir.path(), 1, 1);
    let token = CancellationToken::new();

    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        canceller.cancel();
    });

    let started = Instant::now();
    let report = executor.execute(&job, &token).await;
    assert_eq!(report.outcome, JobOutcome::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(5));
}

/// Running, as opposed to gone or a zombie waiting for its reaper.
fn process_running(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        // The state follows the parenthesised command name.
        Ok(stat) => stat
            .rsplit_once(") ")
            .map_or(false, |(_, rest)| !rest.starts_with('Z')),
        Err(_) => false,
    }
}

#[tokio::test]
async fn test_cancellation_reaches_processes_spawned_by_the_tool() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("grandchild.pid");
    let executor = executor(
        dir.path(),
        &format!("sleep 30 & echo $! > {}; wait", pid_file.display()),
    );
    let job = staged_job(dir.path(), 1, 1);
    let token = CancellationToken::new();

    let run = {
        let token = token.clone();
        tokio::spawn(async move { executor.execute(&job, &token).await })
    };

    let pid_path = &pid_file;
    assert_eventually(
        || async move {
            std::fs::read_to_string(pid_path).map_or(false, |s| s.trim().parse::<u32>().is_ok())
        },
        Duration::from_secs(2),
        "tool should record its background process",
    )
    .await;
    let grandchild: u32 = std::fs::read_to_string(&pid_file)
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    assert!(process_running(grandchild));

    token.cancel();
    let report = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.outcome, JobOutcome::Cancelled);

    assert_eventually(
        || async move { !process_running(grandchild) },
        Duration::from_secs(2),
        "background process should be signalled with the tool",
    )
    .await;
}

#[tokio::test]
async fn test_tool_ignoring_sigterm_is_killed_after_grace() {
    let dir = tempfile::tempdir().unwrap();
    let executor = executor(dir.path(), "trap '' TERM; while true; do sleep 1; done");
    let job = staged_job(dir.path(), 1, 1);
    let token = CancellationToken::new();

    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        canceller.cancel();
    });

    let started = Instant::now();
    let report = executor.execute(&job, &token).await;
    assert_eq!(report.outcome, JobOutcome::Cancelled);
    // 200ms before cancel plus a 500ms grace period.
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_timeout_kills_tool() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), fake_tool(dir.path(), "exec sleep 30"))
        .with_job_timeout(Some(Duration::from_millis(200)));
    let executor = JobExecutor::new(&config, Arc::new(FeltArgumentFormatter));
    let job = staged_job(dir.path(), 1, 1);

    let report = executor.execute(&job, &CancellationToken::new()).await;
    assert_eq!(
        report.outcome,
        JobOutcome::TimedOut {
            after: Duration::from_millis(200)
        }
    );
    assert!(report.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_cancelled_before_start_does_not_spawn() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("ran");
    let executor = executor(dir.path(), &format!("touch {}", marker.display()));
    let job = staged_job(dir.path(), 1, 1);
    let token = CancellationToken::new();
    token.cancel();

    let report = executor.execute(&job, &token).await;
    assert_eq!(report.outcome, JobOutcome::Cancelled);
    assert!(!marker.exists());
    assert!(!job.arguments_file().exists());
}

#[tokio::test]
async fn test_missing_tool_is_a_failure() {
    let dir = tempfile::tempdir().unwrap();
    let tool = ToolConfig {
        program: "/nonexistent/prover-12345".into(),
        ..ToolConfig::default()
    };
    let config = test_config(dir.path(), tool);
    let executor = JobExecutor::new(&config, Arc::new(FeltArgumentFormatter));
    let job = staged_job(dir.path(), 1, 1);

    let report = executor.execute(&job, &CancellationToken::new()).await;
    let message = report.outcome.message().unwrap();
    assert!(message.contains("failed to run"), "{}", message);
}

#[tokio::test]
async fn test_missing_staging_file_is_a_failure() {
    let dir = tempfile::tempdir().unwrap();
    let executor = executor(dir.path(), "echo gas_spent=1");
    let job = staged_job(dir.path(), 1, 1);
    std::fs::remove_file(&job.staging_file).unwrap();

    let report = executor.execute(&job, &CancellationToken::new()).await;
    assert!(matches!(report.outcome, JobOutcome::Failed { .. }));
}
