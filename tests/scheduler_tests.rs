
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use test_harness::{assert_eventually, job};
use weighted_client::scheduler::{Admission, Cancelled, Scheduler};

const POLL: Duration = Duration::from_millis(50);

#[tokio::test]
async fn test_admit_and_release_restores_weight() {
    let scheduler = Scheduler::new(100, 4, POLL);
    let token = CancellationToken::new();

    let admission = scheduler.admit(job(1, 30), 30, &token).await.unwrap();
    assert_eq!(admission, Admission::Within);
    assert_eq!(scheduler.current_weight(), 30);

    let claim = scheduler.next_job(&token).await.unwrap();
    assert_eq!(claim.job().height, 1);
    assert_eq!(claim.weight(), 30);
    // Weight stays charged while the job is in flight.
    assert_eq!(scheduler.current_weight(), 30);

    drop(claim);
    let snapshot = scheduler.snapshot();
    assert_eq!(snapshot.current_weight, 0);
    assert_eq!(snapshot.admitted_weight, 30);
    assert_eq!(snapshot.released_weight, 30);
    assert_eq!(snapshot.peak_weight, 30);
}

#[tokio::test]
async fn test_producer_blocks_until_weight_is_released() {
    let scheduler = Scheduler::new(100, 4, POLL);
    let token = CancellationToken::new();

    scheduler.admit(job(1, 60), 60, &token).await.unwrap();
    let claim = scheduler.next_job(&token).await.unwrap();

    let blocked = {
        let scheduler = Arc::clone(&scheduler);
        let token = token.clone();
        tokio::spawn(async move { scheduler.admit(job(2, 50), 50, &token).await })
    };

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!blocked.is_finished(), "60 + 50 must not fit under 100");
    assert_eq!(scheduler.current_weight(), 60);

    drop(claim);
    let admission = tokio::time::timeout(Duration::from_secs(2), blocked)
        .await
        .expect("producer should wake after release")
        .unwrap()
        .unwrap();
    assert_eq!(admission, Admission::Within);
    assert_eq!(scheduler.current_weight(), 50);
    assert!(scheduler.snapshot().peak_weight <= 100);
}

#[tokio::test]
async fn test_exact_fit_is_admitted() {
    let scheduler = Scheduler::new(100, 4, POLL);
    let token = CancellationToken::new();

    scheduler.admit(job(1, 40), 40, &token).await.unwrap();
    let admission = tokio::time::timeout(
        Duration::from_secs(1),
        scheduler.admit(job(2, 60), 60, &token),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(admission, Admission::Within);
    assert_eq!(scheduler.current_weight(), 100);
}

#[tokio::test]
async fn test_oversized_job_admitted_only_when_idle() {
    let scheduler = Scheduler::new(10, 4, POLL);
    let token = CancellationToken::new();

    scheduler.admit(job(1, 5), 5, &token).await.unwrap();

    let oversized = {
        let scheduler = Arc::clone(&scheduler);
        let token = token.clone();
        tokio::spawn(async move { scheduler.admit(job(2, 25), 25, &token).await })
    };
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(!oversized.is_finished(), "oversized job must wait for idle");

    let claim = scheduler.next_job(&token).await.unwrap();
    drop(claim);

    let admission = tokio::time::timeout(Duration::from_secs(2), oversized)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(admission, Admission::Oversized);

    let snapshot = scheduler.snapshot();
    assert_eq!(snapshot.oversized_admissions, 1);
    assert_eq!(snapshot.current_weight, 25);
    assert_eq!(snapshot.peak_weight, 25);
}

#[tokio::test]
async fn test_nothing_joins_an_oversized_job() {
    let scheduler = Scheduler::new(10, 4, POLL);
    let token = CancellationToken::new();

    let admission = scheduler.admit(job(1, 25), 25, &token).await.unwrap();
    assert_eq!(admission, Admission::Oversized);

    let small = {
        let scheduler = Arc::clone(&scheduler);
        let token = token.clone();
        tokio::spawn(async move { scheduler.admit(job(2, 1), 1, &token).await })
    };
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(!small.is_finished());

    drop(scheduler.next_job(&token).await.unwrap());
    tokio::time::timeout(Duration::from_secs(2), small)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_full_queue_blocks_producer() {
    let scheduler = Scheduler::new(1000, 1, POLL);
    let token = CancellationToken::new();

    scheduler.admit(job(1, 1), 1, &token).await.unwrap();
    let second = {
        let scheduler = Arc::clone(&scheduler);
        let token = token.clone();
        tokio::spawn(async move { scheduler.admit(job(2, 1), 1, &token).await })
    };
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(!second.is_finished(), "queue capacity is one");

    // Popping frees a slot even though the weight is still charged.
    let _claim = scheduler.next_job(&token).await.unwrap();
    tokio::time::timeout(Duration::from_secs(2), second)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(scheduler.current_weight(), 2);
}

#[tokio::test]
async fn test_cancellation_unblocks_waiting_producer() {
    let scheduler = Scheduler::new(10, 4, POLL);
    let token = CancellationToken::new();

    scheduler.admit(job(1, 10), 10, &token).await.unwrap();
    let waiting = {
        let scheduler = Arc::clone(&scheduler);
        let token = token.clone();
        tokio::spawn(async move { scheduler.admit(job(2, 5), 5, &token).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    token.cancel();

    let result = tokio::time::timeout(Duration::from_secs(1), waiting)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result, Err(Cancelled));
    assert_eq!(scheduler.current_weight(), 10);
}

#[tokio::test]
async fn test_no_admission_after_cancellation() {
    let scheduler = Scheduler::new(100, 4, POLL);
    let token = CancellationToken::new();
    token.cancel();

    assert_eq!(
        scheduler.admit(job(1, 1), 1, &token).await,
        Err(Cancelled)
    );
    let snapshot = scheduler.snapshot();
    assert_eq!(snapshot.admitted_weight, 0);
    assert_eq!(snapshot.pending_jobs, 0);
}

#[tokio::test]
async fn test_close_ends_every_worker() {
    let scheduler = Scheduler::new(100, 4, POLL);
    let token = CancellationToken::new();

    scheduler.admit(job(1, 1), 1, &token).await.unwrap();
    scheduler.close(2);

    let claim = scheduler.next_job(&token).await.unwrap();
    assert_eq!(claim.job().height, 1);
    assert!(scheduler.next_job(&token).await.is_none());
    assert!(scheduler.next_job(&token).await.is_none());
}

#[tokio::test]
async fn test_waiting_worker_wakes_on_close() {
    let scheduler = Scheduler::new(100, 4, POLL);
    let token = CancellationToken::new();

    let worker = {
        let scheduler = Arc::clone(&scheduler);
        let token = token.clone();
        tokio::spawn(async move { scheduler.next_job(&token).await.is_none() })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!worker.is_finished());

    scheduler.close(1);
    let finished = tokio::time::timeout(Duration::from_secs(1), worker)
        .await
        .unwrap()
        .unwrap();
    assert!(finished);
}

#[tokio::test]
async fn test_cancelled_worker_drains_queue_then_stops() {
    let scheduler = Scheduler::new(100, 4, POLL);
    let token = CancellationToken::new();

    scheduler.admit(job(1, 10), 10, &token).await.unwrap();
    scheduler.admit(job(2, 20), 20, &token).await.unwrap();
    token.cancel();

    // Queued jobs are still handed out so their weight comes back.
    let first = scheduler.next_job(&token).await.unwrap();
    let second = scheduler.next_job(&token).await.unwrap();
    assert!(scheduler.next_job(&token).await.is_none());

    first.release();
    drop(second);
    assert_eq!(scheduler.current_weight(), 0);
    assert!(scheduler.snapshot().admitted_weight == scheduler.snapshot().released_weight);
}

#[tokio::test]
async fn test_explicit_release_is_not_repeated_on_drop() {
    let scheduler = Scheduler::new(100, 4, POLL);
    let token = CancellationToken::new();

    scheduler.admit(job(1, 10), 10, &token).await.unwrap();
    scheduler.admit(job(2, 15), 15, &token).await.unwrap();

    let claim = scheduler.next_job(&token).await.unwrap();
    claim.release();

    let snapshot = scheduler.snapshot();
    assert_eq!(snapshot.current_weight, 15);
    assert_eq!(snapshot.released_weight, 10);
}

#[tokio::test]
async fn test_claim_released_when_task_panics() {
    let scheduler = Scheduler::new(100, 4, POLL);
    let token = CancellationToken::new();

    scheduler.admit(job(1, 40), 40, &token).await.unwrap();
    let claim = scheduler.next_job(&token).await.unwrap();

    let result = tokio::spawn(async move {
        let _claim = claim;
        panic!("tool wrapper blew up");
    })
    .await;
    assert!(result.unwrap_err().is_panic());

    let scheduler_ref = &scheduler;
    assert_eventually(
        || async move { scheduler_ref.current_weight() == 0 },
        Duration::from_secs(1),
        "weight should be released by the unwinding claim",
    )
    .await;
}
