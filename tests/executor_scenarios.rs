mod common;

use chrono::{Duration, Utc};
use common::{dca, harness, limit_order, FixedPrice, ONE};
use keeper::adapters::StoreCall;
use keeper::chain::{DcaExecutionReceipt, OnChainStatus};
use keeper::domain::{Direction, JobStatus};
use keeper::error::ExecutorErrorKind;
use keeper::execution::{JobStore, PriceChecker, TickOutcome, SYNC_TX_MARKER};
use std::sync::Arc;
use tokio_test::assert_ok;

#[tokio::test]
async fn dca_job_runs_every_swap_then_completes() {
    let k = harness();
    let start = Utc::now();
    k.store.insert(dca("dca-1", 3, start - Duration::minutes(1))).await;

    for hour in 0..3 {
        let report = assert_ok!(
            k.executor
                .run_all_ticks_at(start + Duration::hours(hour))
                .await
        );
        assert_eq!(report.executed, 1, "tick {}", hour);
    }

    let job = k.store.get("dca-1").await.unwrap();
    assert_eq!(job.status, JobStatus::Executed);
    assert_eq!(job.dca_params().unwrap().swaps_completed, 3);
    assert_eq!(k.client.submissions(), 3);

    let swaps: Vec<_> = k
        .store
        .executions()
        .await
        .iter()
        .map(|e| e.swap_index)
        .collect();
    assert_eq!(swaps, vec![Some(1), Some(2), Some(3)]);

    // Nothing left to evaluate
    let after = assert_ok!(
        k.executor
            .run_all_ticks_at(start + Duration::hours(4))
            .await
    );
    assert_eq!(after.evaluated, 0);
}

#[tokio::test]
async fn dca_tick_between_swaps_is_not_ready() {
    let k = harness();
    let start = Utc::now();
    k.store.insert(dca("dca-1", 3, start - Duration::minutes(1))).await;

    assert_ok!(k.executor.run_all_ticks_at(start).await);
    let report = assert_ok!(
        k.executor
            .run_all_ticks_at(start + Duration::minutes(30))
            .await
    );
    assert_eq!(report.not_ready, 1);
    assert_eq!(k.client.submissions(), 1);
}

#[tokio::test]
async fn dca_schedule_comes_from_the_chain() {
    let k = harness();
    let now = Utc::now();
    let job = dca("dca-1", 5, now - Duration::minutes(1));
    k.store.insert(job.clone()).await;
    k.client.push_dca(DcaExecutionReceipt {
        tx_hash: "0xfeed".to_string(),
        amount_out: Some(3),
        next_execution_sec: 1_900_000_000,
    });

    let outcome = k.executor.process_tick_at(job, now).await;
    assert_eq!(
        outcome,
        TickOutcome::Executed {
            tx_hash: "0xfeed".to_string()
        }
    );

    let stored = k.store.get("dca-1").await.unwrap();
    let params = stored.dca_params().unwrap();
    assert_eq!(params.swaps_completed, 1);
    assert_eq!(params.next_execution, 1_900_000_000_000);
    assert_eq!(stored.status, JobStatus::Active);
}

#[tokio::test]
async fn unknown_job_is_cancelled_once_without_retry() {
    let k = harness();
    let job = limit_order("lim-1", ONE, Direction::Gte);
    k.store.insert(job.clone()).await;
    k.client.fail_limit(ExecutorErrorKind::JobNotFound);

    let outcome = k.executor.process_tick(job).await;
    assert_eq!(outcome, TickOutcome::Reconciled(JobStatus::Cancelled));
    assert_eq!(k.store.call_count("mark_cancelled").await, 1);
    assert_eq!(k.store.call_count("increment_retry").await, 0);
    assert_eq!(k.store.get("lim-1").await.unwrap().status, JobStatus::Cancelled);
    assert!(k.executor.retry_queue().is_empty().await);
}

#[tokio::test]
async fn inactive_job_already_executed_on_chain_is_synced() {
    let k = harness();
    let job = limit_order("lim-1", ONE, Direction::Gte);
    k.store.insert(job.clone()).await;
    k.client.fail_limit(ExecutorErrorKind::JobNotActive);
    k.client.set_status(Ok(OnChainStatus::Executed));

    let outcome = k.executor.process_tick(job).await;
    assert_eq!(outcome, TickOutcome::Reconciled(JobStatus::Executed));

    let executed: Vec<_> = k
        .store
        .calls()
        .await
        .into_iter()
        .filter_map(|call| match call {
            StoreCall::MarkExecuted { tx_hash, .. } => Some(tx_hash),
            _ => None,
        })
        .collect();
    assert_eq!(executed, vec![SYNC_TX_MARKER.to_string()]);
    assert_eq!(k.store.call_count("increment_retry").await, 0);
}

#[tokio::test]
async fn timed_out_submission_that_landed_is_not_resubmitted() {
    let k = harness();
    let now = Utc::now();
    k.store.insert(limit_order("lim-1", ONE, Direction::Gte)).await;
    k.client.fail_limit(ExecutorErrorKind::Timeout);
    k.client.set_status(Ok(OnChainStatus::Executed));

    let report = assert_ok!(k.executor.run_all_ticks_at(now).await);
    assert_eq!(report.reconciled, 1);
    assert_eq!(k.store.get("lim-1").await.unwrap().status, JobStatus::Executed);

    let next = assert_ok!(
        k.executor
            .run_all_ticks_at(now + Duration::seconds(30))
            .await
    );
    assert_eq!(next.evaluated, 0);
    assert_eq!(k.client.submissions(), 1);
}

#[tokio::test]
async fn repeated_unexpected_failures_escalate_to_failed() {
    let k = harness();
    let mut now = Utc::now();
    k.store.insert(limit_order("lim-1", ONE, Direction::Gte)).await;
    for _ in 0..3 {
        k.client.fail_limit(ExecutorErrorKind::Unexpected);
    }

    let first = assert_ok!(k.executor.run_all_ticks_at(now).await);
    assert_eq!(first.retried, 1);
    assert!(k.executor.retry_queue().contains("lim-1").await);

    // Backing off: nothing submitted until the retry is due
    let held = assert_ok!(
        k.executor
            .run_all_ticks_at(now + Duration::milliseconds(1))
            .await
    );
    assert_eq!(held.evaluated, 0);

    while let Some(retry_at) = k.executor.retry_queue().next_retry_at().await {
        now = retry_at;
        assert_ok!(k.executor.run_all_ticks_at(now).await);
    }

    let job = k.store.get("lim-1").await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.retries, 3);
    assert!(job.last_error.is_some());
    assert_eq!(k.client.submissions(), 3);
    assert_eq!(k.store.call_count("mark_failed").await, 1);

    let active = assert_ok!(k.store.get_active_jobs().await);
    assert!(active.is_empty());
}

#[tokio::test]
async fn one_failing_job_does_not_stop_the_others() {
    let k = harness();
    let now = Utc::now();
    k.store.insert(limit_order("a", ONE, Direction::Gte)).await;
    k.store.insert(limit_order("b", ONE * 2, Direction::Gte)).await;
    k.store.insert(dca("c", 2, now - Duration::minutes(5))).await;
    k.client.fail_limit(ExecutorErrorKind::SlippageExceeded);

    let report = assert_ok!(k.executor.run_all_ticks_at(now).await);
    assert_eq!(report.evaluated, 3);
    assert_eq!(report.not_ready, 1);
    assert_eq!(report.executed, 1);
    assert_eq!(report.retried, 1);

    let a = k.store.get("a").await.unwrap();
    assert_eq!(a.status, JobStatus::Active);
    assert_eq!(a.retries, 1);
}

#[tokio::test]
async fn gte_limit_order_triggers_at_target() {
    let source = Arc::new(FixedPrice::new(ONE));
    let checker = PriceChecker::new(source.clone());
    let job = limit_order("lim-1", ONE, Direction::Gte);

    let at_target = assert_ok!(checker.check_limit_order(&job).await);
    assert!(at_target.condition_met);
    assert_eq!(at_target.current_price, ONE);

    source.set(ONE * 9 / 10);
    let below = assert_ok!(checker.check_limit_order(&job).await);
    assert!(!below.condition_met);
}

#[tokio::test]
async fn dca_waits_out_the_execution_buffer() {
    let checker = PriceChecker::new(Arc::new(FixedPrice::new(ONE)));
    let now = Utc::now();

    let early = assert_ok!(
        checker
            .check_dca_at(&dca("d", 3, now + Duration::seconds(10)), now)
            .await
    );
    assert!(!early.condition_met);

    let buffered = assert_ok!(
        checker
            .check_dca_at(&dca("d", 3, now - Duration::seconds(14)), now)
            .await
    );
    assert!(!buffered.condition_met);

    let due = assert_ok!(
        checker
            .check_dca_at(&dca("d", 3, now - Duration::seconds(15)), now)
            .await
    );
    assert!(due.condition_met);
}
