//! Async-mode dispatch: bounded group concurrency and per-group timeouts.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reportflow::control::ControlStore;
use reportflow::dispatch::{DispatchConfig, DispatchMode, Dispatcher};
use reportflow::external::memory::{
    CollectingNotifications, FnWorker, InMemoryDefinitions, InMemoryExecutionLog,
};
use reportflow::external::{JobDefinition, WorkerOutcome};
use tokio::sync::Barrier;

fn build_dispatcher(
    definitions: Arc<InMemoryDefinitions>,
    worker: FnWorker,
    config: DispatchConfig,
) -> Dispatcher {
    let store = Arc::new(ControlStore::new(definitions.clone()));
    Dispatcher::new(
        store,
        definitions,
        Arc::new(InMemoryExecutionLog::new()),
        Arc::new(worker),
        Arc::new(CollectingNotifications::new()),
        config,
    )
}

/// With enough pool capacity, groups genuinely run in parallel: both
/// workers must be in flight at once for the barrier to release
#[tokio::test]
async fn test_groups_run_concurrently() {
    let definitions = Arc::new(InMemoryDefinitions::new());
    definitions.add_job(JobDefinition::new("daily_sales", "nightly").with_order(1, 1));
    definitions.add_job(JobDefinition::new("weekly_revenue", "weekly").with_order(2, 1));

    let barrier = Arc::new(Barrier::new(2));
    let worker = FnWorker::new(move |_job, _batch| {
        let barrier = Arc::clone(&barrier);
        async move {
            barrier.wait().await;
            Ok(WorkerOutcome::ok(Duration::from_millis(1)))
        }
    });

    let dispatcher = build_dispatcher(
        definitions,
        worker,
        DispatchConfig::new()
            .with_mode(DispatchMode::Async)
            .with_group_concurrency(2)
            .with_group_timeout(Duration::from_secs(5)),
    );

    let summary = tokio::time::timeout(Duration::from_secs(5), dispatcher.dispatch(None))
        .await
        .expect("parallel groups must both reach the barrier")
        .unwrap();
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 0);
}

/// The pool bound is honored: with a concurrency of 1, at most one group's
/// worker is ever in flight
#[tokio::test]
async fn test_pool_bound_limits_concurrency() {
    let definitions = Arc::new(InMemoryDefinitions::new());
    for group in ["g_a", "g_b", "g_c"] {
        definitions.add_job(JobDefinition::new(format!("{group}_job"), group));
    }

    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let worker = {
        let in_flight = Arc::clone(&in_flight);
        let peak = Arc::clone(&peak);
        FnWorker::new(move |_job, _batch| {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(WorkerOutcome::ok(Duration::from_millis(20)))
            }
        })
    };

    let dispatcher = build_dispatcher(
        definitions,
        worker,
        DispatchConfig::new()
            .with_mode(DispatchMode::Async)
            .with_group_concurrency(1)
            .with_group_timeout(Duration::from_secs(5)),
    );

    let summary = dispatcher.dispatch(None).await.unwrap();
    assert_eq!(summary.succeeded, 3);
    assert_eq!(peak.load(Ordering::SeqCst), 1);
}

/// A group overrunning its budget is aborted and reported as a synthetic
/// timeout failure without delaying its siblings' results
#[tokio::test]
async fn test_group_timeout_yields_synthetic_failure() {
    let definitions = Arc::new(InMemoryDefinitions::new());
    definitions.add_job(JobDefinition::new("fast_job", "fast").with_order(1, 1));
    definitions.add_job(JobDefinition::new("slow_job", "slow").with_order(2, 1));

    let worker = FnWorker::new(|job, _batch| async move {
        if job.code == "slow_job" {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        Ok(WorkerOutcome::ok(Duration::from_millis(1)))
    });

    let dispatcher = build_dispatcher(
        definitions,
        worker,
        DispatchConfig::new()
            .with_mode(DispatchMode::Async)
            .with_group_concurrency(2)
            .with_group_timeout(Duration::from_millis(100))
            .with_abort_grace(Duration::from_millis(50)),
    );

    let summary = tokio::time::timeout(Duration::from_secs(5), dispatcher.dispatch(None))
        .await
        .expect("timed-out group must not hang the batch")
        .unwrap();

    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 1);

    let slow = summary.groups.iter().find(|g| g.group == "slow").unwrap();
    assert!(slow.timed_out);
    assert!(!slow.is_success());
    assert_eq!(slow.outcomes[0].message.as_deref(), Some("timeout"));

    let fast = summary.groups.iter().find(|g| g.group == "fast").unwrap();
    assert!(fast.is_success());
    assert!(!fast.timed_out);
}

/// Async dispatch leaves records behind only for jobs that never finished;
/// batch cleanup removes them
#[tokio::test]
async fn test_cleanup_after_timeout() {
    let definitions = Arc::new(InMemoryDefinitions::new());
    definitions.add_job(JobDefinition::new("slow_job", "slow"));

    let worker = FnWorker::new(|_job, _batch| async move {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(WorkerOutcome::ok(Duration::from_millis(1)))
    });

    let dispatcher = build_dispatcher(
        definitions,
        worker,
        DispatchConfig::new()
            .with_mode(DispatchMode::Async)
            .with_group_timeout(Duration::from_millis(50))
            .with_abort_grace(Duration::from_millis(50)),
    );

    let summary = dispatcher.dispatch(None).await.unwrap();
    assert_eq!(summary.failed, 1);

    let store = dispatcher.store();
    assert!(!store.list_active_jobs().is_empty(), "aborted job leaves its record");
    store.cleanup_batch_data(&summary.batch_id);
    assert!(store.list_active_jobs().is_empty());
    assert!(store.list_active_groups().is_empty());
}
