//! Mid-run control scenarios: pausing, stopping and cancelling a batch
//! while its jobs are executing.

use std::sync::Arc;
use std::time::Duration;

use reportflow::control::{ControlStore, ControlSurface, ExecutionStatus};
use reportflow::dispatch::{BatchSummary, DispatchConfig, Dispatcher};
use reportflow::external::memory::{
    CollectingNotifications, FnWorker, InMemoryDefinitions, InMemoryExecutionLog,
};
use reportflow::external::{JobDefinition, WorkerOutcome};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;

struct Scenario {
    dispatcher: Dispatcher,
    surface: ControlSurface,
    store: Arc<ControlStore>,
    notifications: Arc<CollectingNotifications>,
    log: Arc<InMemoryExecutionLog>,
    /// Receives the batch id when the first job enters its worker
    started: mpsc::UnboundedReceiver<String>,
    /// Releases the first job's worker
    gate: Arc<Semaphore>,
}

/// Two-job group where the first job blocks inside its worker until the
/// test releases it, announcing the batch id on entry
fn blocking_first_job_scenario() -> Scenario {
    let definitions = Arc::new(InMemoryDefinitions::new());
    definitions.add_job(JobDefinition::new("daily_sales", "nightly").with_order(1, 1));
    definitions.add_job(JobDefinition::new("daily_stock", "nightly").with_order(1, 2));

    let (tx, started) = mpsc::unbounded_channel();
    let gate = Arc::new(Semaphore::new(0));

    let worker_gate = Arc::clone(&gate);
    let worker = FnWorker::new(move |job, batch| {
        let tx = tx.clone();
        let gate = Arc::clone(&worker_gate);
        async move {
            if job.code == "daily_sales" {
                let _ = tx.send(batch);
                let _permit = gate.acquire().await;
            }
            Ok(WorkerOutcome::ok(Duration::from_millis(1)))
        }
    });

    let log = Arc::new(InMemoryExecutionLog::new());
    let notifications = Arc::new(CollectingNotifications::new());
    let store = Arc::new(ControlStore::new(definitions.clone()));
    let dispatcher = Dispatcher::new(
        Arc::clone(&store),
        definitions,
        log.clone(),
        Arc::new(worker),
        notifications.clone(),
        DispatchConfig::new().with_pause_poll_interval(Duration::from_millis(10)),
    );

    Scenario {
        surface: ControlSurface::new(Arc::clone(&store)),
        store,
        notifications,
        log,
        dispatcher,
        started,
        gate,
    }
}

fn spawn_dispatch(dispatcher: &Dispatcher, filter: &'static str) -> JoinHandle<BatchSummary> {
    let dispatcher = dispatcher.clone();
    tokio::spawn(async move { dispatcher.dispatch(Some(filter)).await.unwrap() })
}

/// Pausing a group between jobs holds the next job at its checkpoint until
/// resume, then the batch completes fully
#[tokio::test]
async fn test_pause_between_jobs_then_resume() {
    let mut s = blocking_first_job_scenario();
    let handle = spawn_dispatch(&s.dispatcher, "nightly");

    let batch_id = s.started.recv().await.unwrap();
    assert!(s.surface.pause_group("nightly", &batch_id));
    s.gate.add_permits(1);

    // The first job finishes; the second must sit at its checkpoint.
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(
        s.store.job_status("daily_stock", &batch_id),
        Some(ExecutionStatus::Pending)
    );
    assert_eq!(
        s.store.job_status("daily_sales", &batch_id),
        None,
        "finished job record should be evicted"
    );

    assert!(s.surface.resume_group("nightly", &batch_id));
    let summary = handle.await.unwrap();

    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 0);
    let stock = summary.groups[0]
        .outcomes
        .iter()
        .find(|o| o.job_code == "daily_stock")
        .unwrap();
    assert!(stock.resumed_from_pause);
    let sales = summary.groups[0]
        .outcomes
        .iter()
        .find(|o| o.job_code == "daily_sales")
        .unwrap();
    assert!(!sales.resumed_from_pause);
}

/// Cancelling a pending job while a sibling runs short-circuits it at the
/// checkpoint without a failure notification
#[tokio::test]
async fn test_cancel_pending_job_mid_batch() {
    let mut s = blocking_first_job_scenario();
    let handle = spawn_dispatch(&s.dispatcher, "nightly");

    let batch_id = s.started.recv().await.unwrap();
    assert!(s.surface.cancel_job("daily_stock", &batch_id));
    s.gate.add_permits(1);

    let summary = handle.await.unwrap();
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.failed_jobs, vec!["daily_stock".to_string()]);
    assert_eq!(summary.groups[0].status, ExecutionStatus::Failed);

    let stock = summary.groups[0]
        .outcomes
        .iter()
        .find(|o| o.job_code == "daily_stock")
        .unwrap();
    assert_eq!(stock.message.as_deref(), Some("cancel requested"));

    // Checkpoint short-circuits never ran, so no failure notification.
    assert!(s.notifications.job_failures().is_empty());

    let row = s
        .log
        .records_for_batch(&batch_id)
        .into_iter()
        .find(|r| r.job_code == "daily_stock")
        .unwrap();
    assert_eq!(row.status, ExecutionStatus::Cancelled);
    assert_eq!(row.reason.as_deref(), Some("cancel requested"));

    assert!(s.store.list_active_jobs().is_empty());
    assert!(s.store.list_active_groups().is_empty());
}

/// Stopping a group mid-run lets the running job finish and stops every
/// later job at its checkpoint
#[tokio::test]
async fn test_stop_group_mid_batch() {
    let mut s = blocking_first_job_scenario();
    let handle = spawn_dispatch(&s.dispatcher, "nightly");

    let batch_id = s.started.recv().await.unwrap();
    assert!(s.surface.stop_group("nightly", &batch_id));
    s.gate.add_permits(1);

    let summary = handle.await.unwrap();
    assert_eq!(summary.succeeded, 1, "running job is never preempted");
    assert_eq!(summary.failed, 1);

    let stock = summary.groups[0]
        .outcomes
        .iter()
        .find(|o| o.job_code == "daily_stock")
        .unwrap();
    assert_eq!(stock.message.as_deref(), Some("stop requested"));

    let row = s
        .log
        .records_for_batch(&batch_id)
        .into_iter()
        .find(|r| r.job_code == "daily_stock")
        .unwrap();
    assert_eq!(row.status, ExecutionStatus::Stopped);
}

/// Cancelling the whole group cascades to every job: the pending sibling
/// short-circuits, and the in-flight job finishes its worker but is
/// reported cancelled at the persist point
#[tokio::test]
async fn test_cancel_group_mid_batch() {
    let mut s = blocking_first_job_scenario();
    let handle = spawn_dispatch(&s.dispatcher, "nightly");

    let batch_id = s.started.recv().await.unwrap();
    assert!(s.surface.cancel_group("nightly", &batch_id));
    assert_eq!(
        s.store.job_status("daily_stock", &batch_id),
        Some(ExecutionStatus::Cancelled)
    );
    s.gate.add_permits(1);

    let summary = handle.await.unwrap();
    assert_eq!(summary.succeeded, 0);
    assert_eq!(summary.failed, 2);
    for outcome in &summary.groups[0].outcomes {
        assert_eq!(outcome.message.as_deref(), Some("cancel requested"));
    }
}

/// Cancelling a job while it is inside its worker does not preempt the
/// worker, but the result is reported cancelled, not the worker's success
#[tokio::test]
async fn test_cancel_running_job_overrides_worker_result() {
    let mut s = blocking_first_job_scenario();
    let handle = spawn_dispatch(&s.dispatcher, "nightly");

    let batch_id = s.started.recv().await.unwrap();
    assert_eq!(
        s.store.job_status("daily_sales", &batch_id),
        Some(ExecutionStatus::Running)
    );
    assert!(s.surface.cancel_job("daily_sales", &batch_id));
    assert_eq!(
        s.store.job_status("daily_sales", &batch_id),
        Some(ExecutionStatus::Cancelled)
    );

    // The worker now returns success, which must not win.
    s.gate.add_permits(1);
    let summary = handle.await.unwrap();

    assert_eq!(summary.succeeded, 1, "the sibling runs unaffected");
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.failed_jobs, vec!["daily_sales".to_string()]);

    let sales = summary.groups[0]
        .outcomes
        .iter()
        .find(|o| o.job_code == "daily_sales")
        .unwrap();
    assert!(!sales.success);
    assert_eq!(sales.message.as_deref(), Some("cancel requested"));

    // Operator cancels are not failure notifications.
    assert!(s.notifications.job_failures().is_empty());

    let row = s
        .log
        .records_for_batch(&batch_id)
        .into_iter()
        .find(|r| r.job_code == "daily_sales")
        .unwrap();
    assert_eq!(row.status, ExecutionStatus::Cancelled);
    assert_eq!(row.reason.as_deref(), Some("cancel requested"));

    assert!(s.store.list_active_jobs().is_empty());
    assert!(s.store.list_active_groups().is_empty());
}

/// Stopping a job while it runs is reported stopped at the persist point
#[tokio::test]
async fn test_stop_running_job_overrides_worker_result() {
    let mut s = blocking_first_job_scenario();
    let handle = spawn_dispatch(&s.dispatcher, "nightly");

    let batch_id = s.started.recv().await.unwrap();
    assert!(s.surface.stop_job("daily_sales", &batch_id));
    s.gate.add_permits(1);

    let summary = handle.await.unwrap();
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 1);

    let sales = summary.groups[0]
        .outcomes
        .iter()
        .find(|o| o.job_code == "daily_sales")
        .unwrap();
    assert_eq!(sales.message.as_deref(), Some("stop requested"));

    let row = s
        .log
        .records_for_batch(&batch_id)
        .into_iter()
        .find(|r| r.job_code == "daily_sales")
        .unwrap();
    assert_eq!(row.status, ExecutionStatus::Stopped);
}

/// Resume wakes the paused checkpoint promptly rather than waiting out a
/// long poll interval
#[tokio::test]
async fn test_resume_wakes_checkpoint_quickly() {
    let definitions = Arc::new(InMemoryDefinitions::new());
    definitions.add_job(JobDefinition::new("daily_sales", "nightly").with_order(1, 1));

    let store = Arc::new(ControlStore::new(definitions.clone()));
    let dispatcher = Dispatcher::new(
        Arc::clone(&store),
        definitions,
        Arc::new(InMemoryExecutionLog::new()),
        Arc::new(FnWorker::always_ok()),
        Arc::new(CollectingNotifications::new()),
        // Poll interval far longer than the test: only the notifier can
        // wake the checkpoint in time.
        DispatchConfig::new().with_pause_poll_interval(Duration::from_secs(30)),
    );
    let surface = ControlSurface::new(Arc::clone(&store));

    let handle = spawn_dispatch(&dispatcher, "nightly");

    // Pause the job before its checkpoint passes; retry until the record
    // exists and the action lands.
    let batch_id = loop {
        if let Some(key) = store.list_active_jobs().first() {
            break key.batch().to_string();
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    };
    let paused = surface.pause_job("daily_sales", &batch_id);

    if paused {
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(surface.resume_job("daily_sales", &batch_id));
    }

    let summary = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("resume should wake the checkpoint without the poll interval")
        .unwrap();
    assert_eq!(summary.succeeded, 1);
}
