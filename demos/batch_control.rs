//! Batch dispatch with mid-run control example
//!
//! Dispatches a two-group batch, pauses one group while its first job is
//! running, then resumes it and prints the summary.

use reportflow::control::{ControlStore, ControlSurface};
use reportflow::dispatch::{DispatchConfig, Dispatcher};
use reportflow::external::memory::{
    CollectingNotifications, FnWorker, InMemoryDefinitions, InMemoryExecutionLog,
};
use reportflow::external::{JobDefinition, WorkerOutcome};
use reportflow::Result;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter("reportflow=debug")
        .init();

    println!("Batch report dispatch demonstration");
    println!("===================================\n");

    let definitions = Arc::new(InMemoryDefinitions::new());
    definitions.add_job(JobDefinition::new("daily_sales", "nightly").with_order(1, 1));
    definitions.add_job(JobDefinition::new("daily_stock", "nightly").with_order(1, 2));
    definitions.add_job(JobDefinition::new("weekly_revenue", "weekly").with_order(2, 1));

    let worker = FnWorker::new(|job, _batch| async move {
        println!("  running {} ...", job.code);
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(WorkerOutcome::ok(Duration::from_millis(200)))
    });

    let store = Arc::new(ControlStore::new(definitions.clone()));
    let surface = ControlSurface::new(Arc::clone(&store));
    let dispatcher = Dispatcher::new(
        Arc::clone(&store),
        definitions,
        Arc::new(InMemoryExecutionLog::new()),
        Arc::new(worker),
        Arc::new(CollectingNotifications::new()),
        DispatchConfig::new().with_pause_poll_interval(Duration::from_millis(20)),
    );

    let handle = tokio::spawn({
        let dispatcher = dispatcher.clone();
        async move { dispatcher.dispatch(None).await }
    });

    // Wait until the nightly group's record exists, then hold it.
    let batch_id = loop {
        if let Some(key) = store.list_active_groups().first() {
            break key.batch().to_string();
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    };

    if surface.pause_group("nightly", &batch_id) {
        println!("\n  nightly paused; remaining jobs hold at their checkpoint");
        tokio::time::sleep(Duration::from_millis(500)).await;
        surface.resume_group("nightly", &batch_id);
        println!("  nightly resumed\n");
    }

    let summary = handle.await??;

    println!("Batch {} finished", summary.batch_id);
    println!(
        "  {} jobs total, {} succeeded, {} failed",
        summary.total_jobs, summary.succeeded, summary.failed
    );
    for group in &summary.groups {
        println!(
            "  group {}: {} ({} ok / {} failed)",
            group.group,
            group.status,
            group.succeeded(),
            group.failed()
        );
    }

    Ok(())
}
