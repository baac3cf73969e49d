//! In-memory collaborator implementations
//!
//! Backed by the same concurrent primitives as the control store, these are
//! real implementations rather than mocks: embedders without a durable log
//! can run on them directly, and the integration tests exercise the core
//! through them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use uuid::Uuid;

use crate::control::ExecutionStatus;
use crate::dispatch::{BatchSummary, JobOutcome};
use crate::external::{
    BatchStatistics, ExecutionLogSink, JobDefinition, JobDefinitionSource, LogHandle, LogRecord,
    NotificationSink, Worker, WorkerOutcome,
};
use crate::{ReportFlowError, Result};

/// In-memory job definition source with insertion-ordered groups
#[derive(Default)]
pub struct InMemoryDefinitions {
    groups: RwLock<Vec<(String, bool)>>,
    jobs: RwLock<Vec<JobDefinition>>,
}

impl InMemoryDefinitions {
    /// Create an empty definition source
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a group; order of registration is the scheduling order
    pub fn add_group(&self, name: impl Into<String>, active: bool) {
        let name = name.into();
        let mut groups = self.groups.write();
        if let Some(entry) = groups.iter_mut().find(|(n, _)| *n == name) {
            entry.1 = active;
        } else {
            groups.push((name, active));
        }
    }

    /// Register a job; its group is created active if not yet known
    pub fn add_job(&self, job: JobDefinition) {
        {
            let mut groups = self.groups.write();
            if !groups.iter().any(|(n, _)| *n == job.group) {
                groups.push((job.group.clone(), true));
            }
        }
        self.jobs.write().push(job);
    }

    /// Remove a job definition, e.g. to simulate a definition going away
    pub fn remove_job(&self, code: &str) {
        self.jobs.write().retain(|j| j.code != code);
    }
}

#[async_trait]
impl JobDefinitionSource for InMemoryDefinitions {
    async fn jobs_for_group(&self, group: &str) -> Result<Vec<JobDefinition>> {
        let mut jobs: Vec<JobDefinition> = self
            .jobs
            .read()
            .iter()
            .filter(|j| j.group == group)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.ordering_key());
        Ok(jobs)
    }

    async fn job_by_code(&self, code: &str) -> Result<Option<JobDefinition>> {
        Ok(self.jobs.read().iter().find(|j| j.code == code).cloned())
    }

    async fn active_groups(&self) -> Result<Vec<String>> {
        Ok(self
            .groups
            .read()
            .iter()
            .filter(|(_, active)| *active)
            .map(|(name, _)| name.clone())
            .collect())
    }
}

/// In-memory execution log with durable-style batch statistics
#[derive(Default)]
pub struct InMemoryExecutionLog {
    rows: DashMap<Uuid, LogRecord>,
}

impl InMemoryExecutionLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every row belonging to a batch
    pub fn records_for_batch(&self, batch_id: &str) -> Vec<LogRecord> {
        self.rows
            .iter()
            .filter(|entry| entry.value().batch_id == batch_id)
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Snapshot of a single row
    pub fn record(&self, handle: &LogHandle) -> Option<LogRecord> {
        self.rows.get(&handle.id).map(|entry| entry.value().clone())
    }
}

#[async_trait]
impl ExecutionLogSink for InMemoryExecutionLog {
    async fn create_pending(&self, job: &JobDefinition, batch_id: &str) -> Result<LogHandle> {
        let handle = LogHandle::new();
        let row = LogRecord {
            handle,
            job_code: job.code.clone(),
            batch_id: batch_id.to_string(),
            status: ExecutionStatus::Pending,
            reason: None,
            created_at: Utc::now(),
            ended_at: None,
            duration: None,
        };
        self.rows.insert(handle.id, row);
        Ok(handle)
    }

    async fn update_status(
        &self,
        handle: &LogHandle,
        status: ExecutionStatus,
        reason: Option<&str>,
    ) -> Result<()> {
        let mut row = self
            .rows
            .get_mut(&handle.id)
            .ok_or_else(|| ReportFlowError::ExecutionLog(format!("unknown handle {}", handle.id)))?;
        row.status = status;
        row.reason = reason.map(String::from);
        Ok(())
    }

    async fn update_execution_time(
        &self,
        handle: &LogHandle,
        ended_at: DateTime<Utc>,
        duration: Duration,
    ) -> Result<()> {
        let mut row = self
            .rows
            .get_mut(&handle.id)
            .ok_or_else(|| ReportFlowError::ExecutionLog(format!("unknown handle {}", handle.id)))?;
        row.ended_at = Some(ended_at);
        row.duration = Some(duration);
        Ok(())
    }

    async fn batch_statistics(&self, batch_id: &str) -> Result<BatchStatistics> {
        let mut stats = BatchStatistics::default();
        for entry in self.rows.iter() {
            let row = entry.value();
            if row.batch_id != batch_id {
                continue;
            }
            stats.total += 1;
            match row.status {
                ExecutionStatus::Pending => stats.pending += 1,
                ExecutionStatus::Running | ExecutionStatus::Paused => stats.running += 1,
                ExecutionStatus::Completed => stats.completed += 1,
                ExecutionStatus::Failed => stats.failed += 1,
                ExecutionStatus::Stopped => stats.stopped += 1,
                ExecutionStatus::Cancelled => stats.cancelled += 1,
            }
        }
        Ok(stats)
    }
}

/// Notification sink that records every delivery; can be switched into a
/// failing mode to verify the best-effort contract
#[derive(Default)]
pub struct CollectingNotifications {
    job_failures: RwLock<Vec<(String, JobOutcome)>>,
    batch_summaries: RwLock<Vec<BatchSummary>>,
    failing: AtomicBool,
}

impl CollectingNotifications {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent delivery return an error
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Job failure notifications received so far, as `(job_code, outcome)`
    pub fn job_failures(&self) -> Vec<(String, JobOutcome)> {
        self.job_failures.read().clone()
    }

    /// Batch completion summaries received so far
    pub fn batch_summaries(&self) -> Vec<BatchSummary> {
        self.batch_summaries.read().clone()
    }
}

#[async_trait]
impl NotificationSink for CollectingNotifications {
    async fn on_job_failure(&self, job: &JobDefinition, outcome: &JobOutcome) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ReportFlowError::Internal(
                "notification channel unavailable".to_string(),
            ));
        }
        self.job_failures
            .write()
            .push((job.code.clone(), outcome.clone()));
        Ok(())
    }

    async fn on_batch_completion(&self, summary: &BatchSummary) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ReportFlowError::Internal(
                "notification channel unavailable".to_string(),
            ));
        }
        self.batch_summaries.write().push(summary.clone());
        Ok(())
    }
}

type WorkerFn =
    dyn Fn(JobDefinition, String) -> BoxFuture<'static, Result<WorkerOutcome>> + Send + Sync;

/// Worker backed by an async closure
pub struct FnWorker {
    f: Box<WorkerFn>,
}

impl FnWorker {
    /// Wrap an async closure as a worker
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(JobDefinition, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<WorkerOutcome>> + Send + 'static,
    {
        Self {
            f: Box::new(move |job, batch| Box::pin(f(job, batch))),
        }
    }

    /// Worker that succeeds immediately for every job
    pub fn always_ok() -> Self {
        Self::new(|_, _| async { Ok(WorkerOutcome::ok(Duration::from_millis(0))) })
    }
}

#[async_trait]
impl Worker for FnWorker {
    async fn execute(&self, job: &JobDefinition, batch_id: &str) -> Result<WorkerOutcome> {
        (self.f)(job.clone(), batch_id.to_string()).await
    }
}
