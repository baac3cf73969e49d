//! External collaborator interfaces
//!
//! The core never implements job semantics, durable logging or notification
//! delivery itself; it consumes them through these narrow async traits.
//! `external::memory` ships in-memory implementations suitable for tests and
//! embedded use.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::control::ExecutionStatus;
use crate::dispatch::{BatchSummary, JobOutcome};
use crate::Result;

pub mod memory;
pub mod types;

pub use types::{BatchStatistics, JobDefinition, LogHandle, LogRecord, WorkerOutcome};

/// Source of truth for group and job definitions
#[async_trait]
pub trait JobDefinitionSource: Send + Sync {
    /// Jobs configured for a group, sorted by `(group_order, job_order)`
    /// with unordered jobs last. Empty when the group is unknown.
    async fn jobs_for_group(&self, group: &str) -> Result<Vec<JobDefinition>>;

    /// Look up a single job by code
    async fn job_by_code(&self, code: &str) -> Result<Option<JobDefinition>>;

    /// Names of every group flagged active, in configured order
    async fn active_groups(&self) -> Result<Vec<String>>;
}

/// Durable execution log owned by a collaborator; the in-memory store is a
/// rebuildable cache over this log
#[async_trait]
pub trait ExecutionLogSink: Send + Sync {
    /// Create a pending log row for a job about to run in a batch
    async fn create_pending(&self, job: &JobDefinition, batch_id: &str) -> Result<LogHandle>;

    /// Record a status change, with an optional reason
    async fn update_status(
        &self,
        handle: &LogHandle,
        status: ExecutionStatus,
        reason: Option<&str>,
    ) -> Result<()>;

    /// Record end time and duration once a job finishes
    async fn update_execution_time(
        &self,
        handle: &LogHandle,
        ended_at: DateTime<Utc>,
        duration: Duration,
    ) -> Result<()>;

    /// Aggregated counts for a batch, read from durable storage
    async fn batch_statistics(&self, batch_id: &str) -> Result<BatchStatistics>;
}

/// Executes the actual unit of work for one job
#[async_trait]
pub trait Worker: Send + Sync {
    /// Run one job for one batch and report the outcome. Cancellation is
    /// cooperative: a running unit of work is never interrupted mid-flight.
    async fn execute(&self, job: &JobDefinition, batch_id: &str) -> Result<WorkerOutcome>;
}

/// Best-effort notification delivery; failures are logged by the caller and
/// never propagate into job or batch results
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// A single job finished unsuccessfully after running
    async fn on_job_failure(&self, job: &JobDefinition, outcome: &JobOutcome) -> Result<()>;

    /// A whole batch finished dispatching
    async fn on_batch_completion(&self, summary: &BatchSummary) -> Result<()>;
}
