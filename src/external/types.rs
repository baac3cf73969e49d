//! Descriptor and outcome types shared with the external collaborators

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::control::ExecutionStatus;

/// Definition of one schedulable job, as provided by the definition source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDefinition {
    /// Unique job code
    pub code: String,
    /// Human-readable name
    pub name: String,
    /// Group this job belongs to
    pub group: String,
    /// Position of the group in the overall schedule; `None` sorts last
    pub group_order: Option<i32>,
    /// Position of the job within its group; `None` sorts last
    pub job_order: Option<i32>,
    /// Inactive jobs are skipped by the dispatcher
    pub active: bool,
    /// Opaque parameters handed to the worker
    pub parameters: serde_json::Value,
}

impl JobDefinition {
    /// Minimal active definition with default ordering
    pub fn new(code: impl Into<String>, group: impl Into<String>) -> Self {
        let code = code.into();
        Self {
            name: code.clone(),
            code,
            group: group.into(),
            group_order: None,
            job_order: None,
            active: true,
            parameters: serde_json::Value::Null,
        }
    }

    /// Set the `(group_order, job_order)` pair
    pub fn with_order(mut self, group_order: i32, job_order: i32) -> Self {
        self.group_order = Some(group_order);
        self.job_order = Some(job_order);
        self
    }

    /// Mark the job inactive
    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    /// Sort key implementing "group order, then job order, nulls last"
    pub fn ordering_key(&self) -> (i32, i32) {
        (
            self.group_order.unwrap_or(i32::MAX),
            self.job_order.unwrap_or(i32::MAX),
        )
    }
}

/// Opaque handle into the durable execution log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogHandle {
    /// Log row identifier
    pub id: Uuid,
}

impl LogHandle {
    /// Allocate a fresh handle
    pub fn new() -> Self {
        Self { id: Uuid::new_v4() }
    }
}

impl Default for LogHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// One row in the execution log, as the log sink materializes it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    /// Handle of this row
    pub handle: LogHandle,
    /// Job code the row belongs to
    pub job_code: String,
    /// Batch the row belongs to
    pub batch_id: String,
    /// Last status written for the job
    pub status: ExecutionStatus,
    /// Optional reason attached to the last status write
    pub reason: Option<String>,
    /// Row creation time
    pub created_at: DateTime<Utc>,
    /// Execution end time, once known
    pub ended_at: Option<DateTime<Utc>>,
    /// Execution duration, once known
    pub duration: Option<Duration>,
}

/// Result reported by the worker for one unit of work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerOutcome {
    /// Whether the unit of work succeeded
    pub success: bool,
    /// Error message on failure
    pub error: Option<String>,
    /// How long the unit of work took
    pub duration: Duration,
}

impl WorkerOutcome {
    /// Successful outcome
    pub fn ok(duration: Duration) -> Self {
        Self {
            success: true,
            error: None,
            duration,
        }
    }

    /// Failed outcome with a message
    pub fn failed(message: impl Into<String>, duration: Duration) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            duration,
        }
    }
}

/// Aggregated per-status counts for one batch, read from durable storage.
/// Independent of the in-memory store, so it stays available after a batch's
/// control records have been evicted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStatistics {
    /// Total rows for the batch
    pub total: usize,
    /// Rows still pending
    pub pending: usize,
    /// Rows currently running
    pub running: usize,
    /// Rows completed successfully
    pub completed: usize,
    /// Rows that failed
    pub failed: usize,
    /// Rows stopped by an operator
    pub stopped: usize,
    /// Rows cancelled by an operator
    pub cancelled: usize,
}
