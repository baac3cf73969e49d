//! Dispatch configuration and result aggregation types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::control::ExecutionStatus;

/// How groups within one batch are executed relative to each other
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchMode {
    /// Groups run one after another, in resolution order
    Sync,
    /// Groups run on a bounded worker pool; no cross-group ordering
    Async,
}

/// Dispatcher configuration
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Sync or async group execution
    pub mode: DispatchMode,
    /// Bound on concurrently executing groups in async mode
    pub group_concurrency: usize,
    /// Per-group wall-clock budget in async mode; the clock starts when the
    /// group's task is submitted
    pub group_timeout: Duration,
    /// Fallback re-check interval while a job waits out a pause; resume
    /// normally wakes the waiter immediately
    pub pause_poll_interval: Duration,
    /// How long to wait for a timed-out group task to acknowledge its abort
    pub abort_grace: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            mode: DispatchMode::Sync,
            group_concurrency: num_cpus::get(),
            group_timeout: Duration::from_secs(3600),
            pause_poll_interval: Duration::from_millis(100),
            abort_grace: Duration::from_secs(5),
        }
    }
}

impl DispatchConfig {
    /// Default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the group execution mode
    pub fn with_mode(mut self, mode: DispatchMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the async-mode group concurrency bound (at least 1)
    pub fn with_group_concurrency(mut self, limit: usize) -> Self {
        self.group_concurrency = limit.max(1);
        self
    }

    /// Set the per-group timeout for async mode
    pub fn with_group_timeout(mut self, timeout: Duration) -> Self {
        self.group_timeout = timeout;
        self
    }

    /// Set the pause re-check interval
    pub fn with_pause_poll_interval(mut self, interval: Duration) -> Self {
        self.pause_poll_interval = interval;
        self
    }

    /// Set the abort grace period for timed-out groups
    pub fn with_abort_grace(mut self, grace: Duration) -> Self {
        self.abort_grace = grace;
        self
    }
}

/// Result of one job execution within a batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOutcome {
    /// Job code
    pub job_code: String,
    /// Batch the job ran under
    pub batch_id: String,
    /// Whether the job completed successfully
    pub success: bool,
    /// Failure reason, checkpoint short-circuit reason, or `None` on success
    pub message: Option<String>,
    /// Wall-clock duration of the execution attempt
    pub duration: Duration,
    /// Whether the job sat out a pause before running
    pub resumed_from_pause: bool,
}

/// Aggregated result of one group within a batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupOutcome {
    /// Group name
    pub group: String,
    /// Batch the group ran under
    pub batch_id: String,
    /// Final reported status: `Completed` when every job succeeded,
    /// `Failed` otherwise
    pub status: ExecutionStatus,
    /// Per-job results, in execution order
    pub outcomes: Vec<JobOutcome>,
    /// Set when async execution gave up on the group
    pub timed_out: bool,
}

impl GroupOutcome {
    /// Synthetic failure for a group that never produced results, e.g. on
    /// timeout or a task panic
    pub fn synthetic_failure(
        group: impl Into<String>,
        batch_id: impl Into<String>,
        reason: impl Into<String>,
        timed_out: bool,
    ) -> Self {
        let group = group.into();
        let batch_id = batch_id.into();
        Self {
            outcomes: vec![JobOutcome {
                job_code: group.clone(),
                batch_id: batch_id.clone(),
                success: false,
                message: Some(reason.into()),
                duration: Duration::from_secs(0),
                resumed_from_pause: false,
            }],
            group,
            batch_id,
            status: ExecutionStatus::Failed,
            timed_out,
        }
    }

    /// Number of successful jobs
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.success).count()
    }

    /// Number of failed jobs
    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    /// Whether every job in the group succeeded
    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Completed
    }
}

/// Summary of one whole batch dispatch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    /// The batch identifier generated for this dispatch
    pub batch_id: String,
    /// When the dispatch began
    pub started_at: DateTime<Utc>,
    /// When the dispatch finished
    pub finished_at: DateTime<Utc>,
    /// Per-group breakdown, in resolution order for sync mode
    pub groups: Vec<GroupOutcome>,
    /// Total jobs attempted
    pub total_jobs: usize,
    /// Jobs that succeeded
    pub succeeded: usize,
    /// Jobs that failed, were stopped, were cancelled or timed out
    pub failed: usize,
    /// Codes of every failed job
    pub failed_jobs: Vec<String>,
}

impl BatchSummary {
    /// Aggregate group outcomes into a summary
    pub fn from_groups(
        batch_id: impl Into<String>,
        started_at: DateTime<Utc>,
        groups: Vec<GroupOutcome>,
    ) -> Self {
        let total_jobs = groups.iter().map(|g| g.outcomes.len()).sum();
        let succeeded = groups.iter().map(|g| g.succeeded()).sum();
        let failed_jobs: Vec<String> = groups
            .iter()
            .flat_map(|g| g.outcomes.iter())
            .filter(|o| !o.success)
            .map(|o| o.job_code.clone())
            .collect();

        Self {
            batch_id: batch_id.into(),
            started_at,
            finished_at: Utc::now(),
            groups,
            total_jobs,
            succeeded,
            failed: failed_jobs.len(),
            failed_jobs,
        }
    }
}
