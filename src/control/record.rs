//! Control records and the status/action state machine
//!
//! A record holds the current `ExecutionStatus` plus the paused/stopped/
//! cancelled flags. Flags are recomputed from the status inside
//! [`JobRecord::apply_status`] / [`GroupRecord::apply_status`] and nowhere
//! else; any code path that sets a flag directly introduces drift the
//! reconciler will detect and repair.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::external::LogHandle;

/// Execution status of a job or group within one batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ExecutionStatus {
    /// Initialized but not yet started
    Pending = 0,
    /// Currently executing
    Running = 1,
    /// Paused; execution waits at the next checkpoint
    Paused = 2,
    /// Stopped by an operator
    Stopped = 3,
    /// Finished successfully
    Completed = 4,
    /// Finished with an error
    Failed = 5,
    /// Cancelled; terminal and non-reversible
    Cancelled = 6,
}

impl ExecutionStatus {
    /// All known statuses, in discriminant order
    pub const ALL: [ExecutionStatus; 7] = [
        ExecutionStatus::Pending,
        ExecutionStatus::Running,
        ExecutionStatus::Paused,
        ExecutionStatus::Stopped,
        ExecutionStatus::Completed,
        ExecutionStatus::Failed,
        ExecutionStatus::Cancelled,
    ];

    /// Whether this status ends the record's lifecycle
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }

    /// Encode for the store's lock-free status cells
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// Decode from a status cell value
    pub fn from_u8(value: u8) -> Option<ExecutionStatus> {
        ExecutionStatus::ALL.get(value as usize).copied()
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Paused => "paused",
            ExecutionStatus::Stopped => "stopped",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        };
        write!(f, "{name}")
    }
}

/// Operator action against a job or group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControlAction {
    /// Hold execution at the next checkpoint
    Pause,
    /// Release a paused entity
    Resume,
    /// Stop execution at the next checkpoint
    Stop,
    /// Reset a finished or interrupted entity back to pending
    Restart,
    /// Force-terminate; allowed from any state so a group-level cancel
    /// cascades to every job regardless of individual job state
    Cancel,
}

impl ControlAction {
    /// Whether this action is permitted from the given status
    pub fn allowed_from(&self, status: ExecutionStatus) -> bool {
        use ControlAction::*;
        use ExecutionStatus::*;

        match (self, status) {
            (Pause, Pending | Running) => true,
            (Resume, Paused) => true,
            (Stop, Running | Paused) => true,
            (Restart, Stopped | Failed | Paused | Cancelled) => true,
            (Cancel, _) => true,
            _ => false,
        }
    }

    /// Status this action transitions to when permitted
    pub fn target(&self) -> ExecutionStatus {
        match self {
            ControlAction::Pause => ExecutionStatus::Paused,
            ControlAction::Resume => ExecutionStatus::Running,
            ControlAction::Stop => ExecutionStatus::Stopped,
            ControlAction::Restart => ExecutionStatus::Pending,
            ControlAction::Cancel => ExecutionStatus::Cancelled,
        }
    }
}

impl fmt::Display for ControlAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ControlAction::Pause => "pause",
            ControlAction::Resume => "resume",
            ControlAction::Stop => "stop",
            ControlAction::Restart => "restart",
            ControlAction::Cancel => "cancel",
        };
        write!(f, "{name}")
    }
}

fn derived_flags(status: ExecutionStatus) -> (bool, bool, bool) {
    (
        status == ExecutionStatus::Paused,
        status == ExecutionStatus::Stopped,
        status == ExecutionStatus::Cancelled,
    )
}

/// Control state of one job within one batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    /// Job code, unique within the definition source
    pub job_code: String,
    /// Name of the group this job belongs to
    pub group_name: String,
    /// Batch this record is scoped to
    pub batch_id: String,
    /// Current status
    pub status: ExecutionStatus,
    /// Derived: status is `Paused`
    pub paused: bool,
    /// Derived: status is `Stopped`
    pub stopped: bool,
    /// Derived: status is `Cancelled`
    pub cancelled: bool,
    /// Handle into the external execution log, set during batch init
    pub log_handle: Option<LogHandle>,
    /// Revision timestamp, advanced on every status change
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// Create a fresh record in `Pending`
    pub fn new(
        job_code: impl Into<String>,
        group_name: impl Into<String>,
        batch_id: impl Into<String>,
    ) -> Self {
        Self {
            job_code: job_code.into(),
            group_name: group_name.into(),
            batch_id: batch_id.into(),
            status: ExecutionStatus::Pending,
            paused: false,
            stopped: false,
            cancelled: false,
            log_handle: None,
            updated_at: Utc::now(),
        }
    }

    /// Set the status, recompute the derived flags and advance `updated_at`
    pub fn apply_status(&mut self, status: ExecutionStatus) {
        self.status = status;
        let (paused, stopped, cancelled) = derived_flags(status);
        self.paused = paused;
        self.stopped = stopped;
        self.cancelled = cancelled;
        self.updated_at = Utc::now();
    }

    /// Whether exactly the flag matching the status (if any) is set
    pub fn flags_consistent(&self) -> bool {
        (self.paused, self.stopped, self.cancelled) == derived_flags(self.status)
    }
}

/// Control state of one group within one batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupRecord {
    /// Group name, unique within the definition source
    pub group_name: String,
    /// Batch this record is scoped to
    pub batch_id: String,
    /// Remaining job codes, in configured execution order; the record is
    /// evicted from the store once this empties
    pub job_codes: Vec<String>,
    /// Current status
    pub status: ExecutionStatus,
    /// Derived: status is `Paused`
    pub paused: bool,
    /// Derived: status is `Stopped`
    pub stopped: bool,
    /// Derived: status is `Cancelled`
    pub cancelled: bool,
    /// Revision timestamp, advanced on every status change
    pub updated_at: DateTime<Utc>,
}

impl GroupRecord {
    /// Create a fresh record in `Pending` with the given ordered job list
    pub fn new(
        group_name: impl Into<String>,
        batch_id: impl Into<String>,
        job_codes: Vec<String>,
    ) -> Self {
        Self {
            group_name: group_name.into(),
            batch_id: batch_id.into(),
            job_codes,
            status: ExecutionStatus::Pending,
            paused: false,
            stopped: false,
            cancelled: false,
            updated_at: Utc::now(),
        }
    }

    /// Set the status, recompute the derived flags and advance `updated_at`
    pub fn apply_status(&mut self, status: ExecutionStatus) {
        self.status = status;
        let (paused, stopped, cancelled) = derived_flags(status);
        self.paused = paused;
        self.stopped = stopped;
        self.cancelled = cancelled;
        self.updated_at = Utc::now();
    }

    /// Whether exactly the flag matching the status (if any) is set
    pub fn flags_consistent(&self) -> bool {
        (self.paused, self.stopped, self.cancelled) == derived_flags(self.status)
    }
}
