//! Operator control surface
//!
//! The contract that REST/CLI layers bind to: pause, resume, stop, restart
//! and cancel for groups and jobs, always scoped to one batch. Every method
//! validates against the transition table before writing, and returns
//! `false` for unknown entities or disallowed transitions instead of
//! erroring.

use std::sync::Arc;
use tracing::{debug, info};

use crate::control::record::{ControlAction, ExecutionStatus};
use crate::control::store::ControlStore;

/// Batch-scoped control operations over a shared [`ControlStore`]
#[derive(Clone)]
pub struct ControlSurface {
    store: Arc<ControlStore>,
}

impl ControlSurface {
    /// Wrap a store
    pub fn new(store: Arc<ControlStore>) -> Self {
        Self { store }
    }

    /// Hold a group at its next checkpoint
    pub fn pause_group(&self, group: &str, batch_id: &str) -> bool {
        self.apply_group(group, batch_id, ControlAction::Pause)
    }

    /// Release a paused group
    pub fn resume_group(&self, group: &str, batch_id: &str) -> bool {
        self.apply_group(group, batch_id, ControlAction::Resume)
    }

    /// Stop a group at its next checkpoint
    pub fn stop_group(&self, group: &str, batch_id: &str) -> bool {
        self.apply_group(group, batch_id, ControlAction::Stop)
    }

    /// Reset a stopped, failed, paused or cancelled group back to pending
    pub fn restart_group(&self, group: &str, batch_id: &str) -> bool {
        self.apply_group(group, batch_id, ControlAction::Restart)
    }

    /// Cancel a group and cascade the cancellation to every one of its jobs.
    ///
    /// Cancel is permitted from any state, so the cascade reaches each job
    /// regardless of its individual status. Re-cancelling is idempotent:
    /// jobs already cancelled are skipped, so cascade side effects never run
    /// twice.
    pub fn cancel_group(&self, group: &str, batch_id: &str) -> bool {
        if !self.apply_group(group, batch_id, ControlAction::Cancel) {
            return false;
        }

        if let Some(codes) = self.store.group_job_codes(group, batch_id) {
            for code in codes {
                if self.store.job_status(&code, batch_id) == Some(ExecutionStatus::Cancelled) {
                    continue;
                }
                self.store
                    .update_job_status(&code, batch_id, ExecutionStatus::Cancelled);
            }
        }
        info!(group, batch_id, "group cancelled with job cascade");
        true
    }

    /// Hold a job at its next checkpoint
    pub fn pause_job(&self, code: &str, batch_id: &str) -> bool {
        self.apply_job(code, batch_id, ControlAction::Pause)
    }

    /// Release a paused job
    pub fn resume_job(&self, code: &str, batch_id: &str) -> bool {
        self.apply_job(code, batch_id, ControlAction::Resume)
    }

    /// Stop a job at its next checkpoint
    pub fn stop_job(&self, code: &str, batch_id: &str) -> bool {
        self.apply_job(code, batch_id, ControlAction::Stop)
    }

    /// Reset a stopped, failed, paused or cancelled job back to pending
    pub fn restart_job(&self, code: &str, batch_id: &str) -> bool {
        self.apply_job(code, batch_id, ControlAction::Restart)
    }

    /// Cancel a job; permitted from any state
    pub fn cancel_job(&self, code: &str, batch_id: &str) -> bool {
        self.apply_job(code, batch_id, ControlAction::Cancel)
    }

    /// Status of an entity within a batch; groups shadow jobs when a name
    /// is used for both
    pub fn status_of(&self, entity: &str, batch_id: &str) -> Option<ExecutionStatus> {
        self.store
            .group_status(entity, batch_id)
            .or_else(|| self.store.job_status(entity, batch_id))
    }

    /// Whether the action would be permitted for the entity right now
    pub fn can_execute_action(&self, entity: &str, batch_id: &str, action: ControlAction) -> bool {
        match self.status_of(entity, batch_id) {
            Some(status) => action.allowed_from(status),
            None => false,
        }
    }

    /// Drop all control state for a batch
    pub fn cleanup_batch(&self, batch_id: &str) {
        self.store.cleanup_batch_data(batch_id);
    }

    fn apply_group(&self, group: &str, batch_id: &str, action: ControlAction) -> bool {
        if !self.store.can_execute_group(group, batch_id, action) {
            debug!(group, batch_id, %action, "group action rejected");
            return false;
        }
        let applied = self
            .store
            .update_group_status(group, batch_id, action.target());
        if applied {
            info!(group, batch_id, %action, "group action applied");
        }
        applied
    }

    fn apply_job(&self, code: &str, batch_id: &str, action: ControlAction) -> bool {
        if !self.store.can_execute_job(code, batch_id, action) {
            debug!(code, batch_id, %action, "job action rejected");
            return false;
        }
        let applied = self.store.update_job_status(code, batch_id, action.target());
        if applied {
            info!(code, batch_id, %action, "job action applied");
        }
        applied
    }
}
