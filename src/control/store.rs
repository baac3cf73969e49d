//! Concurrent control-state registry
//!
//! The store owns every control record, keyed by [`BatchKey`]. Each record
//! sits behind its own write lock (no global lock), with a lock-free status
//! cell for hot-path reads and a notifier that wakes checkpoint waiters the
//! moment a paused record changes status. Records are created lazily on
//! first access for a batch and evicted individually on job completion or in
//! bulk per batch.
//!
//! Operations on a key with no loaded record return `false`/`None` rather
//! than an error: a cache miss means the caller has not called `load_*` yet.

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::debug;

use crate::control::key::BatchKey;
use crate::control::record::{ControlAction, ExecutionStatus, GroupRecord, JobRecord};
use crate::external::{JobDefinitionSource, LogHandle};
use crate::Result;

/// Per-group success/failure counters for one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GroupStats {
    /// Jobs that completed successfully
    pub succeeded: usize,
    /// Jobs that failed, were stopped or were cancelled
    pub failed: usize,
}

pub(crate) struct JobEntry {
    pub(crate) record: RwLock<JobRecord>,
    pub(crate) status_cell: AtomicU8,
    pub(crate) resume: Notify,
}

impl JobEntry {
    fn new(record: JobRecord) -> Self {
        let status = record.status;
        Self {
            record: RwLock::new(record),
            status_cell: AtomicU8::new(status.as_u8()),
            resume: Notify::new(),
        }
    }
}

pub(crate) struct GroupEntry {
    pub(crate) record: RwLock<GroupRecord>,
    pub(crate) status_cell: AtomicU8,
    pub(crate) resume: Notify,
}

impl GroupEntry {
    fn new(record: GroupRecord) -> Self {
        let status = record.status;
        Self {
            record: RwLock::new(record),
            status_cell: AtomicU8::new(status.as_u8()),
            resume: Notify::new(),
        }
    }
}

/// Registry of job and group control records for all in-flight batches.
///
/// Constructed once per process and injected into the dispatcher, control
/// surface and reconciler; a fresh store per test gives full isolation.
pub struct ControlStore {
    definitions: Arc<dyn JobDefinitionSource>,
    jobs: DashMap<BatchKey, Arc<JobEntry>>,
    groups: DashMap<BatchKey, Arc<GroupEntry>>,
    stats: DashMap<BatchKey, GroupStats>,
}

impl ControlStore {
    /// Create an empty store over the given definition source
    pub fn new(definitions: Arc<dyn JobDefinitionSource>) -> Self {
        Self {
            definitions,
            jobs: DashMap::new(),
            groups: DashMap::new(),
            stats: DashMap::new(),
        }
    }

    /// Load a group's control record for a batch. Idempotent: a record that
    /// is already cached is left untouched. Returns `Ok(false)` when the
    /// definition source knows no jobs for the group.
    pub async fn load_group(&self, group: &str, batch_id: &str) -> Result<bool> {
        let key = BatchKey::new(group, batch_id);
        if self.groups.contains_key(&key) {
            return Ok(true);
        }

        // Only active jobs participate; keeping inactive codes out of the
        // list preserves the evict-when-empty invariant.
        let job_codes: Vec<String> = self
            .definitions
            .jobs_for_group(group)
            .await?
            .into_iter()
            .filter(|j| j.active)
            .map(|j| j.code)
            .collect();
        if job_codes.is_empty() {
            debug!(group, batch_id, "no active jobs defined for group, not loading");
            return Ok(false);
        }

        let record = GroupRecord::new(group, batch_id, job_codes);
        self.groups
            .entry(key.clone())
            .or_insert_with(|| Arc::new(GroupEntry::new(record)));
        self.stats.entry(key).or_default();
        debug!(group, batch_id, "group record loaded");
        Ok(true)
    }

    /// Load a job's control record for a batch. Idempotent; `Ok(false)` when
    /// the job code is unknown to the definition source.
    pub async fn load_job(&self, code: &str, batch_id: &str) -> Result<bool> {
        let key = BatchKey::new(code, batch_id);
        if self.jobs.contains_key(&key) {
            return Ok(true);
        }

        let Some(definition) = self.definitions.job_by_code(code).await? else {
            debug!(code, batch_id, "unknown job code, not loading");
            return Ok(false);
        };

        let record = JobRecord::new(code, definition.group, batch_id);
        self.jobs
            .entry(key)
            .or_insert_with(|| Arc::new(JobEntry::new(record)));
        debug!(code, batch_id, "job record loaded");
        Ok(true)
    }

    /// Evict and re-load a group record from the definition source,
    /// resetting it to a clean `Pending` state. Used by the reconciler.
    pub async fn reload_group(&self, group: &str, batch_id: &str) -> Result<bool> {
        self.groups.remove(&BatchKey::new(group, batch_id));
        self.load_group(group, batch_id).await
    }

    /// Evict and re-load a job record from the definition source
    pub async fn reload_job(&self, code: &str, batch_id: &str) -> Result<bool> {
        self.jobs.remove(&BatchKey::new(code, batch_id));
        self.load_job(code, batch_id).await
    }

    /// Lock-free status read for a group; `None` when not loaded
    pub fn group_status(&self, group: &str, batch_id: &str) -> Option<ExecutionStatus> {
        self.groups
            .get(&BatchKey::new(group, batch_id))
            .and_then(|entry| ExecutionStatus::from_u8(entry.status_cell.load(Ordering::SeqCst)))
    }

    /// Lock-free status read for a job; `None` when not loaded
    pub fn job_status(&self, code: &str, batch_id: &str) -> Option<ExecutionStatus> {
        self.jobs
            .get(&BatchKey::new(code, batch_id))
            .and_then(|entry| ExecutionStatus::from_u8(entry.status_cell.load(Ordering::SeqCst)))
    }

    /// Write a group's status under its record lock, recomputing flags,
    /// stamping `updated_at` and waking checkpoint waiters. `false` when the
    /// record is not loaded.
    pub fn update_group_status(&self, group: &str, batch_id: &str, status: ExecutionStatus) -> bool {
        let key = BatchKey::new(group, batch_id);
        let Some(entry) = self.groups.get(&key).map(|e| Arc::clone(e.value())) else {
            debug!(group, batch_id, %status, "status update on unloaded group");
            return false;
        };

        {
            let mut record = entry.record.write();
            record.apply_status(status);
            entry.status_cell.store(status.as_u8(), Ordering::SeqCst);
        }
        entry.resume.notify_waiters();
        true
    }

    /// Write a job's status; see [`ControlStore::update_group_status`]
    pub fn update_job_status(&self, code: &str, batch_id: &str, status: ExecutionStatus) -> bool {
        let key = BatchKey::new(code, batch_id);
        let Some(entry) = self.jobs.get(&key).map(|e| Arc::clone(e.value())) else {
            debug!(code, batch_id, %status, "status update on unloaded job");
            return false;
        };

        {
            let mut record = entry.record.write();
            record.apply_status(status);
            entry.status_cell.store(status.as_u8(), Ordering::SeqCst);
        }
        entry.resume.notify_waiters();
        true
    }

    /// Whether the action is permitted for the group's current status.
    /// `false` on a cache miss.
    pub fn can_execute_group(&self, group: &str, batch_id: &str, action: ControlAction) -> bool {
        match self.group_status(group, batch_id) {
            Some(status) => action.allowed_from(status),
            None => {
                debug!(group, batch_id, %action, "can_execute on unloaded group");
                false
            }
        }
    }

    /// Whether the action is permitted for the job's current status
    pub fn can_execute_job(&self, code: &str, batch_id: &str, action: ControlAction) -> bool {
        match self.job_status(code, batch_id) {
            Some(status) => action.allowed_from(status),
            None => {
                debug!(code, batch_id, %action, "can_execute on unloaded job");
                false
            }
        }
    }

    /// Attach the execution-log handle to a job record. Does not advance
    /// `updated_at`; only status changes do.
    pub fn set_job_log_handle(&self, code: &str, batch_id: &str, handle: LogHandle) -> bool {
        let key = BatchKey::new(code, batch_id);
        let Some(entry) = self.jobs.get(&key).map(|e| Arc::clone(e.value())) else {
            return false;
        };
        entry.record.write().log_handle = Some(handle);
        true
    }

    /// Cloned snapshot of a job record
    pub fn job_record(&self, code: &str, batch_id: &str) -> Option<JobRecord> {
        self.jobs
            .get(&BatchKey::new(code, batch_id))
            .map(|entry| entry.record.read().clone())
    }

    /// Cloned snapshot of a group record
    pub fn group_record(&self, group: &str, batch_id: &str) -> Option<GroupRecord> {
        self.groups
            .get(&BatchKey::new(group, batch_id))
            .map(|entry| entry.record.read().clone())
    }

    /// Ordered snapshot of the job codes still attached to a group
    pub fn group_job_codes(&self, group: &str, batch_id: &str) -> Option<Vec<String>> {
        self.groups
            .get(&BatchKey::new(group, batch_id))
            .map(|entry| entry.record.read().job_codes.clone())
    }

    /// Evict a finished job and detach it from its owning group. When the
    /// group's job list empties, the group record and its statistics are
    /// removed in the same step, so no empty husk remains. `false` when the
    /// job record is not loaded.
    pub fn complete_job(&self, code: &str, batch_id: &str) -> bool {
        let key = BatchKey::new(code, batch_id);
        let Some((_, entry)) = self.jobs.remove(&key) else {
            debug!(code, batch_id, "complete_job on unloaded job");
            return false;
        };

        let group_name = entry.record.read().group_name.clone();
        self.detach_job_code(&group_name, batch_id, code);
        true
    }

    /// Detach a job code from its group's ordered list; evicts the group
    /// record and its statistics in the same step once the list empties.
    pub(crate) fn detach_job_code(&self, group: &str, batch_id: &str, code: &str) {
        let group_key = BatchKey::new(group, batch_id);
        if let Some(group_entry) = self.groups.get(&group_key).map(|e| Arc::clone(e.value())) {
            let now_empty = {
                let mut record = group_entry.record.write();
                record.job_codes.retain(|c| c != code);
                record.job_codes.is_empty()
            };
            if now_empty {
                self.groups.remove(&group_key);
                self.stats.remove(&group_key);
                debug!(group, batch_id, "group emptied, record evicted");
            }
        }
    }

    /// Remove every job, group and statistics entry belonging to a batch.
    /// Records of other batches are untouched.
    pub fn cleanup_batch_data(&self, batch_id: &str) {
        let jobs_before = self.jobs.len();
        let groups_before = self.groups.len();

        self.jobs.retain(|key, _| !key.belongs_to_batch(batch_id));
        self.groups.retain(|key, _| !key.belongs_to_batch(batch_id));
        self.stats.retain(|key, _| !key.belongs_to_batch(batch_id));

        debug!(
            batch_id,
            jobs_removed = jobs_before - self.jobs.len(),
            groups_removed = groups_before - self.groups.len(),
            "batch control state cleaned up"
        );
    }

    /// Keys of every group record currently loaded, across all batches
    pub fn list_active_groups(&self) -> Vec<BatchKey> {
        self.groups.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Keys of every job record currently loaded, across all batches
    pub fn list_active_jobs(&self) -> Vec<BatchKey> {
        self.jobs.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Success/failure counters for a group, if loaded
    pub fn statistics(&self, group_key: &BatchKey) -> Option<GroupStats> {
        self.stats.get(group_key).map(|entry| *entry.value())
    }

    /// Count one job result against its group's statistics
    pub fn record_job_result(&self, group_key: &BatchKey, success: bool) {
        if let Some(mut entry) = self.stats.get_mut(group_key) {
            if success {
                entry.succeeded += 1;
            } else {
                entry.failed += 1;
            }
        }
    }

    /// Consistency check for the reconciler: flags derived from status, and
    /// the lock-free cell in sync with the record. `None` when not loaded.
    pub fn group_consistent(&self, key: &BatchKey) -> Option<bool> {
        self.groups.get(key).map(|entry| {
            let record = entry.record.read();
            record.flags_consistent()
                && entry.status_cell.load(Ordering::SeqCst) == record.status.as_u8()
        })
    }

    /// Consistency check for one job record; see [`ControlStore::group_consistent`]
    pub fn job_consistent(&self, key: &BatchKey) -> Option<bool> {
        self.jobs.get(key).map(|entry| {
            let record = entry.record.read();
            record.flags_consistent()
                && entry.status_cell.load(Ordering::SeqCst) == record.status.as_u8()
        })
    }

    pub(crate) fn job_entry(&self, code: &str, batch_id: &str) -> Option<Arc<JobEntry>> {
        self.jobs
            .get(&BatchKey::new(code, batch_id))
            .map(|entry| Arc::clone(entry.value()))
    }

    pub(crate) fn group_entry(&self, group: &str, batch_id: &str) -> Option<Arc<GroupEntry>> {
        self.groups
            .get(&BatchKey::new(group, batch_id))
            .map(|entry| Arc::clone(entry.value()))
    }
}
