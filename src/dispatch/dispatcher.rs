//! Batch dispatcher
//!
//! Walks the resolved groups of one batch, initializing control records and
//! execution-log rows, then executes jobs strictly in group order while
//! observing pause/stop/cancel signals at the per-job checkpoint. Groups run
//! inline (sync mode) or on a long-lived bounded pool with per-group
//! timeouts (async mode). Job semantics live entirely in the external
//! `Worker`; cancellation is cooperative: it is observed at the pre-worker
//! checkpoint and again at the post-worker persist point, and running work
//! is never preempted.

use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::control::{BatchKey, ControlStore, ExecutionStatus};
use crate::dispatch::types::{BatchSummary, DispatchConfig, DispatchMode, GroupOutcome, JobOutcome};
use crate::external::{
    ExecutionLogSink, JobDefinition, JobDefinitionSource, NotificationSink, Worker, WorkerOutcome,
};
use crate::{ReportFlowError, Result};

/// Executes batches of report groups against the control store.
///
/// Cheap to clone; all collaborators are shared. The async-mode group pool
/// is created once with the dispatcher and reused across dispatches.
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<ControlStore>,
    definitions: Arc<dyn JobDefinitionSource>,
    log_sink: Arc<dyn ExecutionLogSink>,
    worker: Arc<dyn Worker>,
    notifications: Arc<dyn NotificationSink>,
    config: DispatchConfig,
    group_pool: Arc<Semaphore>,
}

impl Dispatcher {
    /// Wire up a dispatcher
    pub fn new(
        store: Arc<ControlStore>,
        definitions: Arc<dyn JobDefinitionSource>,
        log_sink: Arc<dyn ExecutionLogSink>,
        worker: Arc<dyn Worker>,
        notifications: Arc<dyn NotificationSink>,
        config: DispatchConfig,
    ) -> Self {
        let group_pool = Arc::new(Semaphore::new(config.group_concurrency));
        Self {
            store,
            definitions,
            log_sink,
            worker,
            notifications,
            config,
            group_pool,
        }
    }

    /// Shared control store this dispatcher executes against
    pub fn store(&self) -> &Arc<ControlStore> {
        &self.store
    }

    /// Dispatch one batch.
    ///
    /// `group_filter` is an optional comma-separated group list; without it,
    /// every group flagged active in the definition source is targeted. A
    /// fresh batch id is generated per call, so repeated triggers of the
    /// same groups stay independently controllable.
    #[instrument(skip(self), fields(mode = ?self.config.mode))]
    pub async fn dispatch(&self, group_filter: Option<&str>) -> Result<BatchSummary> {
        let started_at = Utc::now();
        let targets = self.resolve_targets(group_filter).await?;
        let batch_id = Uuid::new_v4().to_string();

        info!(
            batch_id,
            groups = targets.len(),
            "starting batch dispatch"
        );

        let initialized = self.initialize_groups(&targets, &batch_id).await?;
        if initialized.is_empty() {
            warn!(batch_id, "no executable groups resolved");
        }

        let group_outcomes = match self.config.mode {
            DispatchMode::Sync => self.execute_sync(&initialized, &batch_id).await,
            DispatchMode::Async => self.execute_async(&initialized, &batch_id).await,
        };

        let summary = BatchSummary::from_groups(batch_id, started_at, group_outcomes);
        info!(
            batch_id = %summary.batch_id,
            total_jobs = summary.total_jobs,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "batch dispatch finished"
        );

        if let Err(e) = self.notifications.on_batch_completion(&summary).await {
            warn!(batch_id = %summary.batch_id, error = %e, "batch completion notification failed");
        }

        Ok(summary)
    }

    /// Resolve the target group set, preserving order and dropping duplicates
    async fn resolve_targets(&self, group_filter: Option<&str>) -> Result<Vec<String>> {
        let raw: Vec<String> = match group_filter {
            Some(filter) => filter
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            None => self.definitions.active_groups().await?,
        };

        let mut seen = HashSet::new();
        Ok(raw.into_iter().filter(|g| seen.insert(g.clone())).collect())
    }

    /// Load control records and pending log rows for every target group
    async fn initialize_groups(&self, targets: &[String], batch_id: &str) -> Result<Vec<String>> {
        let mut initialized = Vec::new();
        for group in targets {
            if !self.store.load_group(group, batch_id).await? {
                warn!(group, batch_id, "group unknown or has no active jobs, skipping");
                continue;
            }
            self.store
                .update_group_status(group, batch_id, ExecutionStatus::Running);

            for job in self
                .definitions
                .jobs_for_group(group)
                .await?
                .into_iter()
                .filter(|j| j.active)
            {
                self.store.load_job(&job.code, batch_id).await?;
                self.store
                    .update_job_status(&job.code, batch_id, ExecutionStatus::Pending);
                let handle = self.log_sink.create_pending(&job, batch_id).await?;
                self.store.set_job_log_handle(&job.code, batch_id, handle);
            }
            initialized.push(group.clone());
        }
        Ok(initialized)
    }

    async fn execute_sync(&self, groups: &[String], batch_id: &str) -> Vec<GroupOutcome> {
        let mut outcomes = Vec::new();
        for group in groups {
            match self.execute_group(group, batch_id).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    error!(group, batch_id, error = %e, "group execution failed");
                    outcomes.push(GroupOutcome::synthetic_failure(
                        group,
                        batch_id,
                        e.to_string(),
                        false,
                    ));
                }
            }
        }
        outcomes
    }

    /// Run one task per group on the bounded pool, each with its own
    /// timeout clock starting at submission. A timed-out or failed group
    /// never blocks or cancels its siblings.
    async fn execute_async(&self, groups: &[String], batch_id: &str) -> Vec<GroupOutcome> {
        let mut handles = Vec::new();
        for group in groups {
            let this = self.clone();
            let group_name = group.clone();
            let batch = batch_id.to_string();
            let pool = Arc::clone(&self.group_pool);
            let deadline = tokio::time::Instant::now() + self.config.group_timeout;

            let task = tokio::spawn(async move {
                let _permit = pool
                    .acquire_owned()
                    .await
                    .map_err(|_| ReportFlowError::Internal("group pool closed".to_string()))?;
                this.execute_group(&group_name, &batch).await
            });
            handles.push((group.clone(), deadline, task));
        }

        let mut outcomes = Vec::new();
        for (group, deadline, mut task) in handles {
            match tokio::time::timeout_at(deadline, &mut task).await {
                Ok(Ok(Ok(outcome))) => outcomes.push(outcome),
                Ok(Ok(Err(e))) => {
                    error!(group, batch_id, error = %e, "group execution failed");
                    outcomes.push(GroupOutcome::synthetic_failure(
                        &group,
                        batch_id,
                        e.to_string(),
                        false,
                    ));
                }
                Ok(Err(join_err)) => {
                    error!(group, batch_id, error = %join_err, "group task panicked");
                    outcomes.push(GroupOutcome::synthetic_failure(
                        &group,
                        batch_id,
                        join_err.to_string(),
                        false,
                    ));
                }
                Err(_) => {
                    warn!(group, batch_id, "group timed out, aborting its task");
                    task.abort();
                    if tokio::time::timeout(self.config.abort_grace, &mut task)
                        .await
                        .is_err()
                    {
                        // Known limitation: the task thread is leaked.
                        error!(group, batch_id, "group task did not terminate after abort");
                    }
                    outcomes.push(GroupOutcome::synthetic_failure(
                        &group, batch_id, "timeout", true,
                    ));
                }
            }
        }
        outcomes
    }

    /// Execute every active job of one group strictly in configured order
    #[instrument(skip(self))]
    async fn execute_group(&self, group: &str, batch_id: &str) -> Result<GroupOutcome> {
        // Snapshot the ordered job list; completions detach codes from the
        // live record while we iterate.
        let codes = self
            .store
            .group_job_codes(group, batch_id)
            .unwrap_or_default();

        let definitions = self.definitions.jobs_for_group(group).await?;
        let by_code: HashMap<&str, &JobDefinition> = definitions
            .iter()
            .map(|job| (job.code.as_str(), job))
            .collect();

        let mut outcomes = Vec::new();
        for code in &codes {
            let Some(job) = by_code.get(code.as_str()) else {
                debug!(code, group, batch_id, "definition disappeared, detaching");
                self.store.detach_job_code(group, batch_id, code);
                continue;
            };
            if !job.active {
                debug!(code, group, batch_id, "skipping inactive job");
                self.store.detach_job_code(group, batch_id, code);
                continue;
            }
            outcomes.push(self.execute_job(job, batch_id).await);
        }

        let status = if outcomes.iter().all(|o| o.success) {
            ExecutionStatus::Completed
        } else {
            ExecutionStatus::Failed
        };

        info!(
            group,
            batch_id,
            succeeded = outcomes.iter().filter(|o| o.success).count(),
            failed = outcomes.iter().filter(|o| !o.success).count(),
            "group execution finished"
        );

        Ok(GroupOutcome {
            group: group.to_string(),
            batch_id: batch_id.to_string(),
            status,
            outcomes,
            timed_out: false,
        })
    }

    /// Execute one job: checkpoint, run the worker, persist, notify, evict
    async fn execute_job(&self, job: &JobDefinition, batch_id: &str) -> JobOutcome {
        let started = Instant::now();
        let mut resumed_from_pause = false;

        // Pre-execution checkpoint, in order: group-stop, job-stop,
        // group-cancel, job-cancel, then pause.
        let blocked = loop {
            let group_status = self.store.group_status(&job.group, batch_id);
            let job_status = self.store.job_status(&job.code, batch_id);

            if group_status == Some(ExecutionStatus::Stopped)
                || job_status == Some(ExecutionStatus::Stopped)
            {
                break Some((ExecutionStatus::Stopped, "stop requested"));
            }
            if group_status == Some(ExecutionStatus::Cancelled)
                || job_status == Some(ExecutionStatus::Cancelled)
            {
                break Some((ExecutionStatus::Cancelled, "cancel requested"));
            }
            if group_status == Some(ExecutionStatus::Paused)
                || job_status == Some(ExecutionStatus::Paused)
            {
                resumed_from_pause = true;
                self.wait_for_resume(job, batch_id).await;
                continue;
            }
            break None;
        };

        if let Some((status, reason)) = blocked {
            return self
                .short_circuit(job, batch_id, status, reason, started, resumed_from_pause)
                .await;
        }

        self.store
            .update_job_status(&job.code, batch_id, ExecutionStatus::Running);
        if let Some(handle) = self.job_log_handle(&job.code, batch_id) {
            let note = resumed_from_pause.then_some("resumed");
            if let Err(e) = self
                .log_sink
                .update_status(&handle, ExecutionStatus::Running, note)
                .await
            {
                warn!(code = %job.code, batch_id, error = %e, "log status write failed");
            }
        }

        let worker_outcome = match self.worker.execute(job, batch_id).await {
            Ok(outcome) => outcome,
            Err(e) => WorkerOutcome::failed(e.to_string(), started.elapsed()),
        };

        // A cancel or stop that landed while the worker ran wins over the
        // worker's own result at this persist point. The unit of work was
        // never preempted; only its reported outcome changes.
        let interrupted = match self.store.job_status(&job.code, batch_id) {
            Some(ExecutionStatus::Cancelled) => {
                Some((ExecutionStatus::Cancelled, "cancel requested"))
            }
            Some(ExecutionStatus::Stopped) => Some((ExecutionStatus::Stopped, "stop requested")),
            _ => None,
        };

        let (final_status, message) = match interrupted {
            Some((status, reason)) => {
                info!(code = %job.code, batch_id, reason, "job interrupted during execution");
                (status, Some(reason.to_string()))
            }
            None if worker_outcome.success => (ExecutionStatus::Completed, None),
            None => (ExecutionStatus::Failed, worker_outcome.error.clone()),
        };

        if self.store.job_status(&job.code, batch_id) != Some(final_status) {
            self.store
                .update_job_status(&job.code, batch_id, final_status);
        }

        if let Some(handle) = self.job_log_handle(&job.code, batch_id) {
            // Log-write failures are logged, never rolled back.
            if let Err(e) = self
                .log_sink
                .update_status(&handle, final_status, message.as_deref())
                .await
            {
                warn!(code = %job.code, batch_id, error = %e, "log status write failed");
            }
            if let Err(e) = self
                .log_sink
                .update_execution_time(&handle, Utc::now(), worker_outcome.duration)
                .await
            {
                warn!(code = %job.code, batch_id, error = %e, "log timing write failed");
            }
        }

        let outcome = JobOutcome {
            job_code: job.code.clone(),
            batch_id: batch_id.to_string(),
            success: final_status == ExecutionStatus::Completed,
            message,
            duration: started.elapsed(),
            resumed_from_pause,
        };

        // Operator interruptions do not notify.
        if !outcome.success && interrupted.is_none() {
            if let Err(e) = self.notifications.on_job_failure(job, &outcome).await {
                warn!(code = %job.code, batch_id, error = %e, "job failure notification failed");
            }
        }

        self.finish_job(job, batch_id, outcome.success);
        outcome
    }

    /// Produce a checkpoint failure result without invoking the worker
    async fn short_circuit(
        &self,
        job: &JobDefinition,
        batch_id: &str,
        status: ExecutionStatus,
        reason: &str,
        started: Instant,
        resumed_from_pause: bool,
    ) -> JobOutcome {
        info!(code = %job.code, batch_id, reason, "job short-circuited at checkpoint");

        if self.store.job_status(&job.code, batch_id) != Some(status) {
            self.store.update_job_status(&job.code, batch_id, status);
        }
        if let Some(handle) = self.job_log_handle(&job.code, batch_id) {
            if let Err(e) = self.log_sink.update_status(&handle, status, Some(reason)).await {
                warn!(code = %job.code, batch_id, error = %e, "log status write failed");
            }
        }

        let outcome = JobOutcome {
            job_code: job.code.clone(),
            batch_id: batch_id.to_string(),
            success: false,
            message: Some(reason.to_string()),
            duration: started.elapsed(),
            resumed_from_pause,
        };
        self.finish_job(job, batch_id, false);
        outcome
    }

    /// Count the result against the group and evict the job record
    fn finish_job(&self, job: &JobDefinition, batch_id: &str, success: bool) {
        let group_key = BatchKey::new(&job.group, batch_id);
        self.store.record_job_result(&group_key, success);
        self.store.complete_job(&job.code, batch_id);
    }

    /// Wait out a pause. The record notifiers wake us the moment a resume,
    /// stop or cancel lands; the poll-interval sleep bounds the latency of
    /// any missed wakeup.
    async fn wait_for_resume(&self, job: &JobDefinition, batch_id: &str) {
        let group_entry = self.store.group_entry(&job.group, batch_id);
        let job_entry = self.store.job_entry(&job.code, batch_id);

        let group_wake = async {
            match &group_entry {
                Some(entry) => entry.resume.notified().await,
                None => futures::future::pending().await,
            }
        };
        let job_wake = async {
            match &job_entry {
                Some(entry) => entry.resume.notified().await,
                None => futures::future::pending().await,
            }
        };

        tokio::select! {
            _ = group_wake => {}
            _ = job_wake => {}
            _ = tokio::time::sleep(self.config.pause_poll_interval) => {}
        }
    }

    fn job_log_handle(&self, code: &str, batch_id: &str) -> Option<crate::external::LogHandle> {
        self.store
            .job_record(code, batch_id)
            .and_then(|record| record.log_handle)
    }
}
