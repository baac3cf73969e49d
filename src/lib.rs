//! # ReportFlow
//!
//! Batch report job orchestration with race-free, per-batch mid-run control.
//!
//! ## Overview
//!
//! ReportFlow coordinates batch report-generation jobs organized into named
//! groups. Operators can pause, resume, stop or cancel an individual job or
//! an entire group while it executes, independently across repeated triggers
//! of the same group: every dispatch gets its own batch id, and all control
//! state is keyed by `(entity, batch)`.
//!
//! The core is deliberately small: a concurrent control-state registry, a
//! dispatcher that walks groups and jobs while honoring control signals at
//! cooperative checkpoints, and a periodic reconciler that repairs records
//! whose derived flags have drifted. Job semantics, durable logging,
//! notifications and definitions are external collaborators behind narrow
//! async traits.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use reportflow::control::ControlStore;
//! use reportflow::dispatch::{DispatchConfig, Dispatcher};
//! use reportflow::external::memory::{
//!     CollectingNotifications, FnWorker, InMemoryDefinitions, InMemoryExecutionLog,
//! };
//! use reportflow::external::JobDefinition;
//!
//! # async fn example() -> reportflow::Result<()> {
//! let definitions = Arc::new(InMemoryDefinitions::new());
//! definitions.add_job(JobDefinition::new("daily_sales", "nightly").with_order(1, 1));
//!
//! let store = Arc::new(ControlStore::new(definitions.clone()));
//! let dispatcher = Dispatcher::new(
//!     store,
//!     definitions,
//!     Arc::new(InMemoryExecutionLog::new()),
//!     Arc::new(FnWorker::always_ok()),
//!     Arc::new(CollectingNotifications::new()),
//!     DispatchConfig::new(),
//! );
//!
//! let summary = dispatcher.dispatch(Some("nightly")).await?;
//! assert_eq!(summary.succeeded, 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Key guarantees
//!
//! - **Batch isolation**: control actions on a group under one batch never
//!   affect the same group under another batch
//! - **Ordered execution**: jobs within a group run strictly in configured
//!   order; sync mode also preserves group resolution order
//! - **Cooperative control**: pause/stop/cancel are observed at per-job
//!   checkpoints and at the post-execution persist point, bounded by the
//!   pause poll interval; running work is never preempted, but a cancel or
//!   stop landing mid-execution still decides the reported outcome
//! - **Derived flags**: paused/stopped/cancelled booleans are recomputed
//!   from status on every write, with a reconciler to heal any drift
//!
//! ## Modules
//!
//! - [`control`]: composite keys, control records, the registry and the
//!   operator control surface
//! - [`dispatch`]: the batch dispatcher and its result types
//! - [`reconcile`]: the consistency audit-and-repair pass
//! - [`external`]: collaborator traits and in-memory implementations

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

use thiserror::Error;

/// Result type for ReportFlow operations
pub type Result<T> = std::result::Result<T, ReportFlowError>;

/// Main error type for ReportFlow operations
#[derive(Error, Debug)]
pub enum ReportFlowError {
    /// Job definition source error
    #[error("Definition source error: {0}")]
    Definition(String),

    /// Execution log sink error
    #[error("Execution log error: {0}")]
    ExecutionLog(String),

    /// Worker reported an execution error
    #[error("Worker error: {0}")]
    Worker(String),

    /// Join error from async tasks
    #[error("Async join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Control-state core: keys, records, registry and control surface
pub mod control;

/// Batch dispatch
pub mod dispatch;

/// External collaborator interfaces
pub mod external;

/// Consistency reconciliation
pub mod reconcile;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() {
        assert_eq!(control::ExecutionStatus::Paused.to_string(), "paused");
        assert_eq!(control::ControlAction::Cancel.to_string(), "cancel");
    }

    #[test]
    fn test_error_display() {
        let err = ReportFlowError::Definition("missing group".to_string());
        assert_eq!(err.to_string(), "Definition source error: missing group");
    }
}
