//! Group/job dispatch for one batch

pub mod dispatcher;
pub mod types;

pub use dispatcher::Dispatcher;
pub use types::{BatchSummary, DispatchConfig, DispatchMode, GroupOutcome, JobOutcome};
