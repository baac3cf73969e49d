//! Periodic consistency audit and repair

pub mod reconciler;

pub use reconciler::{ReconcileReport, Reconciler};
