//! Control-state core: composite keys, control records, the concurrent
//! registry and the operator-facing control surface

pub mod key;
pub mod record;
pub mod store;
pub mod surface;

pub use key::{BatchKey, KeyParseError, KEY_SEPARATOR};
pub use record::{ControlAction, ExecutionStatus, GroupRecord, JobRecord};
pub use store::{ControlStore, GroupStats};
pub use surface::ControlSurface;
