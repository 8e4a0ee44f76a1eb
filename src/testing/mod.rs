//! Testing infrastructure
//!
//! A recording privileged backend and mount table inspection helpers.

pub mod mountinfo;
pub mod recording_ops;

// Re-export commonly used items
pub use mountinfo::*;
pub use recording_ops::{MountCall, RecordingHooks, RecordingOps};
