//! Observability
//!
//! Audit trail of the mount decisions taken while building a sandbox.

pub mod audit;

pub use audit::{FsEvent, FsLogFile, FsLogger, MemoryLog};
