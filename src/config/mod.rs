//! Configuration, policy and error types.

pub mod loader;
pub mod options;
pub mod policy;
pub mod types;

pub use loader::JailConfig;
pub use options::{JoinOptions, OverlayOptions, RootStrategy, SandboxOptions};
pub use policy::{Policy, Rule, RuleKind};
pub use types::{JailError, Result};
