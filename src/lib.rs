//! firejail-core: filesystem isolation and sandbox join for a Linux
//! namespace sandbox.
//!
//! # Architecture
//!
//! ## Kernel Primitives ([`kernel`])
//! - [`kernel::privileged`]: scoped effective-root switching and the mount syscall seam
//! - [`kernel::namespace`]: mount namespace setup and `setns` joins
//! - [`kernel::capabilities`]: capability bounding set replay
//! - [`kernel::credentials`]: dropping to the invoking user
//! - [`kernel::cgroup`], [`kernel::cpu`]: inherited resource placement
//! - [`kernel::seccomp`]: loading and installing precompiled filters
//! - [`kernel::signal`]: parent-death and terminate handling
//!
//! ## Filesystem ([`fs`])
//! - [`fs::rundir`]: the `/run/firejail` runtime tree
//! - [`fs::primitives`]: blacklist, read-only, tmpfs, noexec and bind operations
//! - [`fs::profile`]: applying a profile policy with noblacklist and globbing
//! - [`fs::root`]: basic, overlay and chroot root strategies
//! - [`fs::kernelfs`]: `/proc` and `/sys` hardening, private `/tmp`
//!
//! ## Join ([`join`])
//! - [`join::procfs`]: target resolution through procfs
//! - [`join::identity`]: capturing the restrictions of a running sandbox
//! - [`join::exec`]: shell selection and the final exec
//!
//! ## Observability ([`observability`])
//! - [`observability::audit`]: the per-sandbox filesystem log
//!
//! # Design Principles
//!
//! 1. **Root is a capability** - privileged calls need a [`kernel::privileged::RootToken`]
//! 2. **Kernel as truth** - decisions come from `/proc` and `stat`, never from guesses
//! 3. **Minimal unsafe** - thin wrappers with explicit preconditions

// Kernel Primitives
pub mod kernel;

// Sandbox filesystem
pub mod fs;

// Attaching to running sandboxes
pub mod join;

// Observability
pub mod observability;

// Configuration & Policy
pub mod config;

// Shared state of one filesystem build
pub mod context;

// Testing Infrastructure
pub mod testing;

// CLI entrypoint for the firejail binary
pub mod cli;

// Re-export commonly used types for convenience
pub use config::types::*;
pub use context::SandboxContext;
