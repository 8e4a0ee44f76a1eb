//! Thin wrappers around Linux kernel primitives.
//!
//! All `unsafe` code is concentrated here with explicit SAFETY comments.
//! Dependency direction: privileged -> namespace -> capabilities -> credentials -> cgroup/cpu -> seccomp

pub mod capabilities;
pub mod cgroup;
pub mod cpu;
pub mod credentials;
pub mod namespace;
pub mod privileged;
pub mod seccomp;
pub mod signal;
