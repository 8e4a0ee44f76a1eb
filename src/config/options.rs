/// Per-invocation options handed over by the launcher
use std::path::PathBuf;

/// How the sandbox root is staged. The strategies are mutually exclusive.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum RootStrategy {
    /// Remount top-level system directories read-only in place
    #[default]
    Basic,
    /// Pivot into an overlayfs over the real root
    Overlay(OverlayOptions),
    /// Enter a caller-supplied root tree
    Chroot(PathBuf),
}

/// Overlay placement
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct OverlayOptions {
    /// Keep upper/work directories here instead of the ephemeral mnt tmpfs
    pub persistent: Option<PathBuf>,
    /// Allow an existing persistent directory to be reused
    pub reuse: bool,
}

/// Filesystem options for a new sandbox
#[derive(Clone, Debug, Default)]
pub struct SandboxOptions {
    pub home: PathBuf,
    pub writable_etc: bool,
    pub writable_var: bool,
    pub private_dev: bool,
    pub private_tmp: bool,
    pub strategy: RootStrategy,
}

/// Options for attaching to a running sandbox
#[derive(Clone, Debug, Default)]
pub struct JoinOptions {
    /// Pid or sandbox name
    pub target: String,
    pub join_network: bool,
    pub join_filesystem: bool,
    /// Empty means start the sandbox shell
    pub command: Vec<String>,
    pub shell: Option<PathBuf>,
    pub cwd: Option<PathBuf>,
    pub nice: Option<i32>,
    /// Protocol list, e.g. `unix,inet`
    pub protocol: Option<String>,
    pub home: PathBuf,
}
