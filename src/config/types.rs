/// Core error types for the sandbox filesystem and join layers
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while building a sandbox filesystem or joining a sandbox
#[derive(Error, Debug)]
pub enum JailError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Run directory exists but is not owned by root
    #[error("non-root {} directory, exiting", .0.display())]
    UntrustedRunDir(PathBuf),

    /// A host file the sandbox relies on is missing or is a symlink
    #[error("{0}")]
    MissingHostAsset(String),

    /// A mount, bind, remount or umount syscall failed
    #[error("{op} {}: {errno}", target.display())]
    MountFailed {
        op: &'static str,
        target: PathBuf,
        errno: nix::errno::Errno,
    },

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// realpath(3) failed with EACCES
    #[error("no access to {}", .0.display())]
    ResolutionDenied(PathBuf),

    #[error("cannot find {}", .0.display())]
    TargetMissing(PathBuf),

    #[error("invalid profile line {0}")]
    InvalidProfileLine(String),

    #[error("unsupported kernel: {0}")]
    UnsupportedKernel(String),

    #[error("cannot find sandbox {0}")]
    SandboxNotFound(String),

    #[error("Namespace error: {0}")]
    Namespace(String),

    #[error("Privilege error: {0}")]
    Privilege(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Process error: {0}")]
    Process(String),
}

impl JailError {
    pub fn mount(op: &'static str, target: impl Into<PathBuf>, errno: nix::errno::Errno) -> Self {
        JailError::MountFailed {
            op,
            target: target.into(),
            errno,
        }
    }

    /// Kinds the profile applier downgrades to a warning and skips.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            JailError::TargetMissing(_)
                | JailError::InvalidProfileLine(_)
                | JailError::PermissionDenied(_)
                | JailError::ResolutionDenied(_)
        )
    }
}

/// Convert errors to process exit codes
impl From<&JailError> for i32 {
    fn from(_err: &JailError) -> i32 {
        1
    }
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, JailError>;
