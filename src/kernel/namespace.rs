/// Namespace creation for new sandboxes and namespace attach for joins
use crate::config::types::{JailError, Result};

use nix::sched::{setns, unshare, CloneFlags};
use std::fs::File;
use std::path::{Path, PathBuf};

/// Namespace kinds a joiner can enter
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NsKind {
    Ipc,
    Net,
    Pid,
    Uts,
    Mnt,
    User,
}

impl NsKind {
    /// Entry name under `/proc/<pid>/ns`
    pub fn proc_name(self) -> &'static str {
        match self {
            NsKind::Ipc => "ipc",
            NsKind::Net => "net",
            NsKind::Pid => "pid",
            NsKind::Uts => "uts",
            NsKind::Mnt => "mnt",
            NsKind::User => "user",
        }
    }

    fn clone_flag(self) -> CloneFlags {
        match self {
            NsKind::Ipc => CloneFlags::CLONE_NEWIPC,
            NsKind::Net => CloneFlags::CLONE_NEWNET,
            NsKind::Pid => CloneFlags::CLONE_NEWPID,
            NsKind::Uts => CloneFlags::CLONE_NEWUTS,
            NsKind::Mnt => CloneFlags::CLONE_NEWNS,
            NsKind::User => CloneFlags::CLONE_NEWUSER,
        }
    }
}

/// Namespaces entered by a full join, in entry order
pub const FULL_JOIN: [NsKind; 5] = [NsKind::Ipc, NsKind::Net, NsKind::Pid, NsKind::Uts, NsKind::Mnt];

pub fn ns_path(proc_root: &Path, pid: i32, kind: NsKind) -> PathBuf {
    proc_root
        .join(pid.to_string())
        .join("ns")
        .join(kind.proc_name())
}

/// Attach the calling process to `kind` namespace of `pid`.
pub fn join_namespace(proc_root: &Path, pid: i32, kind: NsKind) -> Result<()> {
    let path = ns_path(proc_root, pid, kind);
    let file = File::open(&path).map_err(|e| {
        JailError::Namespace(format!("cannot open {}: {}", path.display(), e))
    })?;
    setns(&file, kind.clone_flag()).map_err(|e| {
        JailError::Namespace(format!(
            "cannot join {} namespace of process {}: {}",
            kind.proc_name(),
            pid,
            e
        ))
    })?;
    log::debug!("joined {} namespace of process {}", kind.proc_name(), pid);
    Ok(())
}

/// True when the kernel exposes everything a user-namespace join needs.
pub fn user_namespace_supported(proc_root: &Path) -> bool {
    let this = proc_root.join("self");
    this.join("ns").join("user").exists()
        && this.join("uid_map").exists()
        && this.join("gid_map").exists()
}

/// Give the calling process its own mount namespace.
pub fn unshare_mount_namespace() -> Result<()> {
    unshare(CloneFlags::CLONE_NEWNS).map_err(|e| {
        JailError::Namespace(format!("Failed to unshare mount namespace: {}", e))
    })?;
    log::info!("Entered a new mount namespace");
    Ok(())
}

/// Mark `/` private and recursive so sandbox mounts never reach the host.
pub fn harden_mount_propagation() -> Result<()> {
    use nix::mount::{mount, MsFlags};

    mount(
        None::<&str>,
        "/",
        None::<&str>,
        MsFlags::MS_REC | MsFlags::MS_PRIVATE,
        None::<&str>,
    )
    .map_err(|e| {
        JailError::Namespace(format!(
            "Failed to set MS_PRIVATE|MS_REC on /: {}",
            e
        ))
    })?;

    log::info!("Mount propagation hardened: / set to MS_PRIVATE|MS_REC");
    Ok(())
}
