//! Capability-checked wrappers over the privileged filesystem syscalls.
//!
//! The launcher runs set-uid: the real uid is the invoking user and the
//! effective uid is toggled between that user and root. Every mutating
//! operation takes a [`RootToken`], which can only be obtained inside
//! [`as_root`]; the effective ids are restored when the closure returns,
//! whichever way it exits.

use crate::config::types::{JailError, Result};
use nix::mount::{MntFlags, MsFlags};
use nix::unistd::{Gid, Uid};
use std::fs::{self, Metadata, OpenOptions, Permissions};
use std::os::unix::fs::{MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

/// Proof that the effective uid has been raised to root.
#[derive(Debug)]
pub struct RootToken {
    _private: (),
}

/// Real identity of the invoking user
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Caller {
    pub uid: u32,
    pub gid: u32,
}

impl Caller {
    pub fn is_root(&self) -> bool {
        self.uid == 0
    }
}

/// Effective ids saved before a privilege switch
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PrivState {
    pub euid: u32,
    pub egid: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
    Dir,
    File,
    Symlink,
    Other,
}

/// The subset of stat(2) the sandbox looks at
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileMeta {
    pub uid: u32,
    pub gid: u32,
    /// Permission bits, `st_mode & 07777`
    pub mode: u32,
    pub kind: FileKind,
}

impl FileMeta {
    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Dir
    }

    pub fn is_root_owned(&self) -> bool {
        self.uid == 0 && self.gid == 0
    }
}

impl From<&Metadata> for FileMeta {
    fn from(meta: &Metadata) -> Self {
        let ft = meta.file_type();
        let kind = if ft.is_symlink() {
            FileKind::Symlink
        } else if ft.is_dir() {
            FileKind::Dir
        } else if ft.is_file() {
            FileKind::File
        } else {
            FileKind::Other
        };
        FileMeta {
            uid: meta.uid(),
            gid: meta.gid(),
            mode: meta.mode() & 0o7777,
            kind,
        }
    }
}

/// Privileged operations used by the mount layer.
///
/// Queries have default implementations over the live filesystem; the
/// mutating calls are backend specific.
pub trait PrivilegedOps {
    fn caller(&self) -> Caller;

    /// Raise effective ids to root, returning the previous ones.
    fn raise(&self) -> Result<PrivState>;
    /// Lower effective ids to the caller, returning the previous ones.
    fn lower(&self) -> Result<PrivState>;
    fn restore(&self, state: PrivState) -> Result<()>;

    fn mount(
        &self,
        tok: &RootToken,
        source: Option<&Path>,
        target: &Path,
        fstype: Option<&str>,
        flags: MsFlags,
        data: Option<&str>,
    ) -> Result<()>;
    fn umount_detach(&self, tok: &RootToken, target: &Path) -> Result<()>;
    fn chroot(&self, tok: &RootToken, path: &Path) -> Result<()>;
    /// Create a directory with the given mode, owned by the effective ids.
    fn mkdir(&self, tok: &RootToken, path: &Path, mode: u32) -> Result<()>;
    fn chown(&self, tok: &RootToken, path: &Path, uid: u32, gid: u32) -> Result<()>;
    fn chmod(&self, tok: &RootToken, path: &Path, mode: u32) -> Result<()>;
    /// Create (or truncate) a regular file with the given owner and mode.
    fn create_file(&self, tok: &RootToken, path: &Path, uid: u32, gid: u32, mode: u32)
        -> Result<()>;
    fn copy_file(
        &self,
        tok: &RootToken,
        src: &Path,
        dst: &Path,
        uid: u32,
        gid: u32,
        mode: u32,
    ) -> Result<()>;
    fn remove_file(&self, tok: &RootToken, path: &Path) -> Result<()>;

    fn stat(&self, path: &Path) -> Option<FileMeta> {
        fs::metadata(path).ok().map(|m| FileMeta::from(&m))
    }

    fn lstat(&self, path: &Path) -> Option<FileMeta> {
        fs::symlink_metadata(path).ok().map(|m| FileMeta::from(&m))
    }

    /// Resolve all symlinks. `Ok(None)` when the path does not resolve,
    /// `Err(ResolutionDenied)` when resolution hits EACCES.
    fn realpath(&self, path: &Path) -> Result<Option<PathBuf>> {
        match fs::canonicalize(path) {
            Ok(resolved) => Ok(Some(resolved)),
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                Err(JailError::ResolutionDenied(path.to_path_buf()))
            }
            Err(_) => Ok(None),
        }
    }

    fn is_symlink(&self, path: &Path) -> bool {
        self.lstat(path).is_some_and(|m| m.kind == FileKind::Symlink)
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.stat(path).is_some_and(|m| m.is_dir())
    }

    fn bind(&self, tok: &RootToken, source: &Path, target: &Path, flags: MsFlags) -> Result<()> {
        self.mount(tok, Some(source), target, None, MsFlags::MS_BIND | flags, None)
    }

    fn remount(&self, tok: &RootToken, target: &Path, flags: MsFlags) -> Result<()> {
        self.mount(tok, None, target, None, MsFlags::MS_REMOUNT | flags, None)
    }
}

struct RestoreGuard<'a> {
    ops: &'a dyn PrivilegedOps,
    prev: PrivState,
}

impl Drop for RestoreGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.ops.restore(self.prev) {
            log::warn!("Failed to restore effective ids: {}", e);
        }
    }
}

/// Run `f` with effective root.
pub fn as_root<T>(ops: &dyn PrivilegedOps, f: impl FnOnce(&RootToken) -> Result<T>) -> Result<T> {
    let prev = ops.raise()?;
    let _guard = RestoreGuard { ops, prev };
    f(&RootToken { _private: () })
}

/// Run `f` with the caller's effective ids.
pub fn as_user<T>(ops: &dyn PrivilegedOps, f: impl FnOnce() -> Result<T>) -> Result<T> {
    let prev = ops.lower()?;
    let _guard = RestoreGuard { ops, prev };
    f()
}

/// Live backend issuing real syscalls.
#[derive(Debug, Default, Clone, Copy)]
pub struct KernelOps;

impl KernelOps {
    pub fn new() -> Self {
        Self
    }

    fn ensure_root_effective(&self) -> Result<()> {
        if nix::unistd::geteuid().is_root() {
            Ok(())
        } else {
            Err(JailError::PermissionDenied(
                "operation requires effective root".to_string(),
            ))
        }
    }

    fn current() -> PrivState {
        PrivState {
            euid: nix::unistd::geteuid().as_raw(),
            egid: nix::unistd::getegid().as_raw(),
        }
    }
}

fn errno_to_io(errno: nix::errno::Errno) -> JailError {
    JailError::Io(std::io::Error::from(errno))
}

impl PrivilegedOps for KernelOps {
    fn caller(&self) -> Caller {
        Caller {
            uid: nix::unistd::getuid().as_raw(),
            gid: nix::unistd::getgid().as_raw(),
        }
    }

    fn raise(&self) -> Result<PrivState> {
        let prev = Self::current();
        if prev.euid != 0 {
            nix::unistd::seteuid(Uid::from_raw(0)).map_err(|e| {
                JailError::PermissionDenied(format!("cannot switch effective uid to root: {}", e))
            })?;
        }
        if let Err(e) = nix::unistd::setegid(Gid::from_raw(0)) {
            log::warn!("cannot switch effective gid to root: {}", e);
        }
        Ok(prev)
    }

    fn lower(&self) -> Result<PrivState> {
        let prev = Self::current();
        let caller = self.caller();
        // egid first, while still privileged
        nix::unistd::setegid(Gid::from_raw(caller.gid))
            .map_err(|e| JailError::Privilege(format!("setegid({}): {}", caller.gid, e)))?;
        nix::unistd::seteuid(Uid::from_raw(caller.uid))
            .map_err(|e| JailError::Privilege(format!("seteuid({}): {}", caller.uid, e)))?;
        Ok(prev)
    }

    fn restore(&self, state: PrivState) -> Result<()> {
        let now = Self::current();
        if now == state {
            return Ok(());
        }
        if state.euid == 0 {
            nix::unistd::seteuid(Uid::from_raw(0))
                .map_err(|e| JailError::Privilege(format!("seteuid(0): {}", e)))?;
            nix::unistd::setegid(Gid::from_raw(state.egid))
                .map_err(|e| JailError::Privilege(format!("setegid({}): {}", state.egid, e)))?;
        } else {
            nix::unistd::setegid(Gid::from_raw(state.egid))
                .map_err(|e| JailError::Privilege(format!("setegid({}): {}", state.egid, e)))?;
            nix::unistd::seteuid(Uid::from_raw(state.euid))
                .map_err(|e| JailError::Privilege(format!("seteuid({}): {}", state.euid, e)))?;
        }
        Ok(())
    }

    fn mount(
        &self,
        _tok: &RootToken,
        source: Option<&Path>,
        target: &Path,
        fstype: Option<&str>,
        flags: MsFlags,
        data: Option<&str>,
    ) -> Result<()> {
        self.ensure_root_effective()?;
        nix::mount::mount(source, target, fstype, flags, data)
            .map_err(|errno| JailError::mount("mount", target, errno))
    }

    fn umount_detach(&self, _tok: &RootToken, target: &Path) -> Result<()> {
        self.ensure_root_effective()?;
        nix::mount::umount2(target, MntFlags::MNT_DETACH)
            .map_err(|errno| JailError::mount("umount", target, errno))
    }

    fn chroot(&self, _tok: &RootToken, path: &Path) -> Result<()> {
        self.ensure_root_effective()?;
        nix::unistd::chroot(path).map_err(|e| {
            JailError::Process(format!("chroot {} failed: {}", path.display(), e))
        })?;
        std::env::set_current_dir("/").map_err(|e| {
            JailError::Process(format!("Failed to change to chroot root: {}", e))
        })?;
        Ok(())
    }

    fn mkdir(&self, tok: &RootToken, path: &Path, mode: u32) -> Result<()> {
        self.ensure_root_effective()?;
        nix::unistd::mkdir(path, nix::sys::stat::Mode::from_bits_truncate(mode))
            .map_err(errno_to_io)?;
        // umask may have masked bits
        self.chmod(tok, path, mode)
    }

    fn chown(&self, _tok: &RootToken, path: &Path, uid: u32, gid: u32) -> Result<()> {
        self.ensure_root_effective()?;
        nix::unistd::chown(path, Some(Uid::from_raw(uid)), Some(Gid::from_raw(gid)))
            .map_err(errno_to_io)
    }

    fn chmod(&self, _tok: &RootToken, path: &Path, mode: u32) -> Result<()> {
        self.ensure_root_effective()?;
        fs::set_permissions(path, Permissions::from_mode(mode))?;
        Ok(())
    }

    fn create_file(
        &self,
        _tok: &RootToken,
        path: &Path,
        uid: u32,
        gid: u32,
        mode: u32,
    ) -> Result<()> {
        self.ensure_root_effective()?;
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(mode)
            .open(path)?;
        std::os::unix::fs::fchown(&file, Some(uid), Some(gid))?;
        file.set_permissions(Permissions::from_mode(mode))?;
        Ok(())
    }

    fn copy_file(
        &self,
        tok: &RootToken,
        src: &Path,
        dst: &Path,
        uid: u32,
        gid: u32,
        mode: u32,
    ) -> Result<()> {
        self.ensure_root_effective()?;
        fs::copy(src, dst)?;
        self.chown(tok, dst, uid, gid)?;
        self.chmod(tok, dst, mode)
    }

    fn remove_file(&self, _tok: &RootToken, path: &Path) -> Result<()> {
        self.ensure_root_effective()?;
        fs::remove_file(path)?;
        Ok(())
    }
}
