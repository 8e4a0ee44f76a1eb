/// Privileged backend for tests
///
/// Directory and file creation happen for real inside a scratch tree so the
/// mount layer can stat what it built. Ownership is tracked in memory, and
/// mount and chroot calls are recorded instead of executed.
use crate::config::types::{JailError, Result};
use crate::fs::hooks::{FsHook, FsHooks};
use crate::kernel::privileged::{Caller, FileMeta, PrivState, PrivilegedOps, RootToken};
use nix::errno::Errno;
use nix::mount::MsFlags;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::fs::{self, Permissions};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// A recorded mount(2) call
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MountCall {
    pub source: Option<PathBuf>,
    pub target: PathBuf,
    pub fstype: Option<String>,
    pub flags: MsFlags,
    pub data: Option<String>,
}

impl MountCall {
    pub fn is_bind(&self) -> bool {
        self.flags.contains(MsFlags::MS_BIND) && !self.flags.contains(MsFlags::MS_REMOUNT)
    }

    pub fn is_remount(&self) -> bool {
        self.flags.contains(MsFlags::MS_REMOUNT)
    }
}

pub struct RecordingOps {
    caller: Caller,
    euid: Cell<u32>,
    egid: Cell<u32>,
    switches: RefCell<Vec<u32>>,
    owners: RefCell<HashMap<PathBuf, (u32, u32)>>,
    mounts: RefCell<Vec<MountCall>>,
    unmounts: RefCell<Vec<PathBuf>>,
    chroots: RefCell<Vec<PathBuf>>,
    denied: RefCell<HashSet<PathBuf>>,
    failing_sources: RefCell<HashMap<PathBuf, Errno>>,
}

impl RecordingOps {
    pub fn new(uid: u32, gid: u32) -> Self {
        Self {
            caller: Caller { uid, gid },
            euid: Cell::new(uid),
            egid: Cell::new(gid),
            switches: RefCell::new(Vec::new()),
            owners: RefCell::new(HashMap::new()),
            mounts: RefCell::new(Vec::new()),
            unmounts: RefCell::new(Vec::new()),
            chroots: RefCell::new(Vec::new()),
            denied: RefCell::new(HashSet::new()),
            failing_sources: RefCell::new(HashMap::new()),
        }
    }

    /// Pretend `path` is owned by `uid:gid`.
    pub fn set_owner(&self, path: &Path, uid: u32, gid: u32) {
        self.owners.borrow_mut().insert(key(path), (uid, gid));
    }

    /// Make `realpath(path)` fail with EACCES.
    pub fn deny_resolution(&self, path: &Path) {
        self.denied.borrow_mut().insert(path.to_path_buf());
    }

    /// Make every mount whose source is `source` fail with `errno`.
    pub fn fail_mounts_from(&self, source: &Path, errno: Errno) {
        self.failing_sources
            .borrow_mut()
            .insert(source.to_path_buf(), errno);
    }

    pub fn mounts(&self) -> Vec<MountCall> {
        self.mounts.borrow().clone()
    }

    pub fn mounts_on(&self, target: &Path) -> Vec<MountCall> {
        self.mounts
            .borrow()
            .iter()
            .filter(|m| m.target == target)
            .cloned()
            .collect()
    }

    pub fn unmounts(&self) -> Vec<PathBuf> {
        self.unmounts.borrow().clone()
    }

    pub fn chroots(&self) -> Vec<PathBuf> {
        self.chroots.borrow().clone()
    }

    pub fn effective_uid(&self) -> u32 {
        self.euid.get()
    }

    /// Effective uid after each raise, lower and restore, oldest first.
    pub fn euid_history(&self) -> Vec<u32> {
        self.switches.borrow().clone()
    }

    fn switch_to(&self, euid: u32, egid: u32) {
        self.euid.set(euid);
        self.egid.set(egid);
        self.switches.borrow_mut().push(euid);
    }

    fn require_root(&self) -> Result<()> {
        if self.euid.get() == 0 {
            Ok(())
        } else {
            Err(JailError::PermissionDenied(
                "operation requires effective root".to_string(),
            ))
        }
    }

    fn owner_of(&self, path: &Path) -> Option<(u32, u32)> {
        self.owners.borrow().get(&key(path)).copied()
    }

    fn overlay(&self, path: &Path, meta: FileMeta) -> FileMeta {
        match self.owner_of(path) {
            Some((uid, gid)) => FileMeta { uid, gid, ..meta },
            None => meta,
        }
    }
}

fn key(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

impl PrivilegedOps for RecordingOps {
    fn caller(&self) -> Caller {
        self.caller
    }

    fn raise(&self) -> Result<PrivState> {
        let prev = PrivState {
            euid: self.euid.get(),
            egid: self.egid.get(),
        };
        self.switch_to(0, 0);
        Ok(prev)
    }

    fn lower(&self) -> Result<PrivState> {
        let prev = PrivState {
            euid: self.euid.get(),
            egid: self.egid.get(),
        };
        self.switch_to(self.caller.uid, self.caller.gid);
        Ok(prev)
    }

    fn restore(&self, state: PrivState) -> Result<()> {
        self.switch_to(state.euid, state.egid);
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
        self.require_root()?;
        if let Some(src) = source {
            if let Some(errno) = self.failing_sources.borrow().get(src) {
                return Err(JailError::mount("mount", target, *errno));
            }
        }
        self.mounts.borrow_mut().push(MountCall {
            source: source.map(Path::to_path_buf),
            target: target.to_path_buf(),
            fstype: fstype.map(str::to_string),
            flags,
            data: data.map(str::to_string),
        });
        Ok(())
    }

    fn umount_detach(&self, _tok: &RootToken, target: &Path) -> Result<()> {
        self.require_root()?;
        self.unmounts.borrow_mut().push(target.to_path_buf());
        Ok(())
    }

    fn chroot(&self, _tok: &RootToken, path: &Path) -> Result<()> {
        self.require_root()?;
        self.chroots.borrow_mut().push(path.to_path_buf());
        Ok(())
    }

    fn mkdir(&self, _tok: &RootToken, path: &Path, mode: u32) -> Result<()> {
        self.require_root()?;
        fs::create_dir(path)?;
        fs::set_permissions(path, Permissions::from_mode(mode))?;
        self.set_owner(path, self.euid.get(), self.egid.get());
        Ok(())
    }

    fn chown(&self, _tok: &RootToken, path: &Path, uid: u32, gid: u32) -> Result<()> {
        self.require_root()?;
        if !path.exists() {
            return Err(JailError::Io(std::io::Error::from(Errno::ENOENT)));
        }
        self.set_owner(path, uid, gid);
        Ok(())
    }

    fn chmod(&self, _tok: &RootToken, path: &Path, mode: u32) -> Result<()> {
        self.require_root()?;
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
        self.require_root()?;
        fs::write(path, b"")?;
        fs::set_permissions(path, Permissions::from_mode(mode))?;
        self.set_owner(path, uid, gid);
        Ok(())
    }

    fn copy_file(
        &self,
        _tok: &RootToken,
        src: &Path,
        dst: &Path,
        uid: u32,
        gid: u32,
        mode: u32,
    ) -> Result<()> {
        self.require_root()?;
        fs::copy(src, dst)?;
        fs::set_permissions(dst, Permissions::from_mode(mode))?;
        self.set_owner(dst, uid, gid);
        Ok(())
    }

    fn remove_file(&self, _tok: &RootToken, path: &Path) -> Result<()> {
        self.require_root()?;
        fs::remove_file(path)?;
        self.owners.borrow_mut().remove(&key(path));
        Ok(())
    }

    fn stat(&self, path: &Path) -> Option<FileMeta> {
        let meta = fs::metadata(path).ok()?;
        Some(self.overlay(path, FileMeta::from(&meta)))
    }

    fn lstat(&self, path: &Path) -> Option<FileMeta> {
        let meta = fs::symlink_metadata(path).ok()?;
        Some(self.overlay(path, FileMeta::from(&meta)))
    }

    fn realpath(&self, path: &Path) -> Result<Option<PathBuf>> {
        if self.denied.borrow().contains(path) {
            return Err(JailError::ResolutionDenied(path.to_path_buf()));
        }
        Ok(fs::canonicalize(path).ok())
    }
}

/// Hook runner that remembers which hooks ran
#[derive(Clone, Debug, Default)]
pub struct RecordingHooks {
    calls: Rc<RefCell<Vec<FsHook>>>,
}

impl RecordingHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<FsHook> {
        self.calls.borrow().clone()
    }
}

impl FsHooks for RecordingHooks {
    fn run(&mut self, hook: FsHook) -> Result<()> {
        self.calls.borrow_mut().push(hook);
        Ok(())
    }
}
