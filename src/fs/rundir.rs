//! Run directory layout under `/run/firejail`.
//!
//! The base tree is created root-owned once; a tmpfs is mounted on the mnt
//! directory once per mount namespace and receives the per-sandbox files.

use crate::config::types::{JailError, Result};
use crate::kernel::privileged::{FileKind, PrivilegedOps, RootToken};
use nix::mount::MsFlags;
use std::path::{Path, PathBuf};

const HOST_COPY_TOOL: &str = "/bin/cp";

/// Fixed paths of the run directory
#[derive(Clone, Debug)]
pub struct RunLayout {
    pub base: PathBuf,
    pub network_dir: PathBuf,
    pub bandwidth_dir: PathBuf,
    pub name_dir: PathBuf,
    pub x11_dir: PathBuf,
    pub appimage_dir: PathBuf,
    /// Empty directory used to shadow directories, mode 0500
    pub ro_dir: PathBuf,
    /// Empty file used to shadow files, mode 0400
    pub ro_file: PathBuf,
    pub mnt_dir: PathBuf,
    tmpfs_mounted: bool,
}

impl RunLayout {
    pub fn new(base: impl AsRef<Path>) -> Self {
        let base = base.as_ref().to_path_buf();
        Self {
            network_dir: base.join("network"),
            bandwidth_dir: base.join("bandwidth"),
            name_dir: base.join("name"),
            x11_dir: base.join("x11"),
            appimage_dir: base.join("appimage"),
            ro_dir: base.join("ro"),
            ro_file: base.join("ro.file"),
            mnt_dir: base.join("mnt"),
            base,
            tmpfs_mounted: false,
        }
    }

    pub fn tmpfs_mounted(&self) -> bool {
        self.tmpfs_mounted
    }

    pub fn copy_tool(&self) -> PathBuf {
        self.mnt_dir.join("cp")
    }

    pub fn fslogger_file(&self) -> PathBuf {
        self.mnt_dir.join("fslogger")
    }

    pub fn seccomp_filter(&self) -> PathBuf {
        self.mnt_dir.join("seccomp")
    }

    pub fn seccomp_protocol_filter(&self) -> PathBuf {
        self.mnt_dir.join("seccomp.protocol")
    }

    pub fn cpu_cfg(&self) -> PathBuf {
        self.mnt_dir.join("cpu.cfg")
    }

    pub fn cgroup_cfg(&self) -> PathBuf {
        self.mnt_dir.join("cgroup.cfg")
    }

    pub fn groups_cfg(&self) -> PathBuf {
        self.mnt_dir.join("groups.cfg")
    }

    pub fn protocol_cfg(&self) -> PathBuf {
        self.mnt_dir.join("protocol.cfg")
    }

    pub fn oroot(&self) -> PathBuf {
        self.mnt_dir.join("oroot")
    }

    /// Create the fixed directories, rejecting any that are not root-owned.
    pub fn ensure_base(&self, ops: &dyn PrivilegedOps, tok: &RootToken) -> Result<()> {
        for dir in [
            &self.base,
            &self.network_dir,
            &self.bandwidth_dir,
            &self.name_dir,
            &self.x11_dir,
            &self.appimage_dir,
        ] {
            create_root_dir(ops, tok, dir, 0o755)?;
        }
        Ok(())
    }

    /// Create the shadowing sentinels if they are missing.
    pub fn ensure_sentinels(&self, ops: &dyn PrivilegedOps, tok: &RootToken) -> Result<()> {
        create_root_dir(ops, tok, &self.ro_dir, 0o500)?;

        match ops.lstat(&self.ro_file) {
            Some(meta) if meta.kind == FileKind::File && meta.is_root_owned() => {}
            Some(_) => return Err(JailError::UntrustedRunDir(self.ro_file.clone())),
            None => ops.create_file(tok, &self.ro_file, 0, 0, 0o400)?,
        }
        Ok(())
    }

    /// Base tree and sentinels
    pub fn build(&self, ops: &dyn PrivilegedOps, tok: &RootToken) -> Result<()> {
        self.ensure_base(ops, tok)?;
        self.ensure_sentinels(ops, tok)
    }

    /// Mount the mnt tmpfs unless this namespace already has it.
    pub fn ensure_mnt_tmpfs(&mut self, ops: &dyn PrivilegedOps, tok: &RootToken) -> Result<()> {
        if self.tmpfs_mounted {
            return Ok(());
        }
        create_root_dir(ops, tok, &self.mnt_dir, 0o755)?;
        ops.mount(
            tok,
            Some(Path::new("tmpfs")),
            &self.mnt_dir,
            Some("tmpfs"),
            MsFlags::MS_NOSUID | MsFlags::MS_STRICTATIME | MsFlags::MS_REC,
            Some("mode=755,gid=0"),
        )
        .map_err(|e| relabel(e, "mount tmpfs"))?;
        self.tmpfs_mounted = true;
        log::debug!("tmpfs mounted on {}", self.mnt_dir.display());
        Ok(())
    }

    /// After chroot the old tmpfs is out of reach: rebuild inside the new root.
    pub fn reset_for_chroot(&mut self, ops: &dyn PrivilegedOps, tok: &RootToken) -> Result<()> {
        self.tmpfs_mounted = false;
        self.build(ops, tok)?;
        self.ensure_mnt_tmpfs(ops, tok)
    }

    /// Stage a private copy of the host `cp` in the mnt tmpfs.
    pub fn stage_copy_tool(&self, ops: &dyn PrivilegedOps, tok: &RootToken) -> Result<()> {
        self.stage_copy_tool_from(ops, tok, Path::new(HOST_COPY_TOOL))
    }

    pub fn stage_copy_tool_from(
        &self,
        ops: &dyn PrivilegedOps,
        tok: &RootToken,
        host_tool: &Path,
    ) -> Result<()> {
        if !self.tmpfs_mounted {
            return Err(JailError::Process(format!(
                "{} is not mounted yet",
                self.mnt_dir.display()
            )));
        }

        let resolved = ops
            .realpath(host_tool)
            .ok()
            .flatten()
            .ok_or_else(|| JailError::MissingHostAsset(format!("cannot find {}", host_tool.display())))?;
        if ops.is_symlink(&resolved) || !ops.stat(&resolved).is_some_and(|m| m.kind == FileKind::File) {
            return Err(JailError::MissingHostAsset(format!(
                "invalid {} file",
                host_tool.display()
            )));
        }

        ops.copy_file(tok, &resolved, &self.copy_tool(), 0, 0, 0o755)?;
        log::debug!("staged {} as {}", resolved.display(), self.copy_tool().display());
        Ok(())
    }

    pub fn remove_copy_tool(&self, ops: &dyn PrivilegedOps, tok: &RootToken) -> Result<()> {
        let staged = self.copy_tool();
        if ops.lstat(&staged).is_some() {
            ops.remove_file(tok, &staged)?;
        }
        Ok(())
    }
}

fn create_root_dir(ops: &dyn PrivilegedOps, tok: &RootToken, dir: &Path, mode: u32) -> Result<()> {
    match ops.lstat(dir) {
        Some(meta) => {
            if meta.kind != FileKind::Dir || !meta.is_root_owned() {
                return Err(JailError::UntrustedRunDir(dir.to_path_buf()));
            }
        }
        None => {
            ops.mkdir(tok, dir, mode)?;
            ops.chown(tok, dir, 0, 0)?;
            ops.chmod(tok, dir, mode)?;
        }
    }
    Ok(())
}

/// Replace the generic op name of a mount failure with a specific one.
pub(crate) fn relabel(err: JailError, op: &'static str) -> JailError {
    match err {
        JailError::MountFailed { target, errno, .. } => JailError::MountFailed { op, target, errno },
        other => other,
    }
}
