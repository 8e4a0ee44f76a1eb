//! Atomic mount operations applied to a single path.
//!
//! Each remount is a bind of the path onto itself followed by a remount of
//! that bind with the requested flags. Blacklisting binds one of the run
//! directory sentinels over the path.

use crate::config::types::{JailError, Result};
use crate::context::{LastDisable, SandboxContext};
use crate::fs::rundir::relabel;
use crate::kernel::privileged::RootToken;
use nix::mount::MsFlags;
use std::path::Path;
use std::rc::Rc;

const SENTINEL_OPTIONS: &str = "mode=400,gid=0";

/// Why a primitive left a path alone
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Skip {
    Missing,
    /// `/bin` or `/usr/bin` is a symlink to a directory
    DirectoryLink,
    NotADirectory,
    NotOwner,
    /// Access denied during resolution and no sentinel could be mounted
    Unresolvable,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    Skipped(Skip),
}

impl Outcome {
    pub fn applied(self) -> bool {
        self == Outcome::Applied
    }
}

/// Operations reachable from a profile path
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisableOp {
    Blacklist,
    BlacklistNolog,
    ReadOnly,
    ReadWrite,
    Noexec,
    Tmpfs,
}

impl DisableOp {
    pub fn log_name(self) -> &'static str {
        match self {
            DisableOp::Blacklist => "blacklist",
            DisableOp::BlacklistNolog => "blacklist-nolog",
            DisableOp::ReadOnly => "read-only",
            DisableOp::ReadWrite => "read-write",
            DisableOp::Noexec => "noexec",
            DisableOp::Tmpfs => "tmpfs",
        }
    }

    pub fn is_blacklist(self) -> bool {
        matches!(self, DisableOp::Blacklist | DisableOp::BlacklistNolog)
    }
}

/// Resolve `path` and apply `op` to the result.
///
/// A path that does not resolve is skipped silently. For the non-blacklist
/// operations an access-denied resolution is returned as
/// [`JailError::ResolutionDenied`].
pub fn disable_path(
    ctx: &mut SandboxContext,
    tok: &RootToken,
    op: DisableOp,
    path: &Path,
) -> Result<Outcome> {
    let apply: fn(&mut SandboxContext, &RootToken, &Path) -> Result<Outcome> = match op {
        DisableOp::Blacklist => return blacklist_cover(ctx, tok, path, false),
        DisableOp::BlacklistNolog => return blacklist_cover(ctx, tok, path, true),
        DisableOp::ReadOnly => remount_ro,
        DisableOp::ReadWrite => remount_rdwr,
        DisableOp::Noexec => remount_noexec,
        DisableOp::Tmpfs => tmpfs_cover,
    };

    ctx.last_disable = LastDisable::Fail;
    let Some(resolved) = ctx.ops().realpath(path)? else {
        log::debug!("{} does not exist, skipping", path.display());
        return Ok(Outcome::Skipped(Skip::Missing));
    };
    apply(ctx, tok, &resolved)
}

fn bind_self_and_remount(
    ctx: &SandboxContext,
    tok: &RootToken,
    path: &Path,
    flags: MsFlags,
    op: &'static str,
) -> Result<()> {
    let ops = ctx.ops();
    ops.bind(tok, path, path, MsFlags::MS_REC)
        .map_err(|e| relabel(e, op))?;
    ops.remount(tok, path, MsFlags::MS_BIND | MsFlags::MS_REC | flags)
        .map_err(|e| relabel(e, op))
}

/// Make `path` read-only. Mount failures are fatal.
pub fn remount_ro(ctx: &mut SandboxContext, tok: &RootToken, path: &Path) -> Result<Outcome> {
    if ctx.ops().stat(path).is_none() {
        return Ok(Outcome::Skipped(Skip::Missing));
    }
    bind_self_and_remount(ctx, tok, path, MsFlags::MS_RDONLY, "mount read-only")?;
    ctx.logger.record("read-only", &path.to_string_lossy());
    Ok(Outcome::Applied)
}

/// Like [`remount_ro`], but any failure is only a warning.
pub fn remount_ro_soft(ctx: &mut SandboxContext, tok: &RootToken, path: &Path) -> Outcome {
    if ctx.ops().stat(path).is_none() {
        return Outcome::Skipped(Skip::Missing);
    }
    match bind_self_and_remount(ctx, tok, path, MsFlags::MS_RDONLY, "mount read-only") {
        Ok(()) => {
            ctx.logger.record("read-only", &path.to_string_lossy());
            Outcome::Applied
        }
        Err(e) => {
            log::debug!("soft read-only remount failed: {}", e);
            ctx.warn(format!("cannot mount {} read-only", path.display()));
            Outcome::Skipped(Skip::Unresolvable)
        }
    }
}

/// Make `path` writable again. Non-root callers may only do this on paths
/// they own.
pub fn remount_rdwr(ctx: &mut SandboxContext, tok: &RootToken, path: &Path) -> Result<Outcome> {
    let Some(meta) = ctx.ops().stat(path) else {
        return Ok(Outcome::Skipped(Skip::Missing));
    };
    if !ctx.is_root_caller() && meta.uid != ctx.caller.uid {
        ctx.warn(format!(
            "you are not allowed to change {} to read-write",
            path.display()
        ));
        return Ok(Outcome::Skipped(Skip::NotOwner));
    }
    bind_self_and_remount(ctx, tok, path, MsFlags::empty(), "mount read-write")?;
    ctx.logger.record("read-write", &path.to_string_lossy());
    Ok(Outcome::Applied)
}

pub fn remount_noexec(ctx: &mut SandboxContext, tok: &RootToken, path: &Path) -> Result<Outcome> {
    if ctx.ops().stat(path).is_none() {
        return Ok(Outcome::Skipped(Skip::Missing));
    }
    bind_self_and_remount(
        ctx,
        tok,
        path,
        MsFlags::MS_NOEXEC | MsFlags::MS_NODEV | MsFlags::MS_NOSUID,
        "mount noexec",
    )?;
    ctx.logger.record("noexec", &path.to_string_lossy());
    Ok(Outcome::Applied)
}

/// Cover a directory with an empty tmpfs, keeping its owner and mode.
pub fn tmpfs_cover(ctx: &mut SandboxContext, tok: &RootToken, path: &Path) -> Result<Outcome> {
    ctx.last_disable = LastDisable::Fail;
    let Some(meta) = ctx.ops().stat(path) else {
        return Ok(Outcome::Skipped(Skip::Missing));
    };
    if !meta.is_dir() {
        ctx.warn(format!(
            "{} is not a directory; cannot mount a tmpfs on top of it.",
            path.display()
        ));
        return Ok(Outcome::Skipped(Skip::NotADirectory));
    }

    log::debug!("Mounting tmpfs on {}", path.display());
    let ops = ctx.ops();
    ops.mount(
        tok,
        Some(Path::new("tmpfs")),
        path,
        Some("tmpfs"),
        MsFlags::MS_NOSUID | MsFlags::MS_NODEV | MsFlags::MS_STRICTATIME | MsFlags::MS_REC,
        None,
    )
    .map_err(|e| relabel(e, "mounting tmpfs"))?;
    ops.chown(tok, path, meta.uid, meta.gid)?;
    ops.chmod(tok, path, meta.mode)?;

    ctx.last_disable = LastDisable::Success;
    ctx.logger.record("tmpfs", &path.to_string_lossy());
    Ok(Outcome::Applied)
}

fn is_system_bin(resolved: &Path) -> bool {
    resolved == Path::new("/bin") || resolved == Path::new("/usr/bin")
}

/// Shadow `path` with the matching empty sentinel.
pub fn blacklist_cover(
    ctx: &mut SandboxContext,
    tok: &RootToken,
    path: &Path,
    nolog: bool,
) -> Result<Outcome> {
    ctx.last_disable = LastDisable::Fail;
    let kind = if nolog { "blacklist-nolog" } else { "blacklist" };

    // a tmpfs rule on /run may have removed the sentinels
    let ops = Rc::clone(&ctx.ops);
    ctx.layout.build(ops.as_ref(), tok)?;

    let resolved = match ops.realpath(path) {
        Ok(Some(resolved)) => resolved,
        Ok(None) => return Ok(Outcome::Skipped(Skip::Missing)),
        Err(JailError::ResolutionDenied(_)) => return force_cover(ctx, tok, path, kind),
        Err(e) => return Err(e),
    };
    let Some(meta) = ops.stat(&resolved) else {
        log::debug!("{} does not exist, skipping", resolved.display());
        return Ok(Outcome::Skipped(Skip::Missing));
    };

    if is_system_bin(&resolved) && ops.is_symlink(path) && meta.is_dir() {
        ctx.warn(format!(
            "{} directory link was not blacklisted",
            path.display()
        ));
        return Ok(Outcome::Skipped(Skip::DirectoryLink));
    }

    let sentinel = if meta.is_dir() {
        ctx.layout.ro_dir.clone()
    } else {
        ctx.layout.ro_file.clone()
    };
    log::debug!("Disable {}", resolved.display());
    ops.mount(
        tok,
        Some(&sentinel),
        &resolved,
        Some("none"),
        MsFlags::MS_BIND,
        Some(SENTINEL_OPTIONS),
    )
    .map_err(|e| relabel(e, "disable file"))?;

    ctx.last_disable = LastDisable::Success;
    ctx.logger.record(kind, &resolved.to_string_lossy());
    Ok(Outcome::Applied)
}

/// Resolution was denied: try the directory sentinel, then the file
/// sentinel, on the unresolved path.
fn force_cover(
    ctx: &mut SandboxContext,
    tok: &RootToken,
    path: &Path,
    kind: &str,
) -> Result<Outcome> {
    log::debug!("no access to file {}, forcing mount", path.display());
    let ops = Rc::clone(&ctx.ops);
    let covered = [ctx.layout.ro_dir.clone(), ctx.layout.ro_file.clone()]
        .iter()
        .any(|sentinel| {
            ops.mount(
                tok,
                Some(sentinel),
                path,
                Some("none"),
                MsFlags::MS_BIND,
                Some(SENTINEL_OPTIONS),
            )
            .is_ok()
        });

    if !covered {
        log::debug!("{} is an invalid file, skipping", path.display());
        return Ok(Outcome::Skipped(Skip::Unresolvable));
    }
    ctx.last_disable = LastDisable::Success;
    ctx.logger.record(kind, &path.to_string_lossy());
    Ok(Outcome::Applied)
}

/// Bind `src` over `dst`, then give `dst` the owner and mode of `src`.
pub fn bind_over(ctx: &mut SandboxContext, tok: &RootToken, src: &Path, dst: &Path) -> Result<Outcome> {
    let ops = ctx.ops();
    let Some(src_meta) = ops.stat(src) else {
        return Err(JailError::TargetMissing(src.to_path_buf()));
    };
    if ops.stat(dst).is_none() {
        return Err(JailError::TargetMissing(dst.to_path_buf()));
    }

    ops.bind(tok, src, dst, MsFlags::MS_REC)
        .map_err(|e| relabel(e, "mount bind"))?;
    ops.chown(tok, dst, src_meta.uid, src_meta.gid)?;
    ops.chmod(tok, dst, src_meta.mode)?;
    log::debug!("bind {} on {}", src.display(), dst.display());
    Ok(Outcome::Applied)
}
