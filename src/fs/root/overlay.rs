//! Overlay root: an overlayfs with the host root as its lower layer,
//! entered with chroot.
//!
//! Kernels before 3.18 only ship the out-of-tree `overlayfs` type, which has
//! no work directory and cannot keep a persistent upper layer.

use super::finish_root;
use crate::config::options::{OverlayOptions, SandboxOptions};
use crate::config::types::{JailError, Result};
use crate::context::SandboxContext;
use crate::fs::rundir::relabel;
use crate::kernel::privileged::{PrivilegedOps, RootToken};
use nix::mount::MsFlags;
use std::fs::{self, DirBuilder, Permissions};
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::rc::Rc;

const X11_SOCKET_DIR: &str = "/tmp/.X11-unix";

/// Which overlay filesystem the running kernel provides
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverlayMode {
    /// `overlayfs`, kernels 3.x before 3.18
    Legacy,
    /// `overlay`, kernels 3.18 and later
    Modern,
}

impl OverlayMode {
    fn fstype(self) -> &'static str {
        match self {
            OverlayMode::Legacy => "overlayfs",
            OverlayMode::Modern => "overlay",
        }
    }
}

/// Leading `major.minor` of a kernel release string.
pub fn parse_kernel_version(release: &str) -> Result<(u32, u32)> {
    let mut parts = release.splitn(3, '.');
    let major = parts.next().and_then(|s| s.parse().ok());
    let minor = parts.next().and_then(|s| {
        let digits: String = s.chars().take_while(char::is_ascii_digit).collect();
        digits.parse().ok()
    });
    match (major, minor) {
        (Some(major), Some(minor)) => Ok((major, minor)),
        _ => Err(JailError::UnsupportedKernel(format!(
            "cannot extract Linux kernel version: {}",
            release
        ))),
    }
}

pub fn overlay_mode(release: &str) -> Result<OverlayMode> {
    let (major, minor) = parse_kernel_version(release)?;
    log::debug!("Linux kernel version {}.{}", major, minor);
    if major < 3 {
        return Err(JailError::UnsupportedKernel(
            "minimum kernel version required 3.x".to_string(),
        ));
    }
    if (major, minor) < (3, 18) {
        Ok(OverlayMode::Legacy)
    } else {
        Ok(OverlayMode::Modern)
    }
}

/// Resolve `~/.firejail/<name>` for a persistent overlay.
///
/// Runs with the caller's ids: `~/.firejail` is created 0700 when missing.
/// Symlinks are refused at both levels, and an existing overlay directory is
/// refused unless reuse is allowed.
pub fn overlay_dir(home: &Path, name: &str, allow_reuse: bool) -> Result<PathBuf> {
    let base = home.join(".firejail");
    match fs::symlink_metadata(&base) {
        Ok(meta) if meta.file_type().is_symlink() => {
            return Err(JailError::Config("invalid ~/.firejail directory".to_string()));
        }
        Ok(_) => {}
        Err(_) => {
            DirBuilder::new().mode(0o700).create(&base)?;
            fs::set_permissions(&base, Permissions::from_mode(0o700))?;
        }
    }

    let dir = base.join(name);
    match fs::symlink_metadata(&dir) {
        Ok(meta) if meta.file_type().is_symlink() => Err(JailError::Config(
            "overlay directory is a symbolic link".to_string(),
        )),
        Ok(_) if !allow_reuse => Err(JailError::Config(format!(
            "overlay directory already exists: {}",
            dir.display()
        ))),
        _ => Ok(dir),
    }
}

/// Overlay root for the running kernel.
pub fn overlay_root(
    ctx: &mut SandboxContext,
    tok: &RootToken,
    opts: &SandboxOptions,
    overlay: &OverlayOptions,
) -> Result<()> {
    let uts = nix::sys::utsname::uname()
        .map_err(|e| JailError::UnsupportedKernel(format!("uname failed: {}", e)))?;
    let release = uts.release().to_string_lossy().into_owned();
    overlay_root_for_release(ctx, tok, opts, overlay, &release)
}

pub fn overlay_root_for_release(
    ctx: &mut SandboxContext,
    tok: &RootToken,
    opts: &SandboxOptions,
    overlay: &OverlayOptions,
    release: &str,
) -> Result<()> {
    let mode = overlay_mode(release)?;
    if mode == OverlayMode::Legacy && overlay.persistent.is_some() {
        return Err(JailError::UnsupportedKernel(
            "option --overlay= not available for kernels older than 3.18".to_string(),
        ));
    }

    let ops = Rc::clone(&ctx.ops);
    let ops = ops.as_ref();
    ctx.layout.ensure_mnt_tmpfs(ops, tok)?;

    let oroot = ctx.layout.oroot();
    ops.mkdir(tok, &oroot, 0o755)?;
    ops.chown(tok, &oroot, 0, 0)?;
    ops.chmod(tok, &oroot, 0o755)?;

    let basedir = match &overlay.persistent {
        Some(dir) => {
            if ops.stat(dir).is_some() {
                if !overlay.reuse {
                    return Err(JailError::Config(
                        "overlay directory exists, but reuse is not allowed".to_string(),
                    ));
                }
            } else {
                ops.mkdir(tok, dir, 0o755).map_err(|e| {
                    log::debug!("mkdir {}: {}", dir.display(), e);
                    JailError::Config("cannot create overlay directory".to_string())
                })?;
            }
            dir.clone()
        }
        None => ctx.layout.mnt_dir.clone(),
    };

    let odiff = work_dir(ops, tok, &basedir.join("odiff"))?;
    let owork = work_dir(ops, tok, &basedir.join("owork"))?;

    log::debug!("Mounting OverlayFS");
    let options = match mode {
        OverlayMode::Legacy => format!("lowerdir=/,upperdir={}", odiff.display()),
        OverlayMode::Modern => format!(
            "lowerdir=/,upperdir={},workdir={}",
            odiff.display(),
            owork.display()
        ),
    };
    mount_overlay(ops, tok, mode, &oroot, &options).map_err(|e| relabel(e, "mounting overlayfs"))?;

    if mode == OverlayMode::Modern {
        // /home on its own mount is not part of the lower layer
        let overlay_home = PathBuf::from(format!("{}{}", oroot.display(), opts.home.display()));
        log::debug!(
            "overlay dirs: oroot {} odiff {} owork {}",
            oroot.display(),
            odiff.display(),
            owork.display()
        );
        if ops.stat(&overlay_home).is_none() {
            let hdiff = work_dir(ops, tok, &basedir.join("hdiff"))?;
            let hwork = work_dir(ops, tok, &basedir.join("hwork"))?;
            let options = format!(
                "lowerdir=/home,upperdir={},workdir={}",
                hdiff.display(),
                hwork.display()
            );
            mount_overlay(ops, tok, mode, &oroot.join("home"), &options)
                .map_err(|e| relabel(e, "mounting overlayfs for mounted home directory"))?;
            log::info!("OverlayFS for /home configured in {} directory", basedir.display());
        }
    }
    log::info!("OverlayFS configured in {} directory", basedir.display());

    for dir in ["/dev", "/run"] {
        log::debug!("Mounting {}", dir);
        ops.bind(tok, Path::new(dir), &oroot.join(&dir[1..]), MsFlags::MS_REC)
            .map_err(|e| relabel(e, if dir == "/dev" { "mounting /dev" } else { "mounting /run" }))?;
        ctx.logger.record("whitelist", dir);
    }

    let x11 = Path::new(X11_SOCKET_DIR);
    if ops.stat(x11).is_some() {
        log::debug!("Mounting {}", X11_SOCKET_DIR);
        match ops.bind(tok, x11, &oroot.join("tmp/.X11-unix"), MsFlags::MS_REC) {
            Ok(()) => ctx.logger.record("whitelist", X11_SOCKET_DIR),
            Err(e) => {
                log::debug!("x11 bind failed: {}", e);
                ctx.warn("cannot mount /tmp/.X11-unix in overlay");
            }
        }
    }

    ops.chroot(tok, &oroot)?;
    finish_root(ctx, tok, opts)
}

fn mount_overlay(
    ops: &dyn PrivilegedOps,
    tok: &RootToken,
    mode: OverlayMode,
    target: &Path,
    options: &str,
) -> Result<()> {
    let fstype = mode.fstype();
    ops.mount(
        tok,
        Some(Path::new(fstype)),
        target,
        Some(fstype),
        MsFlags::empty(),
        Some(options),
    )
}

/// Upper or work directory: created if missing, always root-owned 0755.
fn work_dir(ops: &dyn PrivilegedOps, tok: &RootToken, dir: &Path) -> Result<PathBuf> {
    if ops.stat(dir).is_none() {
        ops.mkdir(tok, dir, 0o755)?;
    }
    ops.chown(tok, dir, 0, 0)?;
    ops.chmod(tok, dir, 0o755)?;
    Ok(dir.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JailConfig;
    use crate::observability::MemoryLog;
    use crate::testing::{RecordingHooks, RecordingOps};

    struct Fixture {
        _tmp: tempfile::TempDir,
        root: PathBuf,
        ops: Rc<RecordingOps>,
        hooks: RecordingHooks,
        ctx: SandboxContext,
    }

    fn fixture(uid: u32) -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let root = fs::canonicalize(tmp.path()).unwrap();
        fs::create_dir_all(root.join("run/firejail")).unwrap();
        let ops = Rc::new(RecordingOps::new(uid, uid));
        let hooks = RecordingHooks::new();
        let config = JailConfig {
            run_base: root.join("run/firejail"),
            ..JailConfig::default()
        };
        let ctx = SandboxContext::new(ops.clone(), config)
            .with_logger(Box::new(MemoryLog::new()))
            .with_hooks(Box::new(hooks.clone()));
        Fixture { _tmp: tmp, root, ops, hooks, ctx }
    }

    fn options(root: &Path) -> SandboxOptions {
        SandboxOptions {
            home: root.join("home/u"),
            ..SandboxOptions::default()
        }
    }

    #[test]
    fn kernel_versions_parse() {
        assert_eq!(parse_kernel_version("5.15.0-91-generic").unwrap(), (5, 15));
        assert_eq!(parse_kernel_version("3.18").unwrap(), (3, 18));
        assert_eq!(parse_kernel_version("4.4-rc1").unwrap(), (4, 4));
        assert!(parse_kernel_version("linux").is_err());
    }

    #[test]
    fn mode_follows_kernel_version() {
        assert_eq!(overlay_mode("3.13.0-24").unwrap(), OverlayMode::Legacy);
        assert_eq!(overlay_mode("3.18.1").unwrap(), OverlayMode::Modern);
        assert_eq!(overlay_mode("6.1.0").unwrap(), OverlayMode::Modern);
        assert!(matches!(overlay_mode("2.6.32"), Err(JailError::UnsupportedKernel(_))));
    }

    #[test]
    fn modern_overlay_mounts_root_home_and_binds() {
        let mut fx = fixture(1000);
        let opts = options(&fx.root);
        fx.ctx
            .as_root(|ctx, tok| {
                overlay_root_for_release(ctx, tok, &opts, &OverlayOptions::default(), "5.10.0")
            })
            .unwrap();

        let mnt = fx.ctx.layout.mnt_dir.clone();
        let oroot = fx.ctx.layout.oroot();
        let root_mount = &fx.ops.mounts_on(&oroot)[0];
        assert_eq!(root_mount.fstype.as_deref(), Some("overlay"));
        assert_eq!(
            root_mount.data.as_deref(),
            Some(
                format!(
                    "lowerdir=/,upperdir={},workdir={}",
                    mnt.join("odiff").display(),
                    mnt.join("owork").display()
                )
                .as_str()
            )
        );

        let home_mount = &fx.ops.mounts_on(&oroot.join("home"))[0];
        assert!(home_mount.data.as_deref().unwrap().starts_with("lowerdir=/home,"));
        assert!(fx.ops.stat(&mnt.join("hdiff")).is_some());

        let dev = &fx.ops.mounts_on(&oroot.join("dev"))[0];
        assert!(dev.is_bind());
        assert_eq!(fx.ops.chroots(), vec![oroot]);
        assert_eq!(fx.hooks.calls().len(), 8);
        let odiff = fx.ops.stat(&mnt.join("odiff")).unwrap();
        assert_eq!((odiff.uid, odiff.mode), (0, 0o755));
    }

    #[test]
    fn legacy_overlay_has_no_workdir() {
        let mut fx = fixture(0);
        let opts = options(&fx.root);
        fx.ctx
            .as_root(|ctx, tok| {
                overlay_root_for_release(ctx, tok, &opts, &OverlayOptions::default(), "3.13.0")
            })
            .unwrap();
        let oroot = fx.ctx.layout.oroot();
        let mount = &fx.ops.mounts_on(&oroot)[0];
        assert_eq!(mount.fstype.as_deref(), Some("overlayfs"));
        assert!(!mount.data.as_deref().unwrap().contains("workdir"));
        assert!(fx.ops.mounts_on(&oroot.join("home")).is_empty());
    }

    #[test]
    fn legacy_kernel_rejects_persistent_overlay() {
        let mut fx = fixture(0);
        let opts = options(&fx.root);
        let overlay = OverlayOptions {
            persistent: Some(fx.root.join("keep")),
            reuse: false,
        };
        let err = fx
            .ctx
            .as_root(|ctx, tok| overlay_root_for_release(ctx, tok, &opts, &overlay, "3.10.0"))
            .unwrap_err();
        assert!(matches!(err, JailError::UnsupportedKernel(_)));
        assert!(fx.ops.mounts().is_empty());
    }

    #[test]
    fn existing_persistent_dir_needs_reuse() {
        let mut fx = fixture(0);
        let opts = options(&fx.root);
        let keep = fx.root.join("keep");
        fs::create_dir(&keep).unwrap();
        let overlay = OverlayOptions {
            persistent: Some(keep.clone()),
            reuse: false,
        };
        let err = fx
            .ctx
            .as_root(|ctx, tok| overlay_root_for_release(ctx, tok, &opts, &overlay, "5.4.0"))
            .unwrap_err();
        assert!(err.to_string().contains("reuse is not allowed"));
    }

    #[test]
    fn persistent_dir_holds_upper_layer() {
        let mut fx = fixture(0);
        let opts = options(&fx.root);
        let keep = fx.root.join("keep");
        let overlay = OverlayOptions {
            persistent: Some(keep.clone()),
            reuse: false,
        };
        fx.ctx
            .as_root(|ctx, tok| overlay_root_for_release(ctx, tok, &opts, &overlay, "5.4.0"))
            .unwrap();
        assert!(fx.ops.stat(&keep.join("odiff")).is_some());
        assert!(fx.ops.stat(&keep.join("owork")).is_some());
    }

    #[test]
    fn overlay_dir_is_created_private() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = overlay_dir(tmp.path(), "work", false).unwrap();
        assert_eq!(dir, tmp.path().join(".firejail/work"));
        let mode = fs::metadata(tmp.path().join(".firejail")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);

        fs::create_dir(&dir).unwrap();
        assert!(overlay_dir(tmp.path(), "work", false).is_err());
        assert_eq!(overlay_dir(tmp.path(), "work", true).unwrap(), dir);
    }

    #[test]
    fn overlay_dir_refuses_symlinks() {
        let tmp = tempfile::tempdir().unwrap();
        let elsewhere = tmp.path().join("elsewhere");
        fs::create_dir(&elsewhere).unwrap();
        std::os::unix::fs::symlink(&elsewhere, tmp.path().join(".firejail")).unwrap();
        let err = overlay_dir(tmp.path(), "work", true).unwrap_err();
        assert!(err.to_string().contains("invalid ~/.firejail directory"));

        fs::remove_file(tmp.path().join(".firejail")).unwrap();
        fs::create_dir(tmp.path().join(".firejail")).unwrap();
        std::os::unix::fs::symlink(&elsewhere, tmp.path().join(".firejail/work")).unwrap();
        assert!(overlay_dir(tmp.path(), "work", true).is_err());
    }
}
