/// Chroot root: enter a caller-supplied root tree
use super::finish_root;
use crate::config::options::SandboxOptions;
use crate::config::types::{JailError, Result};
use crate::context::SandboxContext;
use crate::fs::rundir::relabel;
use crate::kernel::privileged::{PrivilegedOps, RootToken};
use nix::mount::MsFlags;
use std::path::Path;
use std::rc::Rc;

const X11_ENV: &str = "FIREJAIL_X11";
const HOST_RESOLV_CONF: &str = "/etc/resolv.conf";

/// Validate a chroot tree before entering it.
///
/// The tree must be root-owned and hold `/dev`, `/var/tmp`, `/proc` and
/// `/tmp`; with `require_x11` it must also hold `/tmp/.X11-unix`.
pub fn check_chroot_dir(ops: &dyn PrivilegedOps, rootdir: &Path, require_x11: bool) -> Result<()> {
    let Some(meta) = ops.stat(rootdir) else {
        return Err(JailError::Config("cannot find chroot directory".to_string()));
    };
    if meta.uid != 0 {
        return Err(JailError::Config(
            "chroot directory should be owned by root".to_string(),
        ));
    }

    let mut required = vec!["dev", "var/tmp", "proc", "tmp"];
    if require_x11 {
        required.push("tmp/.X11-unix");
    }
    for sub in required {
        if ops.stat(&rootdir.join(sub)).is_none() {
            return Err(JailError::Config(format!(
                "cannot find /{} in chroot directory",
                sub
            )));
        }
    }
    Ok(())
}

pub fn chroot_root(
    ctx: &mut SandboxContext,
    tok: &RootToken,
    opts: &SandboxOptions,
    rootdir: &Path,
) -> Result<()> {
    let ops = Rc::clone(&ctx.ops);
    let ops = ops.as_ref();
    let require_x11 = std::env::var_os(X11_ENV).is_some();
    check_chroot_dir(ops, rootdir, require_x11)?;

    if ctx.config.chroot_desktop {
        prepare_desktop(ctx, ops, tok, rootdir, require_x11)?;
    }

    log::debug!("Chrooting into {}", rootdir.display());
    ops.chroot(tok, rootdir)?;
    // the mnt tmpfs stayed behind in the old root
    ctx.layout.reset_for_chroot(ops, tok)?;

    if ctx.config.chroot_desktop {
        finish_root(ctx, tok, opts)?;
    }
    Ok(())
}

fn prepare_desktop(
    ctx: &mut SandboxContext,
    ops: &dyn PrivilegedOps,
    tok: &RootToken,
    rootdir: &Path,
    require_x11: bool,
) -> Result<()> {
    let newdev = rootdir.join("dev");
    log::debug!("Mounting /dev on {}", newdev.display());
    ops.bind(tok, Path::new("/dev"), &newdev, MsFlags::MS_REC)
        .map_err(|e| relabel(e, "mounting /dev"))?;

    if require_x11 {
        let newx11 = rootdir.join("tmp/.X11-unix");
        log::debug!("Mounting /tmp/.X11-unix on {}", newx11.display());
        ops.bind(tok, Path::new("/tmp/.X11-unix"), &newx11, MsFlags::MS_REC)
            .map_err(|e| relabel(e, "mounting /tmp/.X11-unix"))?;
    }

    // older distributions have no /run; problems here are left to the user
    let rundir = rootdir.join("run");
    if !ops.is_dir(&rundir) {
        if let Err(e) = ops.mkdir(tok, &rundir, 0o755).and_then(|()| ops.chown(tok, &rundir, 0, 0)) {
            log::debug!("cannot create {}: {}", rundir.display(), e);
        }
    }

    let resolv = rootdir.join("etc/resolv.conf");
    log::debug!("Updating /etc/resolv.conf in {}", resolv.display());
    if ops.is_symlink(&resolv) {
        return Err(JailError::MissingHostAsset(format!(
            "invalid {} file",
            resolv.display()
        )));
    }
    if let Err(e) = ops.copy_file(tok, Path::new(HOST_RESOLV_CONF), &resolv, 0, 0, 0o644) {
        log::debug!("copy {}: {}", HOST_RESOLV_CONF, e);
        ctx.warn("/etc/resolv.conf not initialized");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JailConfig;
    use crate::observability::MemoryLog;
    use crate::testing::{RecordingHooks, RecordingOps};
    use serial_test::serial;
    use std::fs;
    use std::path::PathBuf;

    struct Fixture {
        _tmp: tempfile::TempDir,
        jail: PathBuf,
        ops: Rc<RecordingOps>,
        hooks: RecordingHooks,
        ctx: SandboxContext,
    }

    fn fixture(chroot_desktop: bool) -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let root = fs::canonicalize(tmp.path()).unwrap();
        fs::create_dir(root.join("run")).unwrap();
        let jail = root.join("jail");
        for sub in ["dev", "var/tmp", "proc", "tmp", "etc"] {
            fs::create_dir_all(jail.join(sub)).unwrap();
        }
        let ops = Rc::new(RecordingOps::new(1000, 1000));
        ops.set_owner(&jail, 0, 0);
        let hooks = RecordingHooks::new();
        let config = JailConfig {
            run_base: root.join("run/firejail"),
            chroot_desktop,
            ..JailConfig::default()
        };
        let ctx = SandboxContext::new(ops.clone(), config)
            .with_logger(Box::new(MemoryLog::new()))
            .with_hooks(Box::new(hooks.clone()));
        Fixture { _tmp: tmp, jail, ops, hooks, ctx }
    }

    fn options(jail: &Path) -> SandboxOptions {
        SandboxOptions {
            home: jail.join("home/u"),
            ..SandboxOptions::default()
        }
    }

    #[test]
    fn tree_must_be_root_owned() {
        let fx = fixture(true);
        fx.ops.set_owner(&fx.jail, 1000, 1000);
        let err = check_chroot_dir(fx.ops.as_ref(), &fx.jail, false).unwrap_err();
        assert!(err.to_string().contains("owned by root"));
    }

    #[test]
    fn tree_must_hold_required_directories() {
        let fx = fixture(true);
        check_chroot_dir(fx.ops.as_ref(), &fx.jail, false).unwrap();

        let err = check_chroot_dir(fx.ops.as_ref(), &fx.jail, true).unwrap_err();
        assert!(err.to_string().contains("/tmp/.X11-unix"));

        fs::remove_dir(fx.jail.join("var/tmp")).unwrap();
        let err = check_chroot_dir(fx.ops.as_ref(), &fx.jail, false).unwrap_err();
        assert!(err.to_string().contains("/var/tmp"));
    }

    #[test]
    #[serial]
    fn desktop_chroot_binds_dev_and_copies_resolv_conf() {
        std::env::remove_var(X11_ENV);
        let mut fx = fixture(true);
        let opts = options(&fx.jail);
        let jail = fx.jail.clone();
        fx.ctx.as_root(|ctx, tok| chroot_root(ctx, tok, &opts, &jail)).unwrap();

        assert!(fx.ops.mounts_on(&jail.join("dev"))[0].is_bind());
        assert!(jail.join("run").is_dir());
        let copied = jail.join("etc/resolv.conf").exists();
        let warned = fx.ctx.warnings().iter().any(|w| w.contains("not initialized"));
        assert!(copied || warned);
        assert_eq!(fx.ops.chroots(), vec![jail]);
        // mnt tmpfs rebuilt after the chroot
        assert_eq!(fx.ops.mounts_on(&fx.ctx.layout.mnt_dir).len(), 1);
        assert_eq!(fx.hooks.calls().len(), 8);
    }

    #[test]
    #[serial]
    fn plain_chroot_skips_desktop_steps() {
        std::env::remove_var(X11_ENV);
        let mut fx = fixture(false);
        let opts = options(&fx.jail);
        let jail = fx.jail.clone();
        fx.ctx.as_root(|ctx, tok| chroot_root(ctx, tok, &opts, &jail)).unwrap();

        assert!(fx.ops.mounts_on(&jail.join("dev")).is_empty());
        assert!(fx.hooks.calls().is_empty());
        assert_eq!(fx.ops.chroots().len(), 1);
    }

    #[test]
    #[serial]
    fn symlinked_resolv_conf_is_fatal() {
        std::env::remove_var(X11_ENV);
        let mut fx = fixture(true);
        std::os::unix::fs::symlink("/etc/hostname", fx.jail.join("etc/resolv.conf")).unwrap();
        let opts = options(&fx.jail);
        let jail = fx.jail.clone();
        let err = fx
            .ctx
            .as_root(|ctx, tok| chroot_root(ctx, tok, &opts, &jail))
            .unwrap_err();
        assert!(matches!(err, JailError::MissingHostAsset(_)));
        assert!(fx.ops.chroots().is_empty());
    }
}
