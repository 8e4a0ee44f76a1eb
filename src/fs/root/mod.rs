//! Root staging strategies.
//!
//! Exactly one strategy runs per sandbox. All of them end the same way: the
//! collaborator hooks run, and for non-root callers the firejail
//! configuration and runtime directories are hidden.

mod basic;
mod chroot;
mod overlay;

pub use basic::{basic_root, SYSTEM_DIRS};
pub use chroot::{check_chroot_dir, chroot_root};
pub use overlay::{
    overlay_dir, overlay_mode, overlay_root, overlay_root_for_release, parse_kernel_version,
    OverlayMode,
};

use crate::config::options::{RootStrategy, SandboxOptions};
use crate::config::types::{JailError, Result};
use crate::context::SandboxContext;
use crate::fs::hooks::{FsHook, STANDARD_HOOKS};
use crate::fs::primitives::blacklist_cover;
use crate::kernel::privileged::RootToken;
use std::path::{Path, PathBuf};

/// Stage the sandbox root with the strategy named in `opts`.
pub fn build_root(ctx: &mut SandboxContext, tok: &RootToken, opts: &SandboxOptions) -> Result<()> {
    match &opts.strategy {
        RootStrategy::Basic => basic_root(ctx, tok, opts),
        RootStrategy::Overlay(overlay) => {
            if !ctx.config.overlayfs {
                return Err(JailError::Config(
                    "overlayfs feature is disabled in firejail configuration file".to_string(),
                ));
            }
            overlay_root(ctx, tok, opts, overlay)
        }
        RootStrategy::Chroot(dir) => {
            if !ctx.config.chroot {
                return Err(JailError::Config(
                    "chroot feature is disabled in firejail configuration file".to_string(),
                ));
            }
            chroot_root(ctx, tok, opts, dir)
        }
    }
}

/// Run the hooks and, for non-root callers, hide the firejail config.
pub(crate) fn finish_root(
    ctx: &mut SandboxContext,
    tok: &RootToken,
    opts: &SandboxOptions,
) -> Result<()> {
    for hook in STANDARD_HOOKS {
        if hook == FsHook::DevShm && opts.private_dev {
            continue;
        }
        ctx.hooks.run(hook)?;
    }

    // root keeps its config so sandboxes can be chained
    if !ctx.is_root_caller() {
        disable_config(ctx, tok, &opts.home)?;
    }
    Ok(())
}

/// Blacklist `~/.config/firejail` and the runtime directories that exist.
pub fn disable_config(ctx: &mut SandboxContext, tok: &RootToken, home: &Path) -> Result<()> {
    let targets: [PathBuf; 5] = [
        home.join(".config/firejail"),
        ctx.layout.network_dir.clone(),
        ctx.layout.bandwidth_dir.clone(),
        ctx.layout.name_dir.clone(),
        ctx.layout.x11_dir.clone(),
    ];
    for path in targets {
        if ctx.ops().stat(&path).is_some() {
            blacklist_cover(ctx, tok, &path, false)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::options::OverlayOptions;
    use crate::config::JailConfig;
    use crate::observability::MemoryLog;
    use crate::testing::{RecordingHooks, RecordingOps};
    use std::fs;
    use std::rc::Rc;

    fn context(root: &Path, uid: u32, config: JailConfig) -> (Rc<RecordingOps>, RecordingHooks, SandboxContext) {
        fs::create_dir_all(root.join("run")).unwrap();
        let ops = Rc::new(RecordingOps::new(uid, uid));
        let hooks = RecordingHooks::new();
        let config = JailConfig {
            run_base: root.join("run/firejail"),
            ..config
        };
        let ctx = SandboxContext::new(ops.clone(), config)
            .with_logger(Box::new(MemoryLog::new()))
            .with_hooks(Box::new(hooks.clone()));
        (ops, hooks, ctx)
    }

    #[test]
    fn disabled_strategies_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let root = fs::canonicalize(tmp.path()).unwrap();
        let config = JailConfig {
            overlayfs: false,
            chroot: false,
            ..JailConfig::default()
        };
        let (ops, _hooks, mut ctx) = context(&root, 0, config);

        for strategy in [
            RootStrategy::Overlay(OverlayOptions::default()),
            RootStrategy::Chroot(root.join("jail")),
        ] {
            let opts = SandboxOptions {
                home: root.clone(),
                strategy,
                ..SandboxOptions::default()
            };
            let err = ctx.as_root(|ctx, tok| build_root(ctx, tok, &opts)).unwrap_err();
            assert!(matches!(err, JailError::Config(_)));
        }
        assert!(ops.mounts().is_empty());
    }

    #[test]
    fn private_dev_skips_dev_shm_hook() {
        let tmp = tempfile::tempdir().unwrap();
        let root = fs::canonicalize(tmp.path()).unwrap();
        let (_ops, hooks, mut ctx) = context(&root, 0, JailConfig::default());
        let opts = SandboxOptions {
            home: root.clone(),
            private_dev: true,
            ..SandboxOptions::default()
        };

        ctx.as_root(|ctx, tok| finish_root(ctx, tok, &opts)).unwrap();
        let calls = hooks.calls();
        assert_eq!(calls.len(), STANDARD_HOOKS.len() - 1);
        assert_eq!(calls[0], FsHook::VarLock);
        assert_eq!(calls.last(), Some(&FsHook::RestrictUsers));
    }

    #[test]
    fn config_is_hidden_from_regular_users() {
        let tmp = tempfile::tempdir().unwrap();
        let root = fs::canonicalize(tmp.path()).unwrap();
        let home = root.join("home");
        fs::create_dir_all(home.join(".config/firejail")).unwrap();
        let (ops, _hooks, mut ctx) = context(&root, 1000, JailConfig::default());
        let opts = SandboxOptions {
            home: home.clone(),
            ..SandboxOptions::default()
        };

        ctx.as_root(|ctx, tok| {
            let ops = Rc::clone(&ctx.ops);
            ctx.layout.build(ops.as_ref(), tok)?;
            finish_root(ctx, tok, &opts)
        })
        .unwrap();

        assert_eq!(ops.mounts_on(&home.join(".config/firejail")).len(), 1);
        assert_eq!(ops.mounts_on(&ctx.layout.network_dir).len(), 1);
        assert_eq!(ops.mounts_on(&ctx.layout.x11_dir).len(), 1);
    }

    #[test]
    fn root_caller_keeps_config_visible() {
        let tmp = tempfile::tempdir().unwrap();
        let root = fs::canonicalize(tmp.path()).unwrap();
        let (ops, _hooks, mut ctx) = context(&root, 0, JailConfig::default());
        let opts = SandboxOptions {
            home: root.clone(),
            ..SandboxOptions::default()
        };
        ctx.as_root(|ctx, tok| finish_root(ctx, tok, &opts)).unwrap();
        assert!(ops.mounts().is_empty());
    }
}
