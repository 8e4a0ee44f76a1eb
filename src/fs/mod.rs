//! Sandbox filesystem construction.
//!
//! [`build_filesystem`] runs the whole build as effective root, in a fixed
//! order: run directory, root strategy, kernel filesystems, then the policy.
//! Any fatal error leaves the namespace half-built; the caller must not exec
//! the sandboxed program after a failure.

pub mod expand;
pub mod hooks;
pub mod kernelfs;
pub mod primitives;
pub mod profile;
pub mod root;
pub mod rundir;

pub use profile::{apply_policy, ApplyReport};
pub use rundir::RunLayout;

use crate::config::options::SandboxOptions;
use crate::config::policy::Policy;
use crate::config::types::Result;
use crate::context::SandboxContext;
use std::rc::Rc;

pub fn build_filesystem(
    ctx: &mut SandboxContext,
    opts: &SandboxOptions,
    policy: &Policy,
) -> Result<ApplyReport> {
    ctx.as_root(|ctx, tok| {
        let ops = Rc::clone(&ctx.ops);
        ctx.layout.build(ops.as_ref(), tok)?;
        ctx.layout.ensure_mnt_tmpfs(ops.as_ref(), tok)?;
        if ctx.config.stage_copy_tool {
            ctx.layout.stage_copy_tool(ops.as_ref(), tok)?;
        }

        root::build_root(ctx, tok, opts)?;

        let deferred = if ctx.config.remount_proc_sys {
            kernelfs::remount_proc_sys(ctx, tok)?
        } else {
            Vec::new()
        };
        if opts.private_tmp {
            kernelfs::private_tmp(ctx, tok)?;
        }

        let report = apply_policy(ctx, tok, &policy.with_appended(deferred))?;

        ctx.layout.remove_copy_tool(ops.as_ref(), tok)?;
        if ctx.config.fslogger {
            let file = ctx.layout.fslogger_file();
            ctx.logger.flush_to(&file)?;
        }
        log::info!("sandbox filesystem ready");
        Ok(report)
    })
}
