/// Read-only remount of the host's system directories in place
use super::finish_root;
use crate::config::options::SandboxOptions;
use crate::config::types::Result;
use crate::context::SandboxContext;
use crate::fs::primitives::{remount_noexec, remount_ro};
use crate::kernel::privileged::RootToken;
use std::path::Path;
use std::rc::Rc;

/// Always remounted read-only, in this order
pub const SYSTEM_DIRS: [&str; 7] = ["/bin", "/sbin", "/lib", "/lib64", "/lib32", "/libx32", "/usr"];

pub fn basic_root(ctx: &mut SandboxContext, tok: &RootToken, opts: &SandboxOptions) -> Result<()> {
    let ops = Rc::clone(&ctx.ops);
    ctx.layout.build(ops.as_ref(), tok)?;

    let restricted = !ctx.is_root_caller();
    for (writable, dir) in [(opts.writable_etc, "/etc"), (opts.writable_var, "/var")] {
        if writable {
            log::debug!("leaving {} writable", dir);
            continue;
        }
        remount_ro(ctx, tok, Path::new(dir))?;
        if restricted {
            remount_noexec(ctx, tok, Path::new(dir))?;
        }
    }

    log::debug!("Mounting read-only {}", SYSTEM_DIRS.join(", "));
    for dir in SYSTEM_DIRS {
        remount_ro(ctx, tok, Path::new(dir))?;
    }

    finish_root(ctx, tok, opts)
}
