//! Kernel filesystem hardening inside the new mount namespace.

use crate::config::policy::{Rule, RuleKind};
use crate::config::types::Result;
use crate::context::SandboxContext;
use crate::fs::primitives::blacklist_cover;
use crate::fs::rundir::relabel;
use crate::kernel::privileged::RootToken;
use nix::mount::MsFlags;
use std::path::Path;
use std::rc::Rc;

/// Kernel interfaces hidden from every sandbox
pub const KERNEL_BLACKLIST: [&str; 27] = [
    "/sys/firmware",
    "/sys/hypervisor",
    "/sys/module",
    "/sys/power",
    "/sys/kernel/debug",
    "/sys/kernel/vmcoreinfo",
    "/sys/kernel/uevent_helper",
    "/proc/sys/security",
    "/proc/sys/efi/vars",
    "/proc/sys/fs/binfmt_misc",
    "/proc/sys/kernel/core_pattern",
    "/proc/sys/kernel/modprobe",
    "/proc/sysrq-trigger",
    "/proc/sys/kernel/hotplug",
    "/proc/sys/vm/panic_on_oom",
    "/proc/irq",
    "/proc/bus",
    "/proc/config.gz",
    "/proc/sched_debug",
    "/proc/timer_list",
    "/proc/timer_stats",
    "/proc/kcore",
    "/proc/kallsyms",
    "/proc/mem",
    "/proc/kmem",
    "/selinux",
    "/dev/port",
];

/// Kernel symbol and debug information, kept when debuggers are allowed
pub const DEBUG_BLACKLIST: [&str; 4] = ["/usr/src/linux", "/lib/modules", "/usr/lib/debug", "/boot"];

/// Kernel log devices, hidden from non-root callers
pub const KMSG_BLACKLIST: [&str; 2] = ["/dev/kmsg", "/proc/kmsg"];

/// Remount /proc and /sys and hide the kernel-sensitive paths.
///
/// Returns the rules to run after the policy's own rules, so that a
/// `noblacklist` in the policy can still exempt them.
pub fn remount_proc_sys(ctx: &mut SandboxContext, tok: &RootToken) -> Result<Vec<Rule>> {
    let ops = Rc::clone(&ctx.ops);
    let ops = ops.as_ref();

    log::debug!("Remounting /proc and /proc/sys filesystems");
    ops.mount(
        tok,
        Some(Path::new("proc")),
        Path::new("/proc"),
        Some("proc"),
        MsFlags::MS_NOSUID | MsFlags::MS_NOEXEC | MsFlags::MS_NODEV | MsFlags::MS_REC,
        None,
    )
    .map_err(|e| relabel(e, "mounting /proc"))?;
    ctx.logger.record("remount", "/proc");

    let proc_sys = Path::new("/proc/sys");
    ops.bind(tok, proc_sys, proc_sys, MsFlags::MS_REC)
        .map_err(|e| relabel(e, "mounting /proc/sys"))?;
    ops.remount(tok, proc_sys, MsFlags::MS_BIND | MsFlags::MS_RDONLY | MsFlags::MS_REC)
        .map_err(|e| relabel(e, "mounting /proc/sys"))?;
    ctx.logger.record("read-only", "/proc/sys");

    // a fresh sysfs describes the sandbox's network namespace
    log::debug!("Remounting /sys directory");
    let sys = Path::new("/sys");
    if let Err(e) = ops.umount_detach(tok, sys) {
        log::debug!("umount /sys: {}", e);
        ctx.warn("failed to unmount /sys");
    } else {
        let mounted = ops.mount(
            tok,
            Some(Path::new("sysfs")),
            sys,
            Some("sysfs"),
            MsFlags::MS_RDONLY
                | MsFlags::MS_NOSUID
                | MsFlags::MS_NOEXEC
                | MsFlags::MS_NODEV
                | MsFlags::MS_REC,
            None,
        );
        match mounted {
            Ok(()) => ctx.logger.record("remount", "/sys"),
            Err(e) => {
                log::debug!("mount sysfs: {}", e);
                ctx.warn("failed to mount /sys");
            }
        }
    }

    let mut hidden: Vec<&str> = KERNEL_BLACKLIST.to_vec();
    if !ctx.config.allow_debuggers {
        hidden.extend(DEBUG_BLACKLIST);
    }
    if !ctx.is_root_caller() {
        hidden.extend(KMSG_BLACKLIST);
    }
    for path in hidden {
        blacklist_cover(ctx, tok, Path::new(path), false)?;
    }

    Ok(vec![Rule::new(RuleKind::Blacklist, "/sys/fs")])
}

/// Give the sandbox an empty, world-writable /tmp.
pub fn private_tmp(ctx: &mut SandboxContext, tok: &RootToken) -> Result<()> {
    log::debug!("Mounting tmpfs on /tmp directory");
    ctx.ops()
        .mount(
            tok,
            Some(Path::new("tmpfs")),
            Path::new("/tmp"),
            Some("tmpfs"),
            MsFlags::MS_NOSUID | MsFlags::MS_STRICTATIME | MsFlags::MS_REC,
            Some("mode=1777,gid=0"),
        )
        .map_err(|e| relabel(e, "mounting tmpfs on /tmp directory"))?;
    ctx.logger.record("tmpfs", "/tmp");
    Ok(())
}
