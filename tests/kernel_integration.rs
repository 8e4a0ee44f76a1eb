//! Integration tests for the live kernel backend
//!
//! Only read-only queries and operations that are safe for an unprivileged
//! test runner are exercised. Anything mutating is gated on effective root.

use firejail_core::kernel::capabilities::{
    bounding_mask_from_status, in_bounding_set, install_bounding_set,
};
use firejail_core::kernel::namespace::{ns_path, user_namespace_supported, NsKind};
use firejail_core::kernel::privileged::{as_root, as_user, KernelOps, PrivilegedOps};
use firejail_core::testing::parse_mountinfo;
use std::fs;
use std::path::Path;

#[test]
fn caller_reports_real_ids() {
    let ops = KernelOps::new();
    let caller = ops.caller();
    assert_eq!(caller.uid, nix::unistd::getuid().as_raw());
    assert_eq!(caller.gid, nix::unistd::getgid().as_raw());
}

#[test]
fn bounding_set_matches_status_line() {
    let status = fs::read_to_string("/proc/self/status").unwrap();
    let Some(mask) = bounding_mask_from_status(&status) else {
        eprintln!("skipping: no CapBnd line in /proc/self/status");
        return;
    };
    for cap in [0u32, 12, 21] {
        assert_eq!(in_bounding_set(cap), mask & (1u64 << cap) != 0, "cap {}", cap);
    }
}

/// CAP_SETPCAP in the effective set of the calling thread
fn can_drop_caps() -> bool {
    fs::read_to_string("/proc/thread-self/status")
        .ok()
        .and_then(|status| {
            status
                .lines()
                .find_map(|l| l.strip_prefix("CapEff:"))
                .and_then(|v| u64::from_str_radix(v.trim(), 16).ok())
        })
        .is_some_and(|eff| eff & (1 << 8) != 0)
}

#[test]
fn installed_bounding_set_is_what_the_kernel_reports() {
    if !nix::unistd::geteuid().is_root() || !can_drop_caps() {
        eprintln!("skipping: requires root with CAP_SETPCAP");
        return;
    }
    // the bounding set is per thread, so the drop stays inside this one
    let outcome = std::thread::spawn(|| {
        let read = || {
            let status = fs::read_to_string("/proc/thread-self/status").unwrap();
            bounding_mask_from_status(&status).unwrap()
        };
        let before = read();
        // CAP_SYS_BOOT and CAP_MKNOD
        let mask = before & !((1u64 << 22) | (1u64 << 27));
        install_bounding_set(mask).unwrap();
        (mask, read(), in_bounding_set(22), in_bounding_set(27))
    })
    .join()
    .unwrap();

    let (mask, after, boot, mknod) = outcome;
    assert_eq!(after, mask);
    assert!(!boot && !mknod);
}

#[test]
fn own_namespaces_are_visible() {
    let proc = Path::new("/proc");
    let me = std::process::id() as i32;
    assert!(ns_path(proc, me, NsKind::Mnt).exists());
    let expected = proc.join("self/ns/user").exists()
        && proc.join("self/uid_map").exists()
        && proc.join("self/gid_map").exists();
    assert_eq!(user_namespace_supported(proc), expected);
}

#[test]
fn unprivileged_caller_cannot_become_root() {
    if nix::unistd::geteuid().is_root() {
        eprintln!("skipping: running as root");
        return;
    }
    let ops = KernelOps::new();
    assert!(as_root(&ops, |_tok| Ok(())).is_err());
    assert_eq!(nix::unistd::geteuid().as_raw(), ops.caller().uid);
}

#[test]
fn root_switch_restores_effective_ids() {
    if !nix::unistd::geteuid().is_root() {
        eprintln!("skipping: requires root");
        return;
    }
    let ops = KernelOps::new();
    let before = (nix::unistd::geteuid(), nix::unistd::getegid());
    as_root(&ops, |_tok| {
        assert!(nix::unistd::geteuid().is_root());
        as_user(&ops, || Ok(()))
    })
    .unwrap();
    assert_eq!((nix::unistd::geteuid(), nix::unistd::getegid()), before);
}

#[test]
fn host_mount_table_parses() {
    let entries = parse_mountinfo(Path::new("/proc/self/mountinfo")).unwrap();
    assert!(entries.iter().any(|e| e.mount_point == "/"));
}
