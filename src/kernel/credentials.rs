//! Permanent drop to the invoking user's credentials.
//!
//! setresgid MUST run before setresuid: once the uid is gone the gid can no
//! longer be changed.

use crate::config::types::{JailError, Result};
use crate::kernel::privileged::Caller;
use nix::unistd::{Gid, Uid, User};
use std::ffi::CString;

/// Drop real, effective and saved ids to the caller.
///
/// With `nogroups` the supplementary group list is cleared; otherwise it is
/// rebuilt from the caller's group membership.
///
/// A launcher running with lowered effective ids regains root from the saved
/// uid first, so the group list can still be rebuilt.
pub fn drop_privs(caller: Caller, nogroups: bool) -> Result<()> {
    if nix::unistd::geteuid().is_root() || regain_root() {
        if nogroups {
            nix::unistd::setgroups(&[]).map_err(|e| {
                JailError::Privilege(format!("Failed to clear supplementary groups: {}", e))
            })?;
        } else {
            init_groups(caller)?;
        }
    }

    let gid = Gid::from_raw(caller.gid);
    nix::unistd::setresgid(gid, gid, gid)
        .map_err(|e| JailError::Privilege(format!("Failed to setresgid({}): {}", caller.gid, e)))?;

    let uid = Uid::from_raw(caller.uid);
    nix::unistd::setresuid(uid, uid, uid)
        .map_err(|e| JailError::Privilege(format!("Failed to setresuid({}): {}", caller.uid, e)))?;

    verify(caller)?;
    log::debug!("dropped privileges to uid={} gid={}", caller.uid, caller.gid);
    Ok(())
}

fn regain_root() -> bool {
    match nix::unistd::getresuid() {
        Ok(ids) if ids.saved.is_root() => nix::unistd::seteuid(Uid::from_raw(0)).is_ok(),
        _ => false,
    }
}

fn init_groups(caller: Caller) -> Result<()> {
    let user = User::from_uid(Uid::from_raw(caller.uid))
        .map_err(|e| JailError::Privilege(format!("cannot look up uid {}: {}", caller.uid, e)))?;
    let Some(user) = user else {
        log::warn!("uid {} has no passwd entry, clearing groups", caller.uid);
        return nix::unistd::setgroups(&[])
            .map_err(|e| JailError::Privilege(format!("setgroups: {}", e)));
    };
    let name = CString::new(user.name)
        .map_err(|e| JailError::Privilege(format!("invalid user name: {}", e)))?;
    nix::unistd::initgroups(&name, Gid::from_raw(caller.gid))
        .map_err(|e| JailError::Privilege(format!("initgroups: {}", e)))
}

fn verify(caller: Caller) -> Result<()> {
    let ids = nix::unistd::getresuid()
        .map_err(|e| JailError::Privilege(format!("getresuid: {}", e)))?;
    let expected = Uid::from_raw(caller.uid);
    if ids.real != expected || ids.effective != expected || ids.saved != expected {
        return Err(JailError::Privilege(format!(
            "uid transition incomplete: real={} effective={} saved={}",
            ids.real, ids.effective, ids.saved
        )));
    }
    Ok(())
}
