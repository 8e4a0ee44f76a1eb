//! Capability bounding set inheritance.
//!
//! A joined process must not hold capabilities the sandbox it enters has
//! already given up, so the target's `CapBnd` mask is replayed on the child.

use crate::config::types::{JailError, Result};

const PR_CAPBSET_READ: libc::c_int = 23;
const PR_CAPBSET_DROP: libc::c_int = 24;

/// Highest capability number representable in a `CapBnd` mask
pub const MAX_CAP: u32 = 63;

/// Parse the hexadecimal value of a `CapBnd:` status line.
pub fn parse_cap_mask(value: &str) -> Result<u64> {
    u64::from_str_radix(value.trim(), 16)
        .map_err(|e| JailError::Process(format!("invalid capability mask {:?}: {}", value, e)))
}

/// Extract the bounding set from the text of `/proc/<pid>/status`.
pub fn bounding_mask_from_status(status: &str) -> Option<u64> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("CapBnd:"))
        .and_then(|value| parse_cap_mask(value).ok())
}

/// Capabilities to remove so that only `mask` remains, up to `last_cap`.
pub fn caps_to_drop(mask: u64, last_cap: u32) -> Vec<u32> {
    (0..=last_cap.min(MAX_CAP))
        .filter(|cap| mask & (1u64 << cap) == 0)
        .collect()
}

/// Highest capability the running kernel knows, from
/// `/proc/sys/kernel/cap_last_cap`. [`MAX_CAP`] when unreadable.
pub fn last_cap() -> u32 {
    std::fs::read_to_string("/proc/sys/kernel/cap_last_cap")
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(MAX_CAP)
}

/// Drop every capability not present in `mask` from the bounding set.
pub fn install_bounding_set(mask: u64) -> Result<()> {
    for cap in caps_to_drop(mask, last_cap()) {
        // SAFETY: PR_CAPBSET_DROP takes a capability number and no pointers.
        let rc = unsafe { libc::prctl(PR_CAPBSET_DROP, cap as libc::c_ulong, 0, 0, 0) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINVAL) {
                // past the kernel's last capability
                break;
            }
            return Err(JailError::Privilege(format!(
                "cannot drop capability {}: {}",
                cap, err
            )));
        }
    }
    log::debug!("capability bounding set installed: {:016x}", mask);
    Ok(())
}

/// True if `cap` is still in the calling thread's bounding set.
pub fn in_bounding_set(cap: u32) -> bool {
    // SAFETY: PR_CAPBSET_READ takes a capability number and no pointers.
    let rc = unsafe { libc::prctl(PR_CAPBSET_READ, cap as libc::c_ulong, 0, 0, 0) };
    rc == 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_status_bounding_set() {
        let status = "Name:\tbash\nCapEff:\t0000000000000000\nCapBnd:\t00000000a80425fb\nSeccomp:\t2\n";
        assert_eq!(bounding_mask_from_status(status), Some(0xa80425fb));
    }

    #[test]
    fn missing_capbnd_line_is_none() {
        assert_eq!(bounding_mask_from_status("Name:\tbash\n"), None);
    }

    #[test]
    fn rejects_garbage_mask() {
        assert!(parse_cap_mask("zz").is_err());
        assert_eq!(parse_cap_mask(" 0000003fffffffff ").unwrap(), 0x3f_ffff_ffff);
    }

    #[test]
    fn drops_the_complement_of_the_mask() {
        // CAP_CHOWN, CAP_NET_BIND_SERVICE and CAP_SYS_ADMIN kept
        let mask = 1u64 | (1 << 10) | (1 << 21);
        let dropped = caps_to_drop(mask, 40);
        assert_eq!(dropped.len(), 41 - 3);
        assert_eq!(dropped[..3].to_vec(), vec![1, 2, 3]);
        assert!(!dropped.contains(&10) && !dropped.contains(&21));
        assert_eq!(dropped.last(), Some(&40));
    }

    #[test]
    fn drop_list_stops_at_last_cap() {
        assert!(caps_to_drop(u64::MAX, 40).is_empty());
        assert_eq!(caps_to_drop(0, 3), vec![0, 1, 2, 3]);
        assert_eq!(caps_to_drop(0, 200).len(), MAX_CAP as usize + 1);

        let mask = 0xa804_25fbu64;
        let dropped = caps_to_drop(mask, 40);
        for cap in 0..=40u32 {
            assert_eq!(dropped.contains(&cap), mask & (1u64 << cap) == 0, "cap {}", cap);
        }
    }

    #[test]
    fn full_mask_drops_nothing() {
        // An all-ones mask never calls PR_CAPBSET_DROP, so it succeeds unprivileged.
        install_bounding_set(u64::MAX).unwrap();
    }
}
