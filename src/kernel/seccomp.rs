//! Loading and installing precompiled seccomp programs.
//!
//! Filters are compiled elsewhere and stored as raw arrays of
//! `struct sock_filter`; this module only reads and installs them.

use crate::config::types::{JailError, Result};
use std::fs;
use std::path::Path;

const SOCK_FILTER_SIZE: usize = 8;
const BPF_MAXINSNS: usize = 4096;

/// A BPF program ready for `PR_SET_SECCOMP`
#[derive(Clone)]
pub struct SeccompProgram {
    filters: Vec<libc::sock_filter>,
}

impl std::fmt::Debug for SeccompProgram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeccompProgram")
            .field("instructions", &self.filters.len())
            .finish()
    }
}

impl SeccompProgram {
    /// Decode native-endian `sock_filter` records.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() || bytes.len() % SOCK_FILTER_SIZE != 0 {
            return Err(JailError::Config(format!(
                "invalid seccomp program size {}",
                bytes.len()
            )));
        }
        let count = bytes.len() / SOCK_FILTER_SIZE;
        if count > BPF_MAXINSNS {
            return Err(JailError::Config(format!(
                "seccomp program too long: {} instructions",
                count
            )));
        }

        let filters = bytes
            .chunks_exact(SOCK_FILTER_SIZE)
            .map(|rec| libc::sock_filter {
                code: u16::from_ne_bytes([rec[0], rec[1]]),
                jt: rec[2],
                jf: rec[3],
                k: u32::from_ne_bytes([rec[4], rec[5], rec[6], rec[7]]),
            })
            .collect();
        Ok(Self { filters })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).map_err(|e| {
            JailError::Config(format!("cannot read seccomp filter {}: {}", path.display(), e))
        })?;
        Self::from_bytes(&bytes)
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Install the program on the calling thread. Irreversible.
    ///
    /// Without `no_new_privs` the caller needs CAP_SYS_ADMIN.
    pub fn install(&self, no_new_privs: bool) -> Result<()> {
        // SAFETY: PR_SET_NO_NEW_PRIVS takes no pointers.
        if no_new_privs && unsafe { libc::prctl(libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) } != 0 {
            return Err(JailError::Privilege(format!(
                "Failed to set PR_SET_NO_NEW_PRIVS: {}",
                std::io::Error::last_os_error()
            )));
        }

        let prog = libc::sock_fprog {
            len: self.filters.len() as libc::c_ushort,
            filter: self.filters.as_ptr() as *mut libc::sock_filter,
        };
        // SAFETY: prog points at self.filters, which outlives the call; the
        // kernel copies the program before returning.
        let rc = unsafe {
            libc::prctl(
                libc::PR_SET_SECCOMP,
                libc::SECCOMP_MODE_FILTER,
                &prog as *const libc::sock_fprog,
                0,
                0,
            )
        };
        if rc != 0 {
            return Err(JailError::Privilege(format!(
                "seccomp filter installation failed: {}",
                std::io::Error::last_os_error()
            )));
        }
        log::debug!("seccomp filter installed ({} instructions)", self.filters.len());
        Ok(())
    }
}

/// Value of the `Seccomp:` line of `/proc/<pid>/status`
pub fn seccomp_mode_from_status(status: &str) -> Option<u32> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("Seccomp:"))
        .and_then(|value| value.trim().parse().ok())
}
