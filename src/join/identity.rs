/// Security state of a running sandbox, read from outside through procfs
use crate::config::types::Result;
use crate::fs::rundir::RunLayout;
use crate::join::procfs::ProcFs;
use crate::kernel::capabilities::bounding_mask_from_status;
use crate::kernel::cgroup::parse_cgroup_cfg;
use crate::kernel::cpu::parse_cpu_mask;
use crate::kernel::namespace::user_namespace_supported;
use crate::kernel::seccomp::seccomp_mode_from_status;
use std::fs;
use std::path::PathBuf;

/// `Seccomp:` value of a process running under a filter
const SECCOMP_MODE_FILTER: u32 = 2;

/// What a joining process must inherit from the sandbox it enters
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SandboxIdentity {
    pub pid: i32,
    /// Install the sandbox's default seccomp filter
    pub seccomp: bool,
    /// Capability bounding set to replay
    pub caps: Option<u64>,
    pub cpu_mask: Option<u64>,
    /// cgroup membership file
    pub cgroup: Option<PathBuf>,
    /// Drop supplementary groups
    pub nogroups: bool,
    /// The sandbox runs in a user namespace without root
    pub noroot: bool,
    /// Protocol list from `protocol.cfg`
    pub protocol: Option<String>,
}

impl SandboxIdentity {
    /// Identity of a sandbox joined by root: nothing is inherited.
    pub fn unrestricted(pid: i32) -> Self {
        Self {
            pid,
            ..Self::default()
        }
    }

    /// Read status, per-sandbox config files and the uid map of `pid`.
    /// Missing config files mean the feature was not active.
    pub fn capture(proc: &ProcFs, pid: i32, layout: &RunLayout) -> Result<Self> {
        let status = proc.status(pid)?;
        let seccomp = seccomp_mode_from_status(&status) == Some(SECCOMP_MODE_FILTER);
        let caps = bounding_mask_from_status(&status);

        let cpu_mask = match fs::read_to_string(proc.root_file(pid, &layout.cpu_cfg())) {
            Ok(content) => Some(parse_cpu_mask(&content)?),
            Err(_) => None,
        };
        let cgroup = match fs::read_to_string(proc.root_file(pid, &layout.cgroup_cfg())) {
            Ok(content) => Some(parse_cgroup_cfg(&content)?),
            Err(_) => None,
        };
        let nogroups = proc.root_file(pid, &layout.groups_cfg()).exists();
        let protocol = fs::read_to_string(proc.root_file(pid, &layout.protocol_cfg()))
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let mut noroot = false;
        if user_namespace_supported(proc.root()) {
            if let Some((inside, outside)) = proc.uid_map_start(pid) {
                log::debug!("User namespace detected: {}, {}", inside, outside);
                noroot = inside != 0 || outside != 0;
            }
        }

        Ok(Self {
            pid,
            seccomp,
            caps,
            cpu_mask,
            cgroup,
            nogroups,
            noroot,
            protocol,
        })
    }
}
