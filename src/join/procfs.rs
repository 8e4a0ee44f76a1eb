//! Process discovery through a procfs tree.
//!
//! The root is configurable so the lookups can run against a fabricated
//! tree in tests.

use crate::config::types::{JailError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Command name of the sandbox launcher process
pub const LAUNCHER_COMM: &str = "firejail";

#[derive(Clone, Debug)]
pub struct ProcFs {
    root: PathBuf,
}

impl Default for ProcFs {
    fn default() -> Self {
        Self::new("/proc")
    }
}

impl ProcFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn pid_dir(&self, pid: i32) -> PathBuf {
        self.root.join(pid.to_string())
    }

    pub fn exists(&self, pid: i32) -> bool {
        self.pid_dir(pid).is_dir()
    }

    /// `/proc/<pid>/root`, the process's view of `/`
    pub fn sandbox_root(&self, pid: i32) -> PathBuf {
        self.pid_dir(pid).join("root")
    }

    /// An absolute in-sandbox path seen from outside through `/proc/<pid>/root`.
    pub fn root_file(&self, pid: i32, inner: &Path) -> PathBuf {
        let relative = inner.strip_prefix("/").unwrap_or(inner);
        self.sandbox_root(pid).join(relative)
    }

    pub fn comm(&self, pid: i32) -> Option<String> {
        fs::read_to_string(self.pid_dir(pid).join("comm"))
            .ok()
            .map(|s| s.trim_end().to_string())
    }

    pub fn status(&self, pid: i32) -> Result<String> {
        fs::read_to_string(self.pid_dir(pid).join("status")).map_err(|e| {
            log::debug!("read status of {}: {}", pid, e);
            JailError::Process(format!("cannot open stat file for process {}", pid))
        })
    }

    /// Real uid from the `Uid:` line of the status file.
    pub fn uid(&self, pid: i32) -> Option<u32> {
        let status = self.status(pid).ok()?;
        status_field(&status, "Uid:")?.split_whitespace().next()?.parse().ok()
    }

    pub fn parent(&self, pid: i32) -> Option<i32> {
        let status = self.status(pid).ok()?;
        status_field(&status, "PPid:")?.trim().parse().ok()
    }

    pub fn cmdline(&self, pid: i32) -> Vec<String> {
        fs::read(self.pid_dir(pid).join("cmdline"))
            .map(|raw| {
                raw.split(|b| *b == 0)
                    .filter(|arg| !arg.is_empty())
                    .map(|arg| String::from_utf8_lossy(arg).into_owned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Numeric entries of the procfs root, ascending.
    pub fn pids(&self) -> Vec<i32> {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return Vec::new();
        };
        let mut pids: Vec<i32> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().to_str()?.parse().ok())
            .collect();
        pids.sort_unstable();
        pids
    }

    /// Lowest-numbered child of `parent`.
    pub fn find_child(&self, parent: i32) -> Option<i32> {
        self.pids().into_iter().find(|&pid| self.parent(pid) == Some(parent))
    }

    /// First two numbers of the uid map: inside and outside start ids.
    pub fn uid_map_start(&self, pid: i32) -> Option<(u32, u32)> {
        let content = fs::read_to_string(self.pid_dir(pid).join("uid_map")).ok()?;
        let mut fields = content.split_whitespace();
        let inside = fields.next()?.parse().ok()?;
        let outside = fields.next()?.parse().ok()?;
        Some((inside, outside))
    }
}

fn status_field<'a>(status: &'a str, key: &str) -> Option<&'a str> {
    status
        .lines()
        .find_map(|line| line.strip_prefix(key))
}

/// Map a join target to a pid.
///
/// A numeric target naming a live process is used as is. Otherwise the
/// target is a sandbox name: first the `<name_dir>/<pid>` registry files,
/// then the command lines of running launchers are searched.
pub fn resolve_target(proc: &ProcFs, name_dir: &Path, target: &str) -> Result<i32> {
    if target.is_empty() {
        return Err(JailError::Config("invalid sandbox name".to_string()));
    }
    if let Ok(pid) = target.parse::<i32>() {
        if proc.exists(pid) {
            return Ok(pid);
        }
    }

    if let Ok(entries) = fs::read_dir(name_dir) {
        let mut registered: Vec<(i32, PathBuf)> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| Some((e.file_name().to_str()?.parse().ok()?, e.path())))
            .collect();
        registered.sort_unstable_by_key(|(pid, _)| *pid);
        for (pid, file) in registered {
            let matches = fs::read_to_string(&file)
                .map(|content| content.trim() == target)
                .unwrap_or(false);
            if matches && proc.exists(pid) {
                return Ok(pid);
            }
        }
    }

    let flag = format!("--name={}", target);
    let me = std::process::id() as i32;
    proc.pids()
        .into_iter()
        .filter(|&pid| pid != me)
        .find(|&pid| proc.cmdline(pid).iter().any(|arg| *arg == flag))
        .ok_or_else(|| JailError::SandboxNotFound(target.to_string()))
}

/// The launcher itself sits outside the sandbox: step down to its first child.
pub fn sandbox_init(proc: &ProcFs, pid: i32) -> i32 {
    if proc.comm(pid).as_deref() != Some(LAUNCHER_COMM) {
        return pid;
    }
    match proc.find_child(pid) {
        Some(child) => {
            log::info!(
                "Switching to pid {}, the first child process inside the sandbox",
                child
            );
            child
        }
        None => pid,
    }
}
