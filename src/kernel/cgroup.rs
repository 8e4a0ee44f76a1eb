/// Attach a process to the cgroup a running sandbox was placed in
use crate::config::types::{JailError, Result};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const CGROUP_ROOT: &str = "/sys/fs/cgroup";

/// Parse the content of a `cgroup.cfg` file into the membership file path.
pub fn parse_cgroup_cfg(content: &str) -> Result<PathBuf> {
    let line = content.lines().next().unwrap_or("").trim();
    if line.is_empty() {
        return Err(JailError::Config("empty cgroup configuration".to_string()));
    }
    let path = PathBuf::from(line);
    validate_membership_file(&path)?;
    Ok(path)
}

fn validate_membership_file(path: &Path) -> Result<()> {
    if !path.starts_with(CGROUP_ROOT) || path.components().any(|c| c.as_os_str() == "..") {
        return Err(JailError::Config(format!(
            "invalid cgroup path {}",
            path.display()
        )));
    }
    match path.file_name().and_then(|n| n.to_str()) {
        Some("tasks") | Some("cgroup.procs") => Ok(()),
        _ => Err(JailError::Config(format!(
            "cgroup path must name a tasks or cgroup.procs file: {}",
            path.display()
        ))),
    }
}

/// Write `pid` into the cgroup membership file.
pub fn attach_process(membership: &Path, pid: u32) -> Result<()> {
    let meta = fs::symlink_metadata(membership).map_err(|e| {
        JailError::Config(format!("cannot access {}: {}", membership.display(), e))
    })?;
    if !meta.is_file() {
        return Err(JailError::Config(format!(
            "{} is not a regular file",
            membership.display()
        )));
    }

    let mut file = OpenOptions::new().append(true).open(membership)?;
    writeln!(file, "{}", pid)?;
    log::debug!("attached process {} to {}", pid, membership.display());
    Ok(())
}
