/// Mount table inspection for root-only tests
///
/// Lets a test check what a sandbox mounted (from inside its namespace) and
/// that nothing leaked into the host table (from outside it).
use crate::config::types::{JailError, Result};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Mount entry from /proc/<pid>/mountinfo
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MountEntry {
    pub mount_id: u32,
    pub parent_id: u32,
    pub mount_point: String,
    pub mount_options: String,
    pub filesystem_type: String,
}

impl MountEntry {
    pub fn has_option(&self, option: &str) -> bool {
        self.mount_options.split(',').any(|o| o == option)
    }

    pub fn is_read_only(&self) -> bool {
        self.has_option("ro")
    }
}

/// Parse a mountinfo file, e.g. `/proc/self/mountinfo`.
pub fn parse_mountinfo(path: &Path) -> Result<Vec<MountEntry>> {
    let content = fs::read_to_string(path).map_err(|e| {
        JailError::Process(format!("Failed to read {}: {}", path.display(), e))
    })?;
    Ok(content.lines().filter_map(parse_mountinfo_line).collect())
}

/// Format: mount_id parent_id major:minor root mount_point options ... - fs_type source super_options
fn parse_mountinfo_line(line: &str) -> Option<MountEntry> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 10 {
        return None;
    }

    let mount_id = parts[0].parse::<u32>().ok()?;
    let parent_id = parts[1].parse::<u32>().ok()?;
    let sep_pos = parts.iter().position(|&p| p == "-")?;
    let filesystem_type = parts.get(sep_pos + 1)?.to_string();

    Some(MountEntry {
        mount_id,
        parent_id,
        mount_point: unescape(parts[4]),
        mount_options: parts[5].to_string(),
        filesystem_type,
    })
}

/// Undo the kernel's octal escaping of spaces, tabs, newlines and backslashes.
fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 4 <= bytes.len() {
            let digits = std::str::from_utf8(&bytes[i + 1..i + 4]).unwrap_or("");
            if let Ok(value) = u8::from_str_radix(digits, 8) {
                out.push(value);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Topmost entry mounted at `mount_point`
pub fn find_mount<'a>(entries: &'a [MountEntry], mount_point: &str) -> Option<&'a MountEntry> {
    entries.iter().rev().find(|e| e.mount_point == mount_point)
}

/// `mount_point|fstype` keys, for comparing two tables
pub fn normalize_mountinfo(entries: &[MountEntry]) -> HashSet<String> {
    entries
        .iter()
        .map(|e| format!("{}|{}", e.mount_point, e.filesystem_type))
        .collect()
}

/// Entries present in `after` but not in `before`
pub fn added_mounts(before: &[MountEntry], after: &[MountEntry]) -> Vec<String> {
    let before = normalize_mountinfo(before);
    let mut added: Vec<String> = normalize_mountinfo(after)
        .difference(&before)
        .cloned()
        .collect();
    added.sort();
    added
}
