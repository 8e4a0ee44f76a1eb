//! Macro and glob expansion of profile paths.

use crate::config::types::{JailError, Result};
use glob::{MatchOptions, Pattern};
use std::path::Path;

const HOME_MACRO: &str = "${HOME}";
const PATH_MACRO: &str = "${PATH}";

/// Directories substituted for `${PATH}`, in lookup order
pub const PATH_SEARCH_LIST: [&str; 6] = [
    "/usr/local/bin",
    "/usr/local/sbin",
    "/bin",
    "/usr/bin",
    "/sbin",
    "/usr/sbin",
];

/// Shell glob semantics: wildcards never cross `/`, dotfiles are included.
const GLOB_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Replace a leading `${HOME}` or `~/` with the home directory.
pub fn expand_home(path: &str, home: &Path) -> String {
    let home = home.to_string_lossy();
    if let Some(rest) = path.strip_prefix(HOME_MACRO) {
        format!("{}{}", home, rest)
    } else if let Some(rest) = path.strip_prefix("~/") {
        format!("{}/{}", home, rest)
    } else {
        path.to_string()
    }
}

/// One candidate per search directory for `${PATH}/name`, otherwise `path`.
pub fn expand_path(path: &str) -> Vec<String> {
    match path.strip_prefix(PATH_MACRO) {
        Some(rest) => PATH_SEARCH_LIST
            .iter()
            .map(|dir| format!("{}{}", dir, rest))
            .collect(),
        None => vec![path.to_string()],
    }
}

/// Both macros, in the order the profile applier uses them
pub fn expand_macros(path: &str, home: &Path) -> Vec<String> {
    expand_path(&expand_home(path, home))
}

/// Allow-list of glob patterns collected from `noblacklist` rules
#[derive(Debug, Default, Clone)]
pub struct NoblacklistSet {
    patterns: Vec<Pattern>,
}

impl NoblacklistSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `pattern`. One that is not valid glob syntax matches itself literally.
    pub fn push(&mut self, pattern: &str) -> Result<()> {
        let compiled = match Pattern::new(pattern) {
            Ok(compiled) => compiled,
            Err(e) => {
                log::debug!("noblacklist {} taken literally: {}", pattern, e);
                Pattern::new(&Pattern::escape(pattern)).map_err(|e| {
                    JailError::Config(format!("failed to compile pattern {}: {}", pattern, e))
                })?
            }
        };
        self.patterns.push(compiled);
        Ok(())
    }

    /// True if any pattern matches `path` with pathname semantics.
    pub fn matches(&self, path: &str) -> bool {
        self.patterns
            .iter()
            .any(|p| p.matches_with(path, GLOB_OPTIONS))
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Expand `pattern` and hand every acceptable match to `callback`.
///
/// A pattern matching nothing, or one that is not valid glob syntax, is passed
/// through unchanged. Matches whose last component is `.` or `..`, or that the
/// allow-list covers, are dropped.
pub fn glob_filtered<F>(pattern: &str, noblacklist: &NoblacklistSet, mut callback: F) -> Result<()>
where
    F: FnMut(&str) -> Result<()>,
{
    let mut matches: Vec<String> = Vec::new();
    match glob::glob_with(pattern, GLOB_OPTIONS) {
        Ok(entries) => {
            for entry in entries {
                match entry {
                    Ok(path) => matches.push(path.to_string_lossy().into_owned()),
                    Err(e) => log::debug!("skipping unreadable glob entry: {}", e),
                }
            }
        }
        Err(e) => log::debug!("{} taken literally: {}", pattern, e),
    }
    if matches.is_empty() {
        matches.push(pattern.to_string());
    }

    for path in &matches {
        let base = basename(path);
        if base == "." || base == ".." {
            continue;
        }
        if noblacklist.matches(path) {
            log::debug!("Not blacklist {}", path);
            continue;
        }
        callback(path)?;
    }
    Ok(())
}
