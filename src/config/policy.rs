//! Pre-parsed profile rules.
//!
//! Profile tokenizing happens upstream; a rule here is one profile line split
//! into its keyword and arguments.

use crate::config::types::{JailError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Rule keyword
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RuleKind {
    Blacklist,
    BlacklistNolog,
    ReadOnly,
    ReadWrite,
    Noexec,
    Tmpfs,
    Bind,
    Noblacklist,
    /// Handled by the whitelist pipeline
    Whitelist,
    /// `args-*` lines, translated upstream
    Args,
    Unknown,
}

impl RuleKind {
    /// Keyword prefixes, longest first where one prefixes another.
    const KEYWORDS: &'static [(&'static str, RuleKind)] = &[
        ("blacklist-nolog ", RuleKind::BlacklistNolog),
        ("blacklist ", RuleKind::Blacklist),
        ("noblacklist ", RuleKind::Noblacklist),
        ("read-only ", RuleKind::ReadOnly),
        ("read-write ", RuleKind::ReadWrite),
        ("noexec ", RuleKind::Noexec),
        ("tmpfs ", RuleKind::Tmpfs),
        ("bind ", RuleKind::Bind),
        ("whitelist ", RuleKind::Whitelist),
        ("args-path ", RuleKind::Args),
        ("args-whitelist ", RuleKind::Args),
        ("args-read-only ", RuleKind::Args),
        ("args-noexec ", RuleKind::Args),
    ];

    /// Name used in fs log records
    pub fn log_name(self) -> &'static str {
        match self {
            RuleKind::Blacklist => "blacklist",
            RuleKind::BlacklistNolog => "blacklist-nolog",
            RuleKind::ReadOnly => "read-only",
            RuleKind::ReadWrite => "read-write",
            RuleKind::Noexec => "noexec",
            RuleKind::Tmpfs => "tmpfs",
            RuleKind::Bind => "bind",
            RuleKind::Noblacklist => "noblacklist",
            RuleKind::Whitelist => "whitelist",
            RuleKind::Args => "args",
            RuleKind::Unknown => "unknown",
        }
    }
}

/// A single profile rule
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rule {
    pub kind: RuleKind,
    /// Raw path argument, macros unexpanded
    pub path: String,
    /// Destination of a `bind A,B` rule
    pub second: Option<String>,
    /// Original line, kept for diagnostics
    pub line: String,
}

impl Rule {
    /// Split a profile line into keyword and arguments. Never fails: unknown
    /// keywords produce [`RuleKind::Unknown`] and are reported by the applier.
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        for (prefix, kind) in RuleKind::KEYWORDS {
            if let Some(rest) = line.strip_prefix(prefix) {
                let rest = rest.trim();
                if *kind == RuleKind::Bind {
                    let (first, second) = match rest.split_once(',') {
                        Some((a, b)) => (a.trim().to_string(), Some(b.trim().to_string())),
                        None => (rest.to_string(), None),
                    };
                    return Rule {
                        kind: *kind,
                        path: first,
                        second,
                        line: line.to_string(),
                    };
                }
                return Rule {
                    kind: *kind,
                    path: rest.to_string(),
                    second: None,
                    line: line.to_string(),
                };
            }
        }

        Rule {
            kind: RuleKind::Unknown,
            path: String::new(),
            second: None,
            line: line.to_string(),
        }
    }

    pub fn new(kind: RuleKind, path: impl Into<String>) -> Self {
        let path = path.into();
        Rule {
            line: format!("{} {}", kind.log_name(), path),
            kind,
            path,
            second: None,
        }
    }
}

/// Ordered rule sequence plus the home directory used for `${HOME}`
#[derive(Clone, Debug, Default)]
pub struct Policy {
    pub rules: Vec<Rule>,
    pub home: PathBuf,
}

impl Policy {
    pub fn new(home: impl Into<PathBuf>, rules: Vec<Rule>) -> Self {
        Self {
            rules,
            home: home.into(),
        }
    }

    /// Build a policy from profile text, dropping blank lines and comments.
    pub fn from_lines<'a>(home: impl Into<PathBuf>, lines: impl IntoIterator<Item = &'a str>) -> Self {
        let rules = lines
            .into_iter()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(Rule::parse)
            .collect();
        Self::new(home, rules)
    }

    /// Read profile files in order and concatenate their rules.
    pub fn load(home: impl Into<PathBuf>, files: &[PathBuf]) -> Result<Self> {
        let mut text = String::new();
        for file in files {
            let content = read_profile(file)?;
            text.push_str(&content);
            text.push('\n');
        }
        Ok(Self::from_lines(home, text.lines()))
    }

    /// Copy of this policy with extra rules appended at the end.
    pub fn with_appended(&self, extra: impl IntoIterator<Item = Rule>) -> Self {
        let mut rules = self.rules.clone();
        rules.extend(extra);
        Self {
            rules,
            home: self.home.clone(),
        }
    }
}

fn read_profile(file: &Path) -> Result<String> {
    fs::read_to_string(file).map_err(|e| {
        JailError::Config(format!("cannot read profile {}: {}", file.display(), e))
    })
}
