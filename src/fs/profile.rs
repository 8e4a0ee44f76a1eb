//! Applies a parsed policy to the mount namespace.
//!
//! Rules run in declaration order. `noblacklist` patterns accumulate as they
//! are met and filter every later blacklist rule; earlier blacklist rules are
//! not revisited.

use crate::config::policy::{Policy, Rule, RuleKind};
use crate::config::types::{JailError, Result};
use crate::context::SandboxContext;
use crate::fs::expand::{expand_home, expand_macros, glob_filtered, NoblacklistSet};
use crate::fs::primitives::{bind_over, disable_path, DisableOp, Outcome};
use crate::kernel::privileged::RootToken;
use std::path::Path;

/// What a policy run did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    /// Paths a primitive changed
    pub applied: usize,
    /// Paths left alone: missing, not owned, not a directory, recoverable errors
    pub skipped: usize,
    /// Warnings surfaced while applying
    pub warnings: Vec<String>,
}

fn disable_op(kind: RuleKind) -> Option<DisableOp> {
    match kind {
        RuleKind::Blacklist => Some(DisableOp::Blacklist),
        RuleKind::BlacklistNolog => Some(DisableOp::BlacklistNolog),
        RuleKind::ReadOnly => Some(DisableOp::ReadOnly),
        RuleKind::ReadWrite => Some(DisableOp::ReadWrite),
        RuleKind::Noexec => Some(DisableOp::Noexec),
        RuleKind::Tmpfs => Some(DisableOp::Tmpfs),
        _ => None,
    }
}

/// Apply every rule of `policy`. Recoverable errors become warnings; the
/// first fatal error aborts the run.
///
/// `noblacklist` patterns filter only the glob results of later `blacklist`
/// and `blacklist-nolog` rules. `read-only`, `read-write`, `noexec` and
/// `tmpfs` rules are applied to every match regardless of them.
pub fn apply_policy(
    ctx: &mut SandboxContext,
    tok: &RootToken,
    policy: &Policy,
) -> Result<ApplyReport> {
    let mark = ctx.warnings().len();
    let mut noblacklist = NoblacklistSet::new();
    let mut report = ApplyReport::default();

    for rule in &policy.rules {
        if let Err(e) = apply_rule(ctx, tok, rule, &policy.home, &mut noblacklist, &mut report) {
            if !e.is_recoverable() {
                return Err(e);
            }
            ctx.warn(e.to_string());
            report.skipped += 1;
        }
    }

    report.warnings = ctx.warnings_since(mark);
    log::info!(
        "policy applied: {} paths changed, {} skipped",
        report.applied,
        report.skipped
    );
    Ok(report)
}

fn apply_rule(
    ctx: &mut SandboxContext,
    tok: &RootToken,
    rule: &Rule,
    home: &Path,
    noblacklist: &mut NoblacklistSet,
    report: &mut ApplyReport,
) -> Result<()> {
    match rule.kind {
        RuleKind::Whitelist | RuleKind::Args => {
            log::debug!("skipping {}", rule.line);
            Ok(())
        }
        RuleKind::Unknown => Err(JailError::InvalidProfileLine(rule.line.clone())),
        RuleKind::Bind => {
            let Some(second) = rule.second.as_deref() else {
                return Err(JailError::InvalidProfileLine(format!(
                    "{}: second directory missing",
                    rule.line
                )));
            };
            let src = expand_home(&rule.path, home);
            let dst = expand_home(second, home);
            bind_over(ctx, tok, Path::new(&src), Path::new(&dst))?;
            report.applied += 1;
            Ok(())
        }
        RuleKind::Noblacklist => {
            for pattern in expand_macros(&rule.path, home) {
                noblacklist.push(&pattern)?;
            }
            Ok(())
        }
        kind => {
            let Some(op) = disable_op(kind) else {
                return Err(JailError::InvalidProfileLine(rule.line.clone()));
            };
            let no_filter = NoblacklistSet::new();
            let filter: &NoblacklistSet = if op.is_blacklist() {
                &*noblacklist
            } else {
                &no_filter
            };

            for candidate in expand_macros(&rule.path, home) {
                glob_filtered(&candidate, filter, |path| {
                    match disable_path(ctx, tok, op, Path::new(path)) {
                        Ok(Outcome::Applied) => report.applied += 1,
                        Ok(Outcome::Skipped(_)) => report.skipped += 1,
                        Err(e) if e.is_recoverable() => {
                            ctx.warn(e.to_string());
                            report.skipped += 1;
                        }
                        Err(e) => return Err(e),
                    }
                    Ok(())
                })?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JailConfig;
    use crate::observability::MemoryLog;
    use crate::testing::RecordingOps;
    use std::fs;
    use std::rc::Rc;

    fn context(root: &Path, uid: u32) -> (Rc<RecordingOps>, SandboxContext) {
        fs::create_dir_all(root.join("run")).unwrap();
        let ops = Rc::new(RecordingOps::new(uid, uid));
        let config = JailConfig {
            run_base: root.join("run/firejail"),
            ..JailConfig::default()
        };
        let ctx = SandboxContext::new(ops.clone(), config).with_logger(Box::new(MemoryLog::new()));
        (ops, ctx)
    }

    #[test]
    fn unknown_keyword_warns_and_continues() {
        let tmp = tempfile::tempdir().unwrap();
        let root = fs::canonicalize(tmp.path()).unwrap();
        let target = root.join("data");
        fs::create_dir(&target).unwrap();
        let (ops, mut ctx) = context(&root, 0);

        let policy = Policy::from_lines(
            &root,
            ["caps.drop all".to_string(), format!("read-only {}", target.display())]
                .iter()
                .map(String::as_str),
        );
        let report = ctx.as_root(|ctx, tok| apply_policy(ctx, tok, &policy)).unwrap();

        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("invalid profile line"));
        assert_eq!(report.applied, 1);
        assert_eq!(ops.mounts_on(&target).len(), 2);
    }

    #[test]
    fn whitelist_and_args_lines_do_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let root = fs::canonicalize(tmp.path()).unwrap();
        let (ops, mut ctx) = context(&root, 0);
        let policy = Policy::from_lines(&root, ["whitelist ~/Downloads", "args-path /x"]);
        let report = ctx.as_root(|ctx, tok| apply_policy(ctx, tok, &policy)).unwrap();
        assert_eq!(report, ApplyReport::default());
        assert!(ops.mounts().is_empty());
    }

    #[test]
    fn noblacklist_only_affects_later_rules() {
        let tmp = tempfile::tempdir().unwrap();
        let root = fs::canonicalize(tmp.path()).unwrap();
        let secret = root.join("secret");
        fs::write(&secret, "").unwrap();
        let (ops, mut ctx) = context(&root, 0);

        let policy = Policy::from_lines(
            &root,
            [
                "blacklist ${HOME}/secret",
                "noblacklist ${HOME}/secret",
                "blacklist ${HOME}/secret",
            ],
        );
        ctx.as_root(|ctx, tok| apply_policy(ctx, tok, &policy)).unwrap();
        assert_eq!(ops.mounts_on(&secret).len(), 1);
    }

    #[test]
    fn noblacklist_does_not_filter_read_only() {
        let tmp = tempfile::tempdir().unwrap();
        let root = fs::canonicalize(tmp.path()).unwrap();
        let dir = root.join("opt");
        fs::create_dir(&dir).unwrap();
        let (ops, mut ctx) = context(&root, 0);

        let policy = Policy::from_lines(&root, ["noblacklist ${HOME}/opt", "read-only ${HOME}/opt"]);
        ctx.as_root(|ctx, tok| apply_policy(ctx, tok, &policy)).unwrap();
        assert_eq!(ops.mounts_on(&dir).len(), 2);
    }

    #[test]
    fn bind_without_second_path_is_a_warning() {
        let tmp = tempfile::tempdir().unwrap();
        let root = fs::canonicalize(tmp.path()).unwrap();
        let (_ops, mut ctx) = context(&root, 0);
        let policy = Policy::from_lines(&root, ["bind /tmp/a", "bind /nonexistent/a,/nonexistent/b"]);
        let report = ctx.as_root(|ctx, tok| apply_policy(ctx, tok, &policy)).unwrap();
        assert_eq!(report.warnings.len(), 2);
        assert!(report.warnings[1].contains("cannot find"));
    }

    #[test]
    fn fatal_mount_error_aborts() {
        let tmp = tempfile::tempdir().unwrap();
        let root = fs::canonicalize(tmp.path()).unwrap();
        let dir = root.join("etc");
        fs::create_dir(&dir).unwrap();
        let (ops, mut ctx) = context(&root, 0);
        ops.fail_mounts_from(&dir, nix::errno::Errno::EPERM);

        let policy = Policy::from_lines(&root, ["read-only ${HOME}/etc"]);
        let err = ctx.as_root(|ctx, tok| apply_policy(ctx, tok, &policy)).unwrap_err();
        assert!(matches!(err, JailError::MountFailed { op: "mount read-only", .. }));
    }
}
