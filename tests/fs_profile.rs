//! Integration tests for profile application and the full filesystem build
//!
//! Every test runs against a scratch tree with the recording backend, so no
//! mount is ever executed.

use firejail_core::config::{JailConfig, Policy, SandboxOptions};
use firejail_core::fs::hooks::STANDARD_HOOKS;
use firejail_core::fs::{apply_policy, build_filesystem};
use firejail_core::kernel::privileged::PrivilegedOps;
use firejail_core::observability::{FsLogger, MemoryLog};
use firejail_core::testing::{RecordingHooks, RecordingOps};
use firejail_core::SandboxContext;
use nix::mount::MsFlags;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::rc::Rc;

struct Sandbox {
    _tmp: tempfile::TempDir,
    root: PathBuf,
    ops: Rc<RecordingOps>,
    ctx: SandboxContext,
}

fn sandbox(uid: u32) -> Sandbox {
    let tmp = tempfile::tempdir().unwrap();
    let root = fs::canonicalize(tmp.path()).unwrap();
    fs::create_dir_all(root.join("run")).unwrap();
    let ops = Rc::new(RecordingOps::new(uid, uid));
    let config = JailConfig {
        run_base: root.join("run/firejail"),
        ..JailConfig::default()
    };
    let ctx = SandboxContext::new(ops.clone(), config).with_logger(Box::new(MemoryLog::new()));
    Sandbox {
        _tmp: tmp,
        root,
        ops,
        ctx,
    }
}

fn apply(sb: &mut Sandbox, lines: &[&str]) -> firejail_core::fs::ApplyReport {
    let policy = Policy::from_lines(&sb.root, lines.iter().copied());
    sb.ctx
        .as_root(|ctx, tok| apply_policy(ctx, tok, &policy))
        .unwrap()
}

fn logged(ctx: &SandboxContext, kind: &str, path: &Path) -> bool {
    let path = path.to_string_lossy();
    ctx.logger
        .events()
        .iter()
        .any(|e| e.kind == kind && e.path == path)
}

#[test]
fn blacklisted_file_is_covered_by_root_owned_sentinel() {
    let mut sb = sandbox(0);
    fs::create_dir_all(sb.root.join("etc")).unwrap();
    let shadow = sb.root.join("etc/shadow");
    fs::write(&shadow, "root:*:19000::::::\n").unwrap();

    let report = apply(&mut sb, &["blacklist ${HOME}/etc/shadow"]);
    assert_eq!(report.applied, 1);

    let mounts = sb.ops.mounts_on(&shadow);
    assert_eq!(mounts.len(), 1);
    assert_eq!(mounts[0].flags, MsFlags::MS_BIND);
    let sentinel = sb.ctx.layout.ro_file.clone();
    assert_eq!(mounts[0].source.as_deref(), Some(sentinel.as_path()));

    let meta = sb.ops.stat(&sentinel).unwrap();
    assert_eq!((meta.uid, meta.mode), (0, 0o400));
    assert_eq!(fs::metadata(&sentinel).unwrap().len(), 0);
    assert_eq!(fs::metadata(&sentinel).unwrap().permissions().mode() & 0o777, 0o400);

    assert!(logged(&sb.ctx, "blacklist", &shadow));
}

#[test]
fn system_bin_link_is_not_blacklisted() {
    let bin = Path::new("/bin");
    if !fs::symlink_metadata(bin).map(|m| m.file_type().is_symlink()).unwrap_or(false)
        || fs::canonicalize(bin).ok().as_deref() != Some(Path::new("/usr/bin"))
    {
        eprintln!("skipping: /bin is not a link to /usr/bin on this host");
        return;
    }

    let mut sb = sandbox(0);
    let report = apply(&mut sb, &["blacklist /bin"]);
    assert!(sb.ops.mounts().is_empty());
    assert!(report
        .warnings
        .iter()
        .any(|w| w.contains("directory link was not blacklisted")));
}

#[test]
fn noblacklist_exempts_matching_glob_result() {
    let mut sb = sandbox(1000);
    let ssh = sb.root.join(".ssh");
    fs::create_dir(&ssh).unwrap();
    fs::write(ssh.join("config"), "Host *\n").unwrap();
    fs::write(ssh.join("id_rsa"), "key\n").unwrap();

    apply(
        &mut sb,
        &["noblacklist ${HOME}/.ssh/config", "blacklist ${HOME}/.ssh/*"],
    );

    assert_eq!(sb.ops.mounts_on(&ssh.join("id_rsa")).len(), 1);
    assert!(sb.ops.mounts_on(&ssh.join("config")).is_empty());
}

#[test]
fn glob_without_matches_is_not_an_error() {
    let mut sb = sandbox(0);
    let report = apply(
        &mut sb,
        &["blacklist ${HOME}/home/*/.cache/*", "blacklist ${HOME}/missing"],
    );
    assert!(sb.ops.mounts().is_empty());
    assert_eq!(report.applied, 0);
    assert!(report.warnings.is_empty());
}

#[test]
fn malformed_glob_is_taken_literally_and_later_rules_still_apply() {
    let mut sb = sandbox(0);
    let odd = sb.root.join("odd[name");
    fs::write(&odd, "").unwrap();
    let secret = sb.root.join("secret");
    fs::write(&secret, "").unwrap();

    let report = apply(
        &mut sb,
        &["blacklist ${HOME}/odd[name", "blacklist ${HOME}/secret"],
    );

    assert_eq!(sb.ops.mounts_on(&odd).len(), 1);
    assert_eq!(sb.ops.mounts_on(&secret).len(), 1);
    assert_eq!(report.applied, 2);
}

#[test]
fn tmpfs_on_regular_file_is_refused() {
    let mut sb = sandbox(0);
    fs::create_dir_all(sb.root.join("var")).unwrap();
    let log = sb.root.join("var/log");
    fs::write(&log, "").unwrap();

    let report = apply(&mut sb, &["tmpfs ${HOME}/var/log"]);
    assert!(sb.ops.mounts_on(&log).is_empty());
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].contains("is not a directory"));
    assert!(log.is_file());
}

#[test]
fn read_write_on_foreign_file_is_refused_and_application_continues() {
    let mut sb = sandbox(1000);
    fs::create_dir_all(sb.root.join("etc")).unwrap();
    let hosts = sb.root.join("etc/hosts");
    fs::write(&hosts, "127.0.0.1 localhost\n").unwrap();
    sb.ops.set_owner(&hosts, 0, 0);
    let data = sb.root.join("data");
    fs::create_dir(&data).unwrap();

    let report = apply(
        &mut sb,
        &["read-write ${HOME}/etc/hosts", "read-only ${HOME}/data"],
    );

    assert!(sb.ops.mounts_on(&hosts).is_empty());
    assert!(report
        .warnings
        .iter()
        .any(|w| w.contains("not allowed to change")));
    assert_eq!(sb.ops.mounts_on(&data).len(), 2);
    assert_eq!(report.applied, 1);
}

#[test]
fn full_build_runs_every_stage_in_order() {
    let tmp = tempfile::tempdir().unwrap();
    let root = fs::canonicalize(tmp.path()).unwrap();
    fs::create_dir_all(root.join("run")).unwrap();
    let secret = root.join("secret");
    fs::write(&secret, "").unwrap();

    let ops = Rc::new(RecordingOps::new(0, 0));
    let hooks = RecordingHooks::new();
    let config = JailConfig {
        run_base: root.join("run/firejail"),
        ..JailConfig::default()
    };
    let mut ctx = SandboxContext::new(ops.clone(), config).with_hooks(Box::new(hooks.clone()));

    let opts = SandboxOptions {
        home: root.clone(),
        private_tmp: true,
        ..SandboxOptions::default()
    };
    let policy = Policy::from_lines(&root, ["blacklist ${HOME}/secret"]);
    let report = build_filesystem(&mut ctx, &opts, &policy).unwrap();

    assert!(report.applied >= 1);
    assert_eq!(ops.mounts_on(&secret).len(), 1);
    assert_eq!(hooks.calls(), STANDARD_HOOKS.to_vec());
    assert!(ops
        .mounts_on(Path::new("/proc"))
        .iter()
        .any(|m| m.fstype.as_deref() == Some("proc")));
    assert!(ops
        .mounts_on(Path::new("/tmp"))
        .iter()
        .any(|m| m.data.as_deref() == Some("mode=1777,gid=0")));
    assert!(ops.chroots().is_empty());
    assert_eq!(ops.effective_uid(), 0);

    let log = fs::read_to_string(ctx.layout.fslogger_file()).unwrap();
    let kinds: Vec<String> = log
        .lines()
        .map(|line| {
            let event: serde_json::Value = serde_json::from_str(line).unwrap();
            event["kind"].as_str().unwrap().to_string()
        })
        .collect();
    assert!(kinds.iter().any(|k| k == "remount"));
    assert!(kinds.iter().any(|k| k == "blacklist"));
}
