use crate::config::loader::{JailConfig, DEFAULT_CONFIG_PATH};
use crate::config::options::{JoinOptions, OverlayOptions, RootStrategy, SandboxOptions};
use crate::config::policy::Policy;
use crate::context::SandboxContext;
use crate::fs::build_filesystem;
use crate::fs::root::overlay_dir;
use crate::fs::rundir::RunLayout;
use crate::join::{exec, Joiner};
use crate::kernel::credentials::drop_privs;
use crate::kernel::namespace::{harden_mount_propagation, unshare_mount_namespace};
use crate::kernel::privileged::{as_root, as_user, Caller, KernelOps, PrivilegedOps};
use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use nix::unistd::{Uid, User};
use std::path::{Path, PathBuf};
use std::rc::Rc;

#[derive(Parser)]
#[command(author, version, about = "Linux namespaces sandbox", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a sandbox filesystem and run a command in it
    Run(RunArgs),
    /// Run a command inside an existing sandbox
    Join(JoinArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Profile file, may be repeated
    #[arg(long = "profile")]
    profiles: Vec<PathBuf>,
    /// Mount an overlay filesystem on top of the root
    #[arg(long, conflicts_with_all = ["overlay_named", "chroot"])]
    overlay: bool,
    /// Persistent overlay kept in ~/.firejail/NAME
    #[arg(long, value_name = "NAME", conflicts_with = "chroot")]
    overlay_named: Option<String>,
    /// Allow an existing persistent overlay to be reused
    #[arg(long, requires = "overlay_named")]
    overlay_reuse: bool,
    /// Chroot into this root directory
    #[arg(long, value_name = "DIR")]
    chroot: Option<PathBuf>,
    #[arg(long)]
    writable_etc: bool,
    #[arg(long)]
    writable_var: bool,
    #[arg(long)]
    private_dev: bool,
    /// Mount an empty tmpfs on /tmp
    #[arg(long)]
    private_tmp: bool,
    /// Command and arguments; the default shell when empty
    #[arg(last = true)]
    command: Vec<String>,
}

#[derive(Args)]
struct JoinArgs {
    /// Pid or name of the sandbox
    target: String,
    /// Join only the network namespace
    #[arg(long, conflicts_with = "join_filesystem")]
    join_network: bool,
    /// Join only the mount namespace
    #[arg(long)]
    join_filesystem: bool,
    #[arg(long, value_name = "PATH")]
    shell: Option<PathBuf>,
    #[arg(long, value_name = "DIR")]
    cwd: Option<PathBuf>,
    #[arg(long, allow_hyphen_values = true)]
    nice: Option<i32>,
    /// Protocol list, e.g. unix,inet
    #[arg(long)]
    protocol: Option<String>,
    #[arg(last = true)]
    command: Vec<String>,
}

/// Home directory of the invoking user: passwd entry first, then `$HOME`.
fn home_dir(caller: Caller) -> Result<PathBuf> {
    if let Ok(Some(user)) = User::from_uid(Uid::from_raw(caller.uid)) {
        return Ok(user.dir);
    }
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .context("cannot determine the home directory")
}

/// Only root may point the launcher at another configuration file.
fn config_path(caller: Caller, requested: &Path) -> Result<PathBuf> {
    if !caller.is_root() && requested != Path::new(DEFAULT_CONFIG_PATH) {
        bail!("--config is only available to root");
    }
    Ok(requested.to_path_buf())
}

/// Files named or owned by the caller, read with the caller's ids
struct RunInputs {
    policy: Policy,
    overlay: Option<PathBuf>,
}

fn load_run_inputs(ops: &dyn PrivilegedOps, home: &Path, args: &RunArgs) -> Result<RunInputs> {
    let inputs = as_user(ops, || {
        let overlay = match &args.overlay_named {
            Some(name) => Some(overlay_dir(home, name, args.overlay_reuse)?),
            None => None,
        };
        let policy = Policy::load(home, &args.profiles)?;
        Ok(RunInputs { policy, overlay })
    })?;
    Ok(inputs)
}

pub fn run() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let ops: Rc<dyn PrivilegedOps> = Rc::new(KernelOps::new());
    // effective ids stay the caller's outside as_root; the saved uid keeps root reachable
    ops.lower()?;
    let caller = ops.caller();
    let path = config_path(caller, &cli.config)?;
    let config = as_user(ops.as_ref(), || JailConfig::load(&path))?;
    let home = home_dir(caller)?;

    match cli.command {
        Commands::Run(args) => run_sandbox(ops, config, home, args),
        Commands::Join(args) => {
            let opts = JoinOptions {
                target: args.target,
                join_network: args.join_network,
                join_filesystem: args.join_filesystem,
                command: args.command,
                shell: args.shell,
                cwd: args.cwd,
                nice: args.nice,
                protocol: args.protocol,
                home,
            };
            Joiner::new(ops, RunLayout::new(&config.run_base)).run(&opts)?;
            Ok(())
        }
    }
}

fn run_sandbox(ops: Rc<dyn PrivilegedOps>, config: JailConfig, home: PathBuf, args: RunArgs) -> Result<()> {
    let RunInputs { policy, overlay } = load_run_inputs(ops.as_ref(), &home, &args)?;
    let strategy = if let Some(dir) = args.chroot {
        RootStrategy::Chroot(dir)
    } else if let Some(dir) = overlay {
        RootStrategy::Overlay(OverlayOptions {
            persistent: Some(dir),
            reuse: args.overlay_reuse,
        })
    } else if args.overlay {
        RootStrategy::Overlay(OverlayOptions::default())
    } else {
        RootStrategy::Basic
    };

    let opts = SandboxOptions {
        home: home.clone(),
        writable_etc: args.writable_etc,
        writable_var: args.writable_var,
        private_dev: args.private_dev,
        private_tmp: args.private_tmp,
        strategy,
    };

    as_root(ops.as_ref(), |_tok| {
        unshare_mount_namespace()?;
        harden_mount_propagation()
    })?;

    let caller = ops.caller();
    let mut ctx = SandboxContext::new(ops, config);
    let report = build_filesystem(&mut ctx, &opts, &policy)?;
    log::info!(
        "{} paths changed, {} skipped, {} warnings",
        report.applied,
        report.skipped,
        report.warnings.len()
    );

    drop_privs(caller, false)?;
    let argv = if args.command.is_empty() {
        let shell = exec::guess_shell().context("no POSIX shell found")?;
        exec::shell_argv(&shell, &[])
    } else {
        args.command
    };
    exec::enter_directory(None, &home)?;
    match exec::exec_argv(&argv)? {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingOps;
    use std::fs;

    fn run_args(argv: &[&str]) -> RunArgs {
        let cli = Cli::try_parse_from(argv).unwrap();
        match cli.command {
            Commands::Run(args) => args,
            Commands::Join(_) => panic!("expected the run subcommand"),
        }
    }

    #[test]
    fn profiles_and_overlay_are_read_as_the_caller() {
        let tmp = tempfile::tempdir().unwrap();
        let home = tmp.path();
        let profile = home.join("app.profile");
        fs::write(&profile, "blacklist ${HOME}/.ssh\nread-only ${HOME}/bin\n").unwrap();
        let profile = profile.to_string_lossy().into_owned();

        let ops = RecordingOps::new(1000, 1000);
        // set-uid start: effective root
        ops.raise().unwrap();
        let args = run_args(&["firejail", "run", "--profile", &profile, "--overlay-named", "work"]);
        let inputs = load_run_inputs(&ops, home, &args).unwrap();

        assert_eq!(ops.euid_history(), vec![0, 1000, 0]);
        assert_eq!(inputs.policy.rules.len(), 2);
        assert_eq!(inputs.overlay, Some(home.join(".firejail/work")));
        assert!(home.join(".firejail").is_dir());
    }

    #[test]
    fn failed_caller_read_still_restores_ids() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("missing.profile");
        let missing = missing.to_string_lossy().into_owned();

        let ops = RecordingOps::new(1000, 1000);
        ops.raise().unwrap();
        let args = run_args(&["firejail", "run", "--profile", &missing]);
        assert!(load_run_inputs(&ops, tmp.path(), &args).is_err());
        assert_eq!(ops.euid_history(), vec![0, 1000, 0]);
        assert_eq!(ops.effective_uid(), 0);
    }

    #[test]
    fn custom_config_is_restricted_to_root() {
        let user = Caller { uid: 1000, gid: 1000 };
        let root = Caller { uid: 0, gid: 0 };
        let custom = Path::new("/tmp/jail.json");

        assert!(config_path(user, custom).is_err());
        assert_eq!(
            config_path(user, Path::new(DEFAULT_CONFIG_PATH)).unwrap(),
            PathBuf::from(DEFAULT_CONFIG_PATH)
        );
        assert_eq!(config_path(root, custom).unwrap(), custom.to_path_buf());
    }
}
