//! Attaching a new process to a running sandbox.
//!
//! The joiner resolves the target, checks that the caller may enter it,
//! inherits the sandbox's restrictions and enters its namespaces. It then
//! forks: the child finishes the transition and execs the command while the
//! parent waits for it.

pub mod exec;
pub mod identity;
pub mod procfs;

pub use identity::SandboxIdentity;
pub use procfs::{resolve_target, sandbox_init, ProcFs};

use crate::config::options::JoinOptions;
use crate::config::types::{JailError, Result};
use crate::fs::rundir::RunLayout;
use crate::kernel::capabilities::install_bounding_set;
use crate::kernel::cgroup::attach_process;
use crate::kernel::cpu::apply_cpu_mask;
use crate::kernel::credentials::drop_privs;
use crate::kernel::namespace::{join_namespace, NsKind, FULL_JOIN};
use crate::kernel::privileged::{as_root, Caller, PrivilegedOps, RootToken};
use crate::kernel::seccomp::SeccompProgram;
use crate::kernel::signal::{install_terminate_handler, kill_on_parent_death};
use nix::errno::Errno;
use nix::sys::wait::waitpid;
use nix::unistd::{fork, ForkResult};
use std::convert::Infallible;
use std::path::PathBuf;
use std::rc::Rc;

/// Everything decided before the namespaces are entered
#[derive(Debug)]
pub struct JoinPlan {
    pub pid: i32,
    pub identity: SandboxIdentity,
    pub protocol: Option<String>,
    pub protocol_filter: Option<SeccompProgram>,
    pub seccomp_filter: Option<SeccompProgram>,
    /// Set PR_SET_NO_NEW_PRIVS before the filters; root joiners keep setuid gains
    pub no_new_privs: bool,
}

/// Namespaces to enter for `opts`, in entry order.
pub fn namespaces_for(opts: &JoinOptions) -> Vec<NsKind> {
    if opts.join_network {
        vec![NsKind::Net]
    } else if opts.join_filesystem {
        vec![NsKind::Mnt]
    } else {
        FULL_JOIN.to_vec()
    }
}

pub struct Joiner {
    ops: Rc<dyn PrivilegedOps>,
    proc: ProcFs,
    layout: RunLayout,
    caller: Caller,
}

impl Joiner {
    pub fn new(ops: Rc<dyn PrivilegedOps>, layout: RunLayout) -> Self {
        let caller = ops.caller();
        Self {
            ops,
            proc: ProcFs::default(),
            layout,
            caller,
        }
    }

    pub fn with_procfs(mut self, proc: ProcFs) -> Self {
        self.proc = proc;
        self
    }

    /// Pid of the process to join.
    pub fn resolve(&self, target: &str) -> Result<i32> {
        let pid = resolve_target(&self.proc, &self.layout.name_dir, target)?;
        Ok(sandbox_init(&self.proc, pid))
    }

    /// Non-root callers may only join their own sandboxes.
    pub fn authorize(&self, pid: i32) -> Result<()> {
        if self.caller.is_root() {
            return Ok(());
        }
        let owner = self
            .proc
            .uid(pid)
            .ok_or_else(|| JailError::SandboxNotFound(pid.to_string()))?;
        if owner != self.caller.uid {
            return Err(JailError::PermissionDenied(
                "permission is denied to join a sandbox created by a different user.".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve, authorize and capture what the child has to inherit.
    pub fn prepare(&self, opts: &JoinOptions) -> Result<JoinPlan> {
        let pid = self.resolve(&opts.target)?;
        self.authorize(pid)?;

        as_root(self.ops.as_ref(), |_tok| {
            // root is trusted to pick its own restrictions
            let identity = if self.caller.is_root() {
                SandboxIdentity::unrestricted(pid)
            } else {
                SandboxIdentity::capture(&self.proc, pid, &self.layout)?
            };

            let protocol = opts.protocol.clone().or_else(|| identity.protocol.clone());
            let protocol_filter = match protocol {
                Some(_) => Some(SeccompProgram::load(
                    &self.proc.root_file(pid, &self.layout.seccomp_protocol_filter()),
                )?),
                None => None,
            };
            let seccomp_filter = if identity.seccomp {
                Some(SeccompProgram::load(
                    &self.proc.root_file(pid, &self.layout.seccomp_filter()),
                )?)
            } else {
                None
            };

            Ok(JoinPlan {
                pid,
                identity,
                protocol,
                protocol_filter,
                seccomp_filter,
                no_new_privs: !self.caller.is_root(),
            })
        })
    }

    /// Join the sandbox named by `opts`. Returns once the joined command exits.
    pub fn run(&self, opts: &JoinOptions) -> Result<()> {
        let plan = self.prepare(opts)?;
        log::info!("joining sandbox {}", plan.pid);

        as_root(self.ops.as_ref(), |tok| {
            if let Some(membership) = &plan.identity.cgroup {
                attach_process(membership, std::process::id())?;
            }
            for kind in namespaces_for(opts) {
                join_namespace(self.proc.root(), plan.pid, kind)?;
            }

            // SAFETY: the process is single-threaded; the child only runs
            // the setup below and then execs or exits.
            match unsafe { fork() }.map_err(|e| JailError::Process(format!("fork failed: {}", e)))? {
                ForkResult::Child => match self.enter(tok, &plan, opts) {
                    Ok(never) => match never {},
                    Err(err) => {
                        log::error!("{}", err);
                        std::process::exit(1);
                    }
                },
                ForkResult::Parent { child } => {
                    install_terminate_handler()?;
                    loop {
                        match waitpid(child, None) {
                            Err(Errno::EINTR) => continue,
                            Err(e) => {
                                return Err(JailError::Process(format!("waitpid failed: {}", e)))
                            }
                            Ok(_) => break,
                        }
                    }
                    // SAFETY: tcflush only takes a descriptor and a constant.
                    unsafe {
                        libc::tcflush(libc::STDIN_FILENO, libc::TCIOFLUSH);
                    }
                    Ok(())
                }
            }
        })
    }

    /// Child side of the join: chroot, restrictions, identity, exec.
    fn enter(&self, tok: &RootToken, plan: &JoinPlan, opts: &JoinOptions) -> Result<Infallible> {
        kill_on_parent_death()?;

        if !opts.join_network {
            let root = self.proc.sandbox_root(plan.pid);
            // only sandboxes started on a different root make this succeed
            match self.ops.chroot(tok, &root) {
                Ok(()) => log::info!("changing root to {}", root.display()),
                Err(e) => log::debug!("no chroot into {}: {}", root.display(), e),
            }
        }
        exec::enter_directory(None, &opts.home)?;

        let id = &plan.identity;
        if let Some(mask) = id.cpu_mask {
            apply_cpu_mask(mask)?;
        }
        if let Some(caps) = id.caps {
            install_bounding_set(caps)?;
        }
        if let Some(filter) = &plan.protocol_filter {
            log::debug!("protocol filter {:?}", plan.protocol);
            filter.install(plan.no_new_privs)?;
        }
        if let Some(filter) = &plan.seccomp_filter {
            filter.install(plan.no_new_privs)?;
        }

        let prompt = std::env::var("FIREJAIL_PROMPT").ok();
        for (key, value) in exec::join_environment(prompt.as_deref()) {
            std::env::set_var(key, value);
        }

        if id.noroot {
            log::debug!("Joining user namespace");
            join_namespace(self.proc.root(), 1, NsKind::User)?;
            // entering a user namespace resets the capability sets
            if let Some(caps) = id.caps {
                install_bounding_set(caps)?;
            }
        } else {
            drop_privs(self.caller, id.nogroups)?;
        }

        if let Some(increment) = opts.nice {
            exec::apply_nice(increment);
        }

        let argv = self.command_argv(opts)?;
        exec::enter_directory(opts.cwd.as_deref(), &opts.home)?;
        exec::exec_argv(&argv)
    }

    fn command_argv(&self, opts: &JoinOptions) -> Result<Vec<String>> {
        let shell: PathBuf = match &opts.shell {
            Some(shell) => shell.clone(),
            None => exec::guess_shell().ok_or_else(|| {
                JailError::Config(
                    "no POSIX shell found, please use --shell command line option".to_string(),
                )
            })?,
        };
        if !shell.exists() {
            return Err(JailError::Config(format!(
                "{} shell not found inside the sandbox",
                shell.display()
            )));
        }
        Ok(exec::shell_argv(&shell, &opts.command))
    }
}
