//! Launching the command inside a joined sandbox.

use crate::config::types::{JailError, Result};
use nix::errno::Errno;
use nix::unistd::execvp;
use std::convert::Infallible;
use std::ffi::CString;
use std::path::{Path, PathBuf};

/// Probed in order when no shell is configured
pub const SHELL_CANDIDATES: [&str; 5] = ["/bin/bash", "/bin/csh", "/usr/bin/zsh", "/bin/sh", "/bin/ash"];

const PROMPT_COMMAND: &str = r#"export PS1="\[\e[1;32m\][\u@\h \W]\$\[\e[0m\] ""#;

/// First shell candidate present under `root`, as an absolute path below it.
pub fn guess_shell_in(root: &Path) -> Option<PathBuf> {
    SHELL_CANDIDATES
        .iter()
        .find(|shell| root.join(&shell[1..]).exists())
        .map(PathBuf::from)
}

pub fn guess_shell() -> Option<PathBuf> {
    guess_shell_in(Path::new("/"))
}

/// Argument vector that runs `command` through `shell`; an empty command
/// starts the shell itself.
pub fn shell_argv(shell: &Path, command: &[String]) -> Vec<String> {
    let shell = shell.to_string_lossy().into_owned();
    if command.is_empty() {
        vec![shell]
    } else {
        vec![shell, "-c".to_string(), command.join(" ")]
    }
}

/// Variables set in every joined process. `prompt` is the value of
/// `FIREJAIL_PROMPT`.
pub fn join_environment(prompt: Option<&str>) -> Vec<(&'static str, String)> {
    let mut env = vec![
        // Qt 4.8 shared memory does not work across the sandbox boundary
        ("QT_X11_NO_MITSHM", "1".to_string()),
        ("container", "firejail".to_string()),
    ];
    if prompt == Some("yes") {
        env.push(("PROMPT_COMMAND", PROMPT_COMMAND.to_string()));
    }
    env
}

/// Adjust the niceness; failure is only reported.
pub fn apply_nice(increment: i32) {
    Errno::clear();
    // SAFETY: nice(2) takes a plain integer.
    let rc = unsafe { libc::nice(increment) };
    if rc == -1 && Errno::last() != Errno::UnknownErrno {
        log::warn!("cannot set nice value");
    }
}

/// Change to `cwd` when given and reachable; otherwise to `/`, then to
/// `home` if it exists.
pub fn enter_directory(cwd: Option<&Path>, home: &Path) -> Result<()> {
    if let Some(dir) = cwd {
        if std::env::set_current_dir(dir).is_ok() {
            return Ok(());
        }
        log::debug!("cannot change to {}", dir.display());
    }
    std::env::set_current_dir("/")?;
    if home.exists() {
        std::env::set_current_dir(home)?;
    }
    Ok(())
}

/// Replace the process image. Returns only on failure.
pub fn exec_argv(argv: &[String]) -> Result<Infallible> {
    if argv.is_empty() {
        return Err(JailError::Config("empty argv for exec".to_string()));
    }
    let mut cargv = Vec::with_capacity(argv.len());
    for arg in argv {
        let c = CString::new(arg.as_str())
            .map_err(|_| JailError::Config("command contains NUL byte".to_string()))?;
        cargv.push(c);
    }
    log::info!("Executing {:?}", argv);
    execvp(cargv[0].as_c_str(), &cargv)
        .map_err(|e| JailError::Process(format!("execvp {} failed: {}", argv[0], e)))
}
