/// Signal plumbing for the join parent and child
use crate::config::types::{JailError, Result};
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};

/// Async-safe SIGTERM handler for the waiting parent.
///
/// Only async-signal-safe calls: discard pending terminal input, then exit
/// with the signal number.
extern "C" fn flush_and_exit(sig: libc::c_int) {
    // SAFETY: tcflush and _exit are async-signal-safe.
    unsafe {
        libc::tcflush(libc::STDIN_FILENO, libc::TCIOFLUSH);
        libc::_exit(sig);
    }
}

/// Install the terminal-flushing SIGTERM handler.
pub fn install_terminate_handler() -> Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(flush_and_exit),
        SaFlags::empty(),
        SigSet::empty(),
    );
    // SAFETY: the handler only calls async-signal-safe functions.
    unsafe {
        signal::sigaction(Signal::SIGTERM, &action)
            .map_err(|e| JailError::Process(format!("Failed to install SIGTERM handler: {}", e)))?;
    }
    log::debug!("SIGTERM handler installed");
    Ok(())
}

/// Deliver SIGKILL to the caller when its parent exits.
pub fn kill_on_parent_death() -> Result<()> {
    nix::sys::prctl::set_pdeathsig(Signal::SIGKILL)
        .map_err(|e| JailError::Process(format!("Failed to set parent death signal: {}", e)))
}
