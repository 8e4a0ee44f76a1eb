/// Collaborators invoked once the root is staged
use crate::config::types::Result;

/// Post-root setup steps owned by other subsystems
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FsHook {
    DevShm,
    VarLock,
    VarTmp,
    VarLog,
    VarLib,
    VarCache,
    VarUtmp,
    RestrictUsers,
}

/// Hooks in invocation order; `DevShm` is dropped under private-dev
pub const STANDARD_HOOKS: [FsHook; 8] = [
    FsHook::DevShm,
    FsHook::VarLock,
    FsHook::VarTmp,
    FsHook::VarLog,
    FsHook::VarLib,
    FsHook::VarCache,
    FsHook::VarUtmp,
    FsHook::RestrictUsers,
];

pub trait FsHooks {
    fn run(&mut self, hook: FsHook) -> Result<()>;
}

/// Hook runner for builds without the collaborating subsystems
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl FsHooks for NoopHooks {
    fn run(&mut self, hook: FsHook) -> Result<()> {
        log::debug!("no handler for {:?}", hook);
        Ok(())
    }
}
