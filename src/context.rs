//! Per-process sandbox state.
//!
//! Holds what the mount layer shares between steps: the privileged backend,
//! the run directory layout, configuration, the outcome of the last disable
//! primitive and the audit logger.

use crate::config::types::Result;
use crate::config::JailConfig;
use crate::fs::hooks::{FsHooks, NoopHooks};
use crate::fs::rundir::RunLayout;
use crate::kernel::privileged::{self, Caller, PrivilegedOps, RootToken};
use crate::observability::{FsLogFile, FsLogger};
use std::rc::Rc;

/// Outcome of the most recent blacklist or tmpfs primitive
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LastDisable {
    Success,
    #[default]
    Fail,
}

pub struct SandboxContext {
    pub(crate) ops: Rc<dyn PrivilegedOps>,
    pub layout: RunLayout,
    pub config: JailConfig,
    pub caller: Caller,
    pub last_disable: LastDisable,
    pub logger: Box<dyn FsLogger>,
    pub hooks: Box<dyn FsHooks>,
    warnings: Vec<String>,
}

impl SandboxContext {
    pub fn new(ops: Rc<dyn PrivilegedOps>, config: JailConfig) -> Self {
        let caller = ops.caller();
        Self {
            layout: RunLayout::new(&config.run_base),
            ops,
            config,
            caller,
            last_disable: LastDisable::default(),
            logger: Box::new(FsLogFile::new()),
            hooks: Box::new(NoopHooks),
            warnings: Vec::new(),
        }
    }

    pub fn with_logger(mut self, logger: Box<dyn FsLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_hooks(mut self, hooks: Box<dyn FsHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn ops(&self) -> &dyn PrivilegedOps {
        self.ops.as_ref()
    }

    pub fn is_root_caller(&self) -> bool {
        self.caller.is_root()
    }

    /// Run `f` with effective root; ids are restored on every exit path.
    pub fn as_root<T>(&mut self, f: impl FnOnce(&mut Self, &RootToken) -> Result<T>) -> Result<T> {
        let ops = Rc::clone(&self.ops);
        privileged::as_root(ops.as_ref(), |tok| f(self, tok))
    }

    /// Run `f` with the caller's effective ids.
    pub fn as_user<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let ops = Rc::clone(&self.ops);
        privileged::as_user(ops.as_ref(), || f(self))
    }

    /// Emit a user-facing warning and keep it for the caller.
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        log::warn!("{}", message);
        self.warnings.push(message);
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub(crate) fn warnings_since(&self, mark: usize) -> Vec<String> {
        self.warnings[mark.min(self.warnings.len())..].to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingOps;

    #[test]
    fn as_root_hands_out_token_and_restores() {
        let ops = Rc::new(RecordingOps::new(1000, 1000));
        let mut ctx = SandboxContext::new(ops.clone(), JailConfig::default());
        assert!(!ctx.is_root_caller());

        let euid_inside = ctx.as_root(|ctx, _tok| Ok(ctx.ops().raise().map(|p| p.euid)?)).unwrap();
        assert_eq!(euid_inside, 0);
        assert_eq!(ops.effective_uid(), 1000);
    }

    #[test]
    fn warnings_are_collected_in_order() {
        let ops = Rc::new(RecordingOps::new(0, 0));
        let mut ctx = SandboxContext::new(ops, JailConfig::default());
        ctx.warn("first");
        let mark = ctx.warnings().len();
        ctx.warn("second");
        assert_eq!(ctx.warnings(), ["first", "second"]);
        assert_eq!(ctx.warnings_since(mark), vec!["second".to_string()]);
    }
}
