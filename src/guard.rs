//! Explicit step guards.
//!
//! Guards are checked before a resource's own idempotence test. A step is
//! skipped as soon as any of its guards reports "satisfied".

use crate::command::{CommandRunner, CommandSpec};
use crate::error::Result;
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Guard {
    /// Satisfied when the path exists (`creates`).
    PathExists(PathBuf),
    /// Satisfied when the command exits zero.
    NotIf(CommandSpec),
    /// Satisfied when the command exits non-zero.
    OnlyIf(CommandSpec),
}

impl Guard {
    pub fn is_satisfied(&self, runner: &mut dyn CommandRunner) -> Result<bool> {
        match self {
            Self::PathExists(path) => Ok(path.symlink_metadata().is_ok()),
            Self::NotIf(spec) => Ok(runner.run(spec)?.success),
            Self::OnlyIf(spec) => Ok(!runner.run(spec)?.success),
        }
    }
}

impl fmt::Display for Guard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PathExists(path) => write!(f, "creates {}", path.display()),
            Self::NotIf(spec) => write!(f, "not_if `{}`", spec),
            Self::OnlyIf(spec) => write!(f, "only_if `{}`", spec),
        }
    }
}
