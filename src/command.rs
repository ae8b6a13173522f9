//! Subprocess execution for guards and actions.
//!
//! Every external tool rigup relies on (apt-get, dpkg, git, make, pip, curl)
//! is invoked through the [`CommandRunner`] trait. Production code uses
//! [`SystemRunner`]; tests substitute a recorder that scripts the exit codes.
//!
//! # Architecture Rule
//!
//! Resources never call `std::process::Command` directly. Going through the
//! runner keeps dry-run, logging and test doubles in one place.

use crate::error::{Result, RigupError};
use crate::ownership;
use std::fmt;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, info};

/// A fully described subprocess invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program to execute (resolved through `PATH`).
    pub program: String,
    /// Arguments passed verbatim.
    pub args: Vec<String>,
    /// Working directory, if not the current one.
    pub cwd: Option<PathBuf>,
    /// Run as this user (requires privileges).
    pub user: Option<String>,
    /// Run with this primary group (requires privileges).
    pub group: Option<String>,
    /// Extra environment variables.
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    /// Invoke `program` directly with no arguments yet.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            user: None,
            group: None,
            env: Vec::new(),
        }
    }

    /// Run a command line through `sh -c`.
    pub fn shell(line: impl Into<String>) -> Self {
        Self::new("sh").arg("-c").arg(line)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Set the user and group the command runs as. `None` keeps the caller's.
    pub fn run_as(mut self, user: Option<&str>, group: Option<&str>) -> Self {
        self.user = user.map(str::to_string);
        self.group = group.map(str::to_string);
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Whether this spec wraps a shell line (`sh -c ...`).
    pub fn is_shell(&self) -> bool {
        self.program == "sh" && self.args.len() == 2 && self.args[0] == "-c"
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_shell() {
            return write!(f, "{}", self.args[1]);
        }
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Output from a command execution.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
    /// Exit code (None if terminated by signal).
    pub exit_code: Option<i32>,
    /// Whether the command exited successfully (exit code 0).
    pub success: bool,
}

impl CommandOutput {
    /// A successful output with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: Some(0),
            success: true,
        }
    }

    /// A failed output with the given exit code and stderr.
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code: Some(code),
            success: false,
        }
    }

    /// Check if the command succeeded and return an error if not.
    pub fn ensure_success(&self, context: &str) -> Result<()> {
        if self.success {
            Ok(())
        } else {
            let code = self.exit_code.unwrap_or(-1);
            Err(RigupError::command(format!(
                "{} failed (exit code {}): {}",
                context,
                code,
                self.stderr.trim()
            )))
        }
    }
}

/// Seam between resources and the processes they spawn.
///
/// Implementations return `Err` only when the process could not be started;
/// a non-zero exit is reported through [`CommandOutput::success`].
pub trait CommandRunner {
    fn run(&mut self, spec: &CommandSpec) -> Result<CommandOutput>;
}

/// Runs commands on the local machine and captures their output.
#[derive(Debug, Default)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

impl CommandRunner for SystemRunner {
    fn run(&mut self, spec: &CommandSpec) -> Result<CommandOutput> {
        info!("exec: {} cwd={:?} user={:?}", spec, spec.cwd, spec.user);

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(ref dir) = spec.cwd {
            cmd.current_dir(dir);
        }
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }
        // gid before uid: once the uid drops, changing the group is refused
        if let Some(ref group) = spec.group {
            cmd.gid(ownership::resolve_gid(group)?.as_raw());
        }
        if let Some(ref user) = spec.user {
            cmd.uid(ownership::resolve_uid(user)?.as_raw());
        }

        let output = cmd
            .output()
            .map_err(|e| RigupError::command(format!("failed to spawn `{}`: {}", spec, e)))?;

        let result = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code(),
            success: output.status.success(),
        };
        debug!(
            "exit: {} code={:?} stderr={}",
            spec,
            result.exit_code,
            result.stderr.trim()
        );
        Ok(result)
    }
}
