//! Steps: an identified resource plus its guards and notifications.
//!
//! Steps are declared with a small builder:
//!
//! ```
//! use rigup::step::{Step, StepId};
//! use rigup::types::{StepKind, Timing};
//!
//! let conf = Step::file("/etc/ld.so.conf.d/caffe.conf", "/usr/local/cuda/lib")
//!     .user("root")
//!     .group("root")
//!     .notifies(StepId::new(StepKind::Execute, "ldconfig"), Timing::Immediate);
//! assert_eq!(conf.id.to_string(), "file[/etc/ld.so.conf.d/caffe.conf]");
//! ```

use crate::command::{CommandRunner, CommandSpec};
use crate::error::Result;
use crate::guard::Guard;
use crate::resource::Resource;
use crate::template::TemplateVars;
use crate::types::{StepKind, Timing};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Unique identity of a step within a recipe, rendered `kind[name]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepId {
    pub kind: StepKind,
    pub name: String,
}

impl StepId {
    pub fn new(kind: StepKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.kind, self.name)
    }
}

impl FromStr for StepId {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (kind, rest) = s
            .split_once('[')
            .ok_or_else(|| format!("'{}' is not of the form kind[name]", s))?;
        let name = rest
            .strip_suffix(']')
            .ok_or_else(|| format!("'{}' is missing the closing ']'", s))?;
        let kind = kind
            .parse::<StepKind>()
            .map_err(|_| format!("unknown step kind '{}'", kind))?;
        Ok(Self::new(kind, name))
    }
}

/// A trigger from one step to another, fired only when the source changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub target: StepId,
    pub timing: Timing,
}

/// One declared provisioning step.
#[derive(Debug, Clone)]
pub struct Step {
    pub id: StepId,
    pub resource: Resource,
    pub guards: Vec<Guard>,
    pub notifications: Vec<Notification>,
    /// Skipped by the linear pass; runs only when notified.
    pub trigger_only: bool,
    /// Action failures are recorded instead of aborting the run.
    pub best_effort: bool,
}

impl Step {
    fn declare(kind: StepKind, name: impl Into<String>, resource: Resource) -> Self {
        Self {
            id: StepId::new(kind, name),
            resource,
            guards: Vec::new(),
            notifications: Vec::new(),
            trigger_only: false,
            best_effort: false,
        }
    }

    /// `execute[name]` running `command` through `sh -c`.
    pub fn execute(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self::declare(
            StepKind::Execute,
            name,
            Resource::Execute {
                spec: CommandSpec::shell(command),
            },
        )
    }

    /// `bash[name]` running `code` through `bash -c`.
    pub fn bash(name: impl Into<String>, code: impl Into<String>) -> Self {
        Self::declare(
            StepKind::Bash,
            name,
            Resource::Execute {
                spec: CommandSpec::new("bash").arg("-c").arg(code),
            },
        )
    }

    pub fn package(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::declare(StepKind::Package, name.clone(), Resource::Package { name })
    }

    pub fn directory(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        Self::declare(
            StepKind::Directory,
            path.display().to_string(),
            Resource::Directory {
                path,
                ownership: Default::default(),
            },
        )
    }

    pub fn remote_file(path: impl AsRef<Path>, url: impl Into<String>) -> Self {
        let path = path.as_ref().to_path_buf();
        Self::declare(
            StepKind::RemoteFile,
            path.display().to_string(),
            Resource::RemoteFile {
                path,
                url: url.into(),
                ownership: Default::default(),
            },
        )
    }

    pub fn cookbook_file(path: impl AsRef<Path>, source: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        Self::declare(
            StepKind::CookbookFile,
            path.display().to_string(),
            Resource::CookbookFile {
                path,
                source: source.as_ref().to_path_buf(),
                ownership: Default::default(),
            },
        )
    }

    pub fn file(path: impl AsRef<Path>, content: impl Into<String>) -> Self {
        let path = path.as_ref().to_path_buf();
        Self::declare(
            StepKind::File,
            path.display().to_string(),
            Resource::File {
                path,
                content: content.into(),
                ownership: Default::default(),
            },
        )
    }

    pub fn template(path: impl AsRef<Path>, source: impl Into<String>, vars: TemplateVars) -> Self {
        let path = path.as_ref().to_path_buf();
        Self::declare(
            StepKind::Template,
            path.display().to_string(),
            Resource::Template {
                path,
                source: source.into(),
                vars,
                ownership: Default::default(),
            },
        )
    }

    pub fn link(path: impl AsRef<Path>, to: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        Self::declare(
            StepKind::Link,
            path.display().to_string(),
            Resource::Link {
                path,
                to: to.as_ref().to_path_buf(),
            },
        )
    }

    pub fn git(
        path: impl AsRef<Path>,
        repository: impl Into<String>,
        revision: impl Into<String>,
    ) -> Self {
        let path = path.as_ref().to_path_buf();
        Self::declare(
            StepKind::Git,
            path.display().to_string(),
            Resource::Git {
                path,
                repository: repository.into(),
                revision: revision.into(),
                user: None,
                group: None,
            },
        )
    }

    /// `cron_d[name]`, written to `<cron_dir>/<name>` and run as root.
    pub fn cron_d(
        name: impl Into<String>,
        cron_dir: impl AsRef<Path>,
        schedule: impl Into<String>,
        command: impl Into<String>,
    ) -> Self {
        let name = name.into();
        Self::declare(
            StepKind::CronD,
            name.clone(),
            Resource::CronD {
                path: cron_dir.as_ref().join(&name),
                schedule: schedule.into(),
                user: "root".to_string(),
                command: command.into(),
            },
        )
    }

    /// `shell_environment[name]`, written to `<profile_dir>/<name>.sh`.
    pub fn shell_environment(
        name: impl Into<String>,
        profile_dir: impl AsRef<Path>,
        value: impl Into<String>,
    ) -> Self {
        let name = name.into();
        Self::declare(
            StepKind::ShellEnvironment,
            name.clone(),
            Resource::ShellEnvironment {
                path: profile_dir.as_ref().join(format!("{}.sh", name)),
                name,
                value: value.into(),
            },
        )
    }

    // ------------------------------------------------------------------
    // Modifiers
    // ------------------------------------------------------------------

    /// Owner of produced files, or the user commands and checkouts run as.
    pub fn user(mut self, user: impl Into<String>) -> Self {
        let user = user.into();
        match &mut self.resource {
            Resource::Execute { spec } => spec.user = Some(user),
            Resource::Git { user: u, .. } => *u = Some(user),
            Resource::CronD { user: u, .. } => *u = user,
            other => {
                if let Some(ownership) = other.ownership_mut() {
                    ownership.owner = Some(user);
                }
            }
        }
        self
    }

    /// Group of produced files, or the group commands and checkouts run as.
    pub fn group(mut self, group: impl Into<String>) -> Self {
        let group = group.into();
        match &mut self.resource {
            Resource::Execute { spec } => spec.group = Some(group),
            Resource::Git { group: g, .. } => *g = Some(group),
            other => {
                if let Some(ownership) = other.ownership_mut() {
                    ownership.group = Some(group);
                }
            }
        }
        self
    }

    pub fn mode(mut self, mode: u32) -> Self {
        if let Some(ownership) = self.resource.ownership_mut() {
            ownership.mode = Some(mode);
        }
        self
    }

    /// Working directory for `execute`/`bash` steps.
    pub fn cwd(mut self, dir: impl AsRef<Path>) -> Self {
        if let Resource::Execute { spec } = &mut self.resource {
            spec.cwd = Some(dir.as_ref().to_path_buf());
        }
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let Resource::Execute { spec } = &mut self.resource {
            spec.env.push((key.into(), value.into()));
        }
        self
    }

    /// Skip when `path` exists.
    pub fn creates(mut self, path: impl Into<PathBuf>) -> Self {
        self.guards.push(Guard::PathExists(path.into()));
        self
    }

    /// Skip when the shell command succeeds.
    pub fn not_if(mut self, command: impl Into<String>) -> Self {
        self.guards.push(Guard::NotIf(CommandSpec::shell(command)));
        self
    }

    /// Skip unless the shell command succeeds.
    pub fn only_if(mut self, command: impl Into<String>) -> Self {
        self.guards.push(Guard::OnlyIf(CommandSpec::shell(command)));
        self
    }

    pub fn notifies(mut self, target: StepId, timing: Timing) -> Self {
        self.notifications.push(Notification { target, timing });
        self
    }

    pub fn trigger_only(mut self) -> Self {
        self.trigger_only = true;
        self
    }

    pub fn best_effort(mut self) -> Self {
        self.best_effort = true;
        self
    }

    // ------------------------------------------------------------------
    // Guard / act / notify
    // ------------------------------------------------------------------

    /// Whether the step's effect already holds.
    ///
    /// Explicit guards are consulted first, then the resource's own check.
    /// Failures are attributed to this step as guard errors.
    pub fn is_satisfied(&self, runner: &mut dyn CommandRunner) -> Result<bool> {
        let id = self.id.to_string();
        for guard in &self.guards {
            if guard.is_satisfied(runner).map_err(|e| e.into_guard(&id))? {
                tracing::debug!("{}: guard satisfied ({})", id, guard);
                return Ok(true);
            }
        }
        self.resource
            .is_satisfied(runner)
            .map_err(|e| e.into_guard(&id))
    }

    /// Perform the step's action. Failures are attributed as action errors.
    pub fn apply(&self, runner: &mut dyn CommandRunner) -> Result<()> {
        self.resource
            .apply(runner)
            .map_err(|e| e.into_action(&self.id.to_string()))
    }

    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }
}
