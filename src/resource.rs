//! Resource kinds: the idempotent `check + apply` primitives behind each step.
//!
//! Each variant knows two things:
//!
//! - `is_satisfied()`: whether its effect already holds on the machine
//! - `apply()`: how to make it hold
//!
//! Invariant: after a successful `apply()`, `is_satisfied()` reports `true`
//! for every kind except `Execute`, which has no observable effect of its own
//! and relies on explicit guards (`creates`, `not_if`).

use crate::command::{CommandRunner, CommandSpec};
use crate::error::{Result, RigupError};
use crate::ownership::Ownership;
use crate::template::{self, TemplateVars};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// dpkg status line for an installed package.
const DPKG_INSTALLED: &str = "install ok installed";

#[derive(Debug, Clone)]
pub enum Resource {
    /// Run a command; never satisfied on its own.
    Execute { spec: CommandSpec },

    /// An OS package installed through apt.
    Package { name: String },

    /// A directory.
    Directory { path: PathBuf, ownership: Ownership },

    /// A file downloaded once from a URL (create-if-missing).
    RemoteFile {
        path: PathBuf,
        url: String,
        ownership: Ownership,
    },

    /// A file copied from the bundled files directory.
    CookbookFile {
        path: PathBuf,
        source: PathBuf,
        ownership: Ownership,
    },

    /// A file with literal content.
    File {
        path: PathBuf,
        content: String,
        ownership: Ownership,
    },

    /// A file rendered from a template and variable bindings.
    Template {
        path: PathBuf,
        source: String,
        vars: TemplateVars,
        ownership: Ownership,
    },

    /// A symbolic link `path -> to`.
    Link { path: PathBuf, to: PathBuf },

    /// A git checkout pinned to a revision.
    Git {
        path: PathBuf,
        repository: String,
        revision: String,
        user: Option<String>,
        group: Option<String>,
    },

    /// A cron.d entry file.
    CronD {
        path: PathBuf,
        schedule: String,
        user: String,
        command: String,
    },

    /// A profile.d script exporting one environment variable.
    ShellEnvironment {
        path: PathBuf,
        name: String,
        value: String,
    },
}

impl Resource {
    /// Whether the resource's effect already holds.
    pub fn is_satisfied(&self, runner: &mut dyn CommandRunner) -> Result<bool> {
        match self {
            Self::Execute { .. } => Ok(false),
            Self::Package { name } => package_installed(runner, name),
            Self::Directory { path, ownership } => {
                Ok(path.is_dir() && ownership.is_satisfied(path)?)
            }
            Self::RemoteFile {
                path, ownership, ..
            } => Ok(path.exists() && ownership.is_satisfied(path)?),
            Self::CookbookFile {
                path,
                source,
                ownership,
            } => {
                let wanted = fs::read(source).map_err(|e| {
                    RigupError::config(format!("cannot read {}: {}", source.display(), e))
                })?;
                Ok(read_bytes(path)?.is_some_and(|have| have == wanted)
                    && ownership.is_satisfied(path)?)
            }
            Self::Link { path, to } => match fs::read_link(path) {
                Ok(target) => Ok(&target == to),
                Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::InvalidInput) => {
                    Ok(false)
                }
                Err(e) => Err(e.into()),
            },
            Self::Git {
                path,
                revision,
                user,
                group,
                ..
            } => {
                if !path.join(".git").exists() {
                    return Ok(false);
                }
                // git refuses to read a checkout owned by another uid
                let rev_parse = git(path)
                    .args(["rev-parse", "HEAD"])
                    .run_as(user.as_deref(), group.as_deref());
                let head = runner.run(&rev_parse)?;
                Ok(head.success && head.stdout.trim() == revision)
            }
            Self::File { path, .. }
            | Self::Template { path, .. }
            | Self::CronD { path, .. }
            | Self::ShellEnvironment { path, .. } => {
                let wanted = self.rendered_content()?.unwrap_or_default();
                if !read_bytes(path)?.is_some_and(|bytes| bytes == wanted.as_bytes()) {
                    return Ok(false);
                }
                match self.ownership() {
                    Some(ownership) => ownership.is_satisfied(path),
                    None => Ok(true),
                }
            }
        }
    }

    /// Make the resource's effect hold.
    pub fn apply(&self, runner: &mut dyn CommandRunner) -> Result<()> {
        match self {
            Self::Execute { spec } => runner.run(spec)?.ensure_success(&spec.to_string()),
            Self::Package { name } => {
                let spec = CommandSpec::new("apt-get")
                    .args(["-q", "-y", "install", name.as_str()])
                    .env("DEBIAN_FRONTEND", "noninteractive");
                runner.run(&spec)?.ensure_success(&spec.to_string())
            }
            Self::Directory { path, ownership } => {
                fs::create_dir_all(path)?;
                ownership.apply(path)
            }
            Self::RemoteFile {
                path,
                url,
                ownership,
            } => {
                if !path.exists() {
                    download(runner, url, path)?;
                }
                ownership.apply(path)
            }
            Self::CookbookFile {
                path,
                source,
                ownership,
            } => {
                fs::copy(source, path)?;
                ownership.apply(path)
            }
            Self::Link { path, to } => {
                if path.symlink_metadata().is_ok() {
                    debug!("replacing existing {}", path.display());
                    fs::remove_file(path)?;
                }
                std::os::unix::fs::symlink(to, path)?;
                Ok(())
            }
            Self::Git {
                path,
                repository,
                revision,
                user,
                group,
            } => {
                let (user, group) = (user.as_deref(), group.as_deref());
                if !path.join(".git").exists() {
                    let clone = CommandSpec::new("git")
                        .args(["clone", "--quiet", repository.as_str()])
                        .arg(path.display().to_string())
                        .run_as(user, group);
                    runner.run(&clone)?.ensure_success(&clone.to_string())?;
                }
                let fetch = git(path)
                    .args(["fetch", "--quiet", "origin"])
                    .run_as(user, group);
                runner.run(&fetch)?.ensure_success(&fetch.to_string())?;
                let checkout = git(path)
                    .args(["checkout", "--quiet", "-B", "deploy", revision.as_str()])
                    .run_as(user, group);
                runner.run(&checkout)?.ensure_success(&checkout.to_string())
            }
            Self::File { path, .. }
            | Self::Template { path, .. }
            | Self::CronD { path, .. }
            | Self::ShellEnvironment { path, .. } => {
                let content = self.rendered_content()?.unwrap_or_default();
                fs::write(path, content)?;
                match self.ownership() {
                    Some(ownership) => ownership.apply(path),
                    None => Ok(()),
                }
            }
        }
    }

    /// Content written by content-managed kinds, `None` for the others.
    pub fn rendered_content(&self) -> Result<Option<String>> {
        Ok(match self {
            Self::File { content, .. } => Some(content.clone()),
            Self::Template { source, vars, .. } => Some(template::render(source, vars)?),
            Self::CronD {
                schedule,
                user,
                command,
                ..
            } => Some(format!(
                "# Generated by rigup\n{} {} {}\n",
                schedule, user, command
            )),
            Self::ShellEnvironment { name, value, .. } => {
                Some(format!("export {}=\"{}\"\n", name, value))
            }
            _ => None,
        })
    }

    pub fn ownership(&self) -> Option<&Ownership> {
        match self {
            Self::Directory { ownership, .. }
            | Self::RemoteFile { ownership, .. }
            | Self::CookbookFile { ownership, .. }
            | Self::File { ownership, .. }
            | Self::Template { ownership, .. } => Some(ownership),
            _ => None,
        }
    }

    pub(crate) fn ownership_mut(&mut self) -> Option<&mut Ownership> {
        match self {
            Self::Directory { ownership, .. }
            | Self::RemoteFile { ownership, .. }
            | Self::CookbookFile { ownership, .. }
            | Self::File { ownership, .. }
            | Self::Template { ownership, .. } => Some(ownership),
            _ => None,
        }
    }

    /// One-line description for plans and logs.
    pub fn describe(&self) -> String {
        match self {
            Self::Execute { spec } => format!("run `{}`", spec),
            Self::Package { name } => format!("install package {}", name),
            Self::Directory { path, .. } => format!("directory {}", path.display()),
            Self::RemoteFile { path, url, .. } => {
                format!("fetch {} -> {}", url, path.display())
            }
            Self::CookbookFile { path, source, .. } => {
                format!("copy {} -> {}", source.display(), path.display())
            }
            Self::File { path, .. } => format!("file {}", path.display()),
            Self::Template { path, .. } => format!("render {}", path.display()),
            Self::Link { path, to } => format!("link {} -> {}", path.display(), to.display()),
            Self::Git {
                path,
                repository,
                revision,
                ..
            } => format!("sync {}@{} -> {}", repository, revision, path.display()),
            Self::CronD {
                path, schedule, ..
            } => format!("cron {} ({})", path.display(), schedule),
            Self::ShellEnvironment { name, path, .. } => {
                format!("export {} via {}", name, path.display())
            }
        }
    }
}

fn git(path: &Path) -> CommandSpec {
    CommandSpec::new("git").arg("-C").arg(path.display().to_string())
}

/// Sibling path a download is written to before it is moved into place.
fn partial_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.part", name))
}

/// Fetch `url` into `path`. An interrupted transfer never lands at `path`.
fn download(runner: &mut dyn CommandRunner, url: &str, path: &Path) -> Result<()> {
    let partial = partial_path(path);
    info!("downloading {} -> {}", url, path.display());
    let spec = CommandSpec::new("curl")
        .args(["-fsSL", "-o"])
        .arg(partial.display().to_string())
        .arg(url);
    let fetched = runner
        .run(&spec)
        .and_then(|out| out.ensure_success(&spec.to_string()));
    if let Err(e) = fetched {
        if partial.exists() {
            debug!("removing partial download {}", partial.display());
            let _ = fs::remove_file(&partial);
        }
        return Err(e);
    }
    fs::rename(&partial, path)?;
    Ok(())
}

fn package_installed(runner: &mut dyn CommandRunner, name: &str) -> Result<bool> {
    let query = CommandSpec::new("dpkg-query").args(["-W", "-f=${Status}", name]);
    let out = runner.run(&query)?;
    Ok(out.success && out.stdout.contains(DPKG_INSTALLED))
}

fn read_bytes(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
