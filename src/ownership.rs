//! Ownership metadata (user, group, mode) carried by file-producing steps.

use crate::error::{Result, RigupError};
use nix::unistd::{self, Gid, Group, Uid, User};
use serde::{Deserialize, Serialize};
use std::fs;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;
use tracing::debug;

/// Desired owner, group and permission bits of a path.
///
/// Every field is optional; an unset field is neither checked nor applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ownership {
    pub owner: Option<String>,
    pub group: Option<String>,
    pub mode: Option<u32>,
}

impl Ownership {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Whether `path` already carries the requested metadata.
    ///
    /// A missing path is never satisfied.
    pub fn is_satisfied(&self, path: &Path) -> Result<bool> {
        let meta = match fs::metadata(path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        if let Some(mode) = self.mode {
            if meta.permissions().mode() & 0o7777 != mode {
                return Ok(false);
            }
        }
        if let Some(ref owner) = self.owner {
            if meta.uid() != resolve_uid(owner)?.as_raw() {
                return Ok(false);
            }
        }
        if let Some(ref group) = self.group {
            if meta.gid() != resolve_gid(group)?.as_raw() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Apply the requested metadata to `path`.
    pub fn apply(&self, path: &Path) -> Result<()> {
        if self.owner.is_some() || self.group.is_some() {
            let uid = self.owner.as_deref().map(resolve_uid).transpose()?;
            let gid = self.group.as_deref().map(resolve_gid).transpose()?;
            unistd::chown(path, uid, gid).map_err(|e| {
                RigupError::config(format!("chown {} failed: {}", path.display(), e))
            })?;
            debug!("chown {} {:?}:{:?}", path.display(), self.owner, self.group);
        }
        if let Some(mode) = self.mode {
            fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
            debug!("chmod {:o} {}", mode, path.display());
        }
        Ok(())
    }
}

/// Resolve a user name (or numeric uid) to a uid.
pub fn resolve_uid(name: &str) -> Result<Uid> {
    if let Ok(raw) = name.parse::<u32>() {
        return Ok(Uid::from_raw(raw));
    }
    match User::from_name(name) {
        Ok(Some(user)) => Ok(user.uid),
        Ok(None) => Err(RigupError::config(format!("unknown user '{}'", name))),
        Err(e) => Err(RigupError::config(format!("user lookup for '{}' failed: {}", name, e))),
    }
}

/// Resolve a group name (or numeric gid) to a gid.
pub fn resolve_gid(name: &str) -> Result<Gid> {
    if let Ok(raw) = name.parse::<u32>() {
        return Ok(Gid::from_raw(raw));
    }
    match Group::from_name(name) {
        Ok(Some(group)) => Ok(group.gid),
        Ok(None) => Err(RigupError::config(format!("unknown group '{}'", name))),
        Err(e) => Err(RigupError::config(format!("group lookup for '{}' failed: {}", name, e))),
    }
}

/// Whether the current process runs with root privileges.
pub fn running_as_root() -> bool {
    Uid::effective().is_root()
}
