//! On/off state: the disabled-state oracle consulted by every gated
//! invocation, and the marker store mutated by `rmgate toggle`.
//!
//! State is nothing but marker presence on disk, read fresh on every call, so
//! concurrent toggles from other sessions are visible immediately and
//! concurrent creates/deletes converge without locking.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use nix::unistd::{Gid, Uid, User};
use serde::Serialize;

use crate::core::errors::{Result, RmgateError};
use crate::core::paths;

/// Where a disabled marker (or override) lives. Listed in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToggleScope {
    /// `RMGATE_DISABLED=1` for this process only.
    ProcessEnv,
    /// `/etc/rmgate/disabled`
    System,
    /// The sudo-invoking user's own marker.
    OriginalUser,
    /// The current user's marker.
    CurrentUser,
}

impl ToggleScope {
    /// Short human label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::ProcessEnv => "process environment (RMGATE_DISABLED=1)",
            Self::System => "system-wide marker",
            Self::OriginalUser => "invoking user's marker (via sudo)",
            Self::CurrentUser => "user marker",
        }
    }
}

/// Snapshot of everything the oracle needs from the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToggleEnv {
    /// Raw value of `RMGATE_DISABLED`.
    pub process_override: Option<OsString>,
    /// System-wide marker path.
    pub system_marker: PathBuf,
    /// Marker of the user who ran sudo, when elevated.
    pub original_user_marker: Option<PathBuf>,
    /// Marker of the user this process runs as.
    pub current_user_marker: Option<PathBuf>,
    /// Owner to hand created user-scope files back to (sudo case).
    pub original_owner: Option<(Uid, Gid)>,
    /// Whether the process runs with effective uid 0.
    pub is_root: bool,
}

impl ToggleEnv {
    /// Capture the live process environment.
    #[must_use]
    pub fn from_process(system_marker: &Path) -> Self {
        let is_root = nix::unistd::geteuid().is_root();
        let original = if is_root { sudo_user() } else { None };

        Self {
            process_override: std::env::var_os(paths::ENV_DISABLED),
            system_marker: system_marker.to_path_buf(),
            original_user_marker: original
                .as_ref()
                .map(|user| paths::user_marker(&user.dir.join(".config"))),
            current_user_marker: current_config_root().map(|root| paths::user_marker(&root)),
            original_owner: original.map(|user| (user.uid, user.gid)),
            is_root,
        }
    }
}

/// Per-user configuration root: `$XDG_CONFIG_HOME`, else `$HOME/.config`,
/// else the passwd home of the real uid.
fn current_config_root() -> Option<PathBuf> {
    if let Some(root) = std::env::var_os(paths::ENV_CONFIG_HOME).map(PathBuf::from) {
        if root.is_absolute() {
            return Some(root);
        }
    }
    if let Some(home) = std::env::var_os("HOME").filter(|h| !h.is_empty()) {
        return Some(PathBuf::from(home).join(".config"));
    }
    User::from_uid(nix::unistd::getuid())
        .ok()
        .flatten()
        .map(|user| user.dir.join(".config"))
}

/// The unprivileged user behind `sudo`, if any.
fn sudo_user() -> Option<User> {
    let name = std::env::var(paths::ENV_SUDO_USER).ok()?;
    if name.is_empty() || name == "root" {
        return None;
    }
    User::from_name(&name).ok().flatten()
}

fn marker_present(path: &Path) -> bool {
    std::fs::symlink_metadata(path).is_ok()
}

/// Decides whether gating is suppressed for the current invocation.
#[derive(Debug, Clone)]
pub struct DisabledStateOracle {
    env: ToggleEnv,
}

impl DisabledStateOracle {
    /// Oracle over a captured environment.
    #[must_use]
    pub const fn new(env: ToggleEnv) -> Self {
        Self { env }
    }

    /// The highest-precedence scope that disables the gate, if any.
    #[must_use]
    pub fn disabled_by(&self) -> Option<ToggleScope> {
        if self
            .env
            .process_override
            .as_deref()
            .is_some_and(|v| v == "1")
        {
            return Some(ToggleScope::ProcessEnv);
        }
        if marker_present(&self.env.system_marker) {
            return Some(ToggleScope::System);
        }
        if self
            .env
            .original_user_marker
            .as_deref()
            .is_some_and(marker_present)
        {
            return Some(ToggleScope::OriginalUser);
        }
        if self
            .env
            .current_user_marker
            .as_deref()
            .is_some_and(marker_present)
        {
            return Some(ToggleScope::CurrentUser);
        }
        None
    }
}

/// Which marker `rmgate toggle` operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToggleTarget {
    /// The invoking user (the sudo user when elevated).
    User,
    /// System-wide; root only.
    Global,
}

/// Reported by `rmgate toggle status`.
#[derive(Debug, Clone, Serialize)]
pub struct ToggleStatus {
    /// Whether destructive commands are currently gated.
    pub enabled: bool,
    /// Scope responsible when disabled.
    pub disabled_by: Option<ToggleScope>,
    /// Marker `toggle off` would create for this user.
    pub user_marker: Option<PathBuf>,
    /// System-wide marker.
    pub system_marker: PathBuf,
}

/// Creates and deletes disabled markers.
#[derive(Debug, Clone)]
pub struct ToggleStore {
    env: ToggleEnv,
}

impl ToggleStore {
    /// Store acting on the markers named in `env`.
    #[must_use]
    pub const fn new(env: ToggleEnv) -> Self {
        Self { env }
    }

    /// Marker path for `target`.
    pub fn marker_for(&self, target: ToggleTarget) -> Result<PathBuf> {
        match target {
            ToggleTarget::Global => Ok(self.env.system_marker.clone()),
            ToggleTarget::User => self
                .env
                .original_user_marker
                .clone()
                .or_else(|| self.env.current_user_marker.clone())
                .ok_or_else(|| RmgateError::Runtime {
                    details: "cannot determine the user configuration directory".to_string(),
                }),
        }
    }

    /// Turn gating on (`enabled = true`, removes the marker) or off (creates
    /// it). Idempotent. Returns the marker path acted on.
    pub fn set(&self, target: ToggleTarget, enabled: bool) -> Result<PathBuf> {
        if target == ToggleTarget::Global && !self.env.is_root {
            return Err(RmgateError::PermissionDenied {
                details: "changing the system-wide toggle requires root (use sudo)".to_string(),
            });
        }
        let marker = self.marker_for(target)?;
        let owner = match target {
            ToggleTarget::User if self.env.original_user_marker.is_some() => {
                self.env.original_owner
            }
            _ => None,
        };

        if enabled {
            remove_marker(&marker)?;
        } else {
            create_marker(&marker, owner)?;
        }
        Ok(marker)
    }

    /// Effective state as the gate would see it right now.
    #[must_use]
    pub fn status(&self) -> ToggleStatus {
        let disabled_by = DisabledStateOracle::new(self.env.clone()).disabled_by();
        ToggleStatus {
            enabled: disabled_by.is_none(),
            disabled_by,
            user_marker: self.marker_for(ToggleTarget::User).ok(),
            system_marker: self.env.system_marker.clone(),
        }
    }
}

fn remove_marker(marker: &Path) -> Result<()> {
    let result = match std::fs::symlink_metadata(marker) {
        Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(marker),
        Ok(_) => std::fs::remove_file(marker),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => Err(err),
    };
    match result {
        Err(err) if err.kind() != std::io::ErrorKind::NotFound => {
            Err(RmgateError::io(marker, err))
        }
        _ => Ok(()),
    }
}

fn create_marker(marker: &Path, owner: Option<(Uid, Gid)>) -> Result<()> {
    if marker_present(marker) {
        return Ok(());
    }
    if let Some(parent) = marker.parent() {
        create_dirs_owned(parent, owner)?;
    }
    std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(marker)
        .map_err(|err| RmgateError::io(marker, err))?;
    chown_if(marker, owner)
}

/// `create_dir_all`, handing every newly created directory to `owner`.
fn create_dirs_owned(dir: &Path, owner: Option<(Uid, Gid)>) -> Result<()> {
    let missing: Vec<&Path> = dir.ancestors().take_while(|p| !p.exists()).collect();
    std::fs::create_dir_all(dir).map_err(|err| RmgateError::io(dir, err))?;
    for created in missing.into_iter().rev() {
        chown_if(created, owner)?;
    }
    Ok(())
}

fn chown_if(path: &Path, owner: Option<(Uid, Gid)>) -> Result<()> {
    if let Some((uid, gid)) = owner {
        nix::unistd::chown(path, Some(uid), Some(gid))
            .map_err(|errno| RmgateError::io(path, std::io::Error::from(errno)))?;
    }
    Ok(())
}
