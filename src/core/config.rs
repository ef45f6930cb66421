//! On-disk configuration (`/etc/rmgate/config.toml`).
//!
//! Every field has a default, so a missing file is equivalent to an empty one.
//! The admin CLI treats a malformed file as an error; the runtime gate falls
//! back to defaults instead, because a broken config must never stop `rm` from
//! being gated.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::errors::{Result, RmgateError};
use super::paths;

/// Full configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Install and state locations.
    pub paths: PathsConfig,
    /// Audit trail settings.
    pub audit: AuditConfig,
}

/// Install and state locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    /// Where `install` deploys the gate binary; every layer points here.
    pub gate_binary: PathBuf,
    /// Directory receiving the `rm`/`git` symlink shims.
    pub shim_dir: PathBuf,
    /// System-wide disabled marker.
    pub system_disabled_marker: PathBuf,
    /// Sudoers drop-in written by `install-hard`.
    pub sudoers_dropin: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            gate_binary: PathBuf::from(paths::DEFAULT_GATE_BINARY),
            shim_dir: PathBuf::from(paths::DEFAULT_SHIM_DIR),
            system_disabled_marker: PathBuf::from(paths::DEFAULT_SYSTEM_MARKER),
            sudoers_dropin: PathBuf::from(paths::DEFAULT_SUDOERS_DROPIN),
        }
    }
}

/// Audit trail settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuditConfig {
    /// Send decision events to the system log.
    pub syslog: bool,
    /// Optional append-only JSONL audit file.
    pub jsonl_log: Option<PathBuf>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            syslog: true,
            jsonl_log: None,
        }
    }
}

impl Config {
    /// Config file location: explicit path, then `RMGATE_CONFIG`, then the
    /// system default.
    #[must_use]
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(path) = explicit {
            return path.to_path_buf();
        }
        std::env::var_os(paths::ENV_CONFIG)
            .filter(|v| !v.is_empty())
            .map_or_else(|| PathBuf::from(paths::DEFAULT_CONFIG_FILE), PathBuf::from)
    }

    /// Load from `path`. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(RmgateError::io(path, err)),
        };
        let config: Self = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load, swallowing every failure.
    #[must_use]
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Configuration for the runtime gate.
    ///
    /// Always reads the fixed system file. `RMGATE_CONFIG` and `--config`
    /// only steer the admin CLI; whoever runs `rm` must not be able to point
    /// the gate at their own disabled marker or audit settings.
    #[must_use]
    pub fn load_for_gate() -> Self {
        Self::load_or_default(Path::new(paths::DEFAULT_CONFIG_FILE))
    }

    /// Reject values that would make install or the gate misbehave.
    pub fn validate(&self) -> Result<()> {
        let checks = [
            ("paths.gate_binary", &self.paths.gate_binary),
            ("paths.shim_dir", &self.paths.shim_dir),
            ("paths.system_disabled_marker", &self.paths.system_disabled_marker),
            ("paths.sudoers_dropin", &self.paths.sudoers_dropin),
        ];
        for (key, path) in checks {
            if !path.is_absolute() {
                return Err(RmgateError::InvalidConfig {
                    details: format!("{key} must be an absolute path, got {}", path.display()),
                });
            }
        }
        if self.paths.gate_binary.parent() == Some(self.paths.shim_dir.as_path()) {
            return Err(RmgateError::InvalidConfig {
                details: "paths.gate_binary must not live inside paths.shim_dir".to_string(),
            });
        }
        if let Some(log) = &self.audit.jsonl_log {
            if !log.is_absolute() {
                return Err(RmgateError::InvalidConfig {
                    details: format!("audit.jsonl_log must be absolute, got {}", log.display()),
                });
            }
        }
        Ok(())
    }
}
