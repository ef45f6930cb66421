//! Well-known names and filesystem locations shared by the gate and installer.

use std::path::{Path, PathBuf};

/// Program identifier used for syslog tags, backup suffixes and state dirs.
pub const PROGRAM: &str = "rmgate";

/// Comment line that proves a generated file was written by rmgate.
pub const INSTALL_MARKER: &str = "# rmgate-managed: do not edit";

/// Suffix appended to an original path when it is moved out of the way.
pub const BACKUP_SUFFIX: &str = ".rmgate.real";

/// Literal token the operator must type to let a destructive command run.
pub const CONFIRM_TOKEN: &str = "confirm";

/// Process-scoped override: `RMGATE_DISABLED=1` bypasses the gate once.
pub const ENV_DISABLED: &str = "RMGATE_DISABLED";

/// Config file override.
pub const ENV_CONFIG: &str = "RMGATE_CONFIG";

/// Per-user configuration root override.
pub const ENV_CONFIG_HOME: &str = "XDG_CONFIG_HOME";

/// Original unprivileged user when running under sudo.
pub const ENV_SUDO_USER: &str = "SUDO_USER";

/// Default system-wide config file.
pub const DEFAULT_CONFIG_FILE: &str = "/etc/rmgate/config.toml";

/// Default location of the deployed gate binary.
pub const DEFAULT_GATE_BINARY: &str = "/usr/local/lib/rmgate/rmgate";

/// Default user-facing shim directory.
pub const DEFAULT_SHIM_DIR: &str = "/usr/local/bin";

/// Default system-wide disabled marker.
pub const DEFAULT_SYSTEM_MARKER: &str = "/etc/rmgate/disabled";

/// Default sudoers drop-in written in hard mode.
pub const DEFAULT_SUDOERS_DROPIN: &str = "/etc/sudoers.d/rmgate";

/// Exit code when a destructive command is blocked for lack of a terminal.
pub const EXIT_BLOCKED: i32 = 126;

/// Exit code when the operator declines confirmation.
pub const EXIT_DECLINED: i32 = 130;

/// Exit code when no real binary can be found to hand over to.
pub const EXIT_NOT_FOUND: i32 = 127;

/// Host operating system flavor, as far as install layout is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HostOs {
    Linux,
    MacOs,
}

impl HostOs {
    /// Flavor of the machine this binary was compiled for.
    #[must_use]
    pub const fn current() -> Self {
        if cfg!(target_os = "macos") {
            Self::MacOs
        } else {
            Self::Linux
        }
    }

    /// Syslog socket path for this OS.
    #[must_use]
    pub const fn syslog_socket(self) -> &'static str {
        match self {
            Self::Linux => "/dev/log",
            Self::MacOs => "/var/run/syslog",
        }
    }
}

/// `<path>.rmgate.real`
#[must_use]
pub fn backup_path(original: &Path) -> PathBuf {
    let mut raw = original.as_os_str().to_os_string();
    raw.push(BACKUP_SUFFIX);
    PathBuf::from(raw)
}

/// Per-user disabled marker under a configuration root.
#[must_use]
pub fn user_marker(config_root: &Path) -> PathBuf {
    config_root.join(PROGRAM).join("disabled")
}
