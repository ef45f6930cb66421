//! Who owns the entry at a layer path.
//!
//! [`classify`] is the only place that decides ownership; every install and
//! uninstall decision branches on its [`Ownership`] value.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::core::errors::Result;
use crate::core::paths::INSTALL_MARKER;
use crate::platform::host::{EntryKind, HostEnvironment};

/// `<prefix>/Cellar/<formula>/<version>/...` as laid out by Homebrew and
/// Linuxbrew.
static CELLAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<prefix>/.+)/Cellar/[^/]+/[^/]+/.+$").expect("static regex")
});

/// Third-party package manager recognized by its link layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThirdPartyManager {
    Homebrew,
    Linuxbrew,
}

impl ThirdPartyManager {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Homebrew => "Homebrew",
            Self::Linuxbrew => "Linuxbrew",
        }
    }

    /// Manager owning `resolved`, if the path sits in a Cellar.
    #[must_use]
    pub fn detect(resolved: &Path) -> Option<Self> {
        let text = resolved.to_str()?;
        let caps = CELLAR_PATTERN.captures(text)?;
        let prefix = caps.name("prefix")?.as_str();
        Some(if prefix.contains("linuxbrew") {
            Self::Linuxbrew
        } else {
            Self::Homebrew
        })
    }
}

/// Typed ownership of one layer path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Ownership {
    /// Nothing at the path.
    Absent,
    /// Symlink to the gate binary, or a file carrying the install marker.
    OwnedByUs,
    /// Regular file (or directory, device...) without our marker.
    ForeignFile,
    /// Symlink to something no known manager owns.
    ForeignSymlink {
        /// Link text as read.
        target: PathBuf,
    },
    /// Symlink into a Homebrew or Linuxbrew Cellar.
    ThirdPartySymlink {
        /// Link text as read.
        target: PathBuf,
        /// Manager recognized from the resolved path.
        manager: ThirdPartyManager,
    },
}

impl Ownership {
    #[must_use]
    pub const fn is_ours(&self) -> bool {
        matches!(self, Self::OwnedByUs)
    }

    /// Short state name for status output.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Absent => "absent",
            Self::OwnedByUs => "installed",
            Self::ForeignFile => "foreign file",
            Self::ForeignSymlink { .. } => "foreign symlink",
            Self::ThirdPartySymlink { .. } => "third-party symlink",
        }
    }
}

/// True when `bytes` carry the install marker.
#[must_use]
pub fn has_marker(bytes: &[u8]) -> bool {
    memchr::memmem::find(bytes, INSTALL_MARKER.as_bytes()).is_some()
}

/// Classify the entry at `path` relative to the deployed `gate_binary`.
pub fn classify(
    host: &(impl HostEnvironment + ?Sized),
    path: &Path,
    gate_binary: &Path,
) -> Result<Ownership> {
    match host.entry(path)? {
        EntryKind::Missing => Ok(Ownership::Absent),
        EntryKind::Symlink { target } => {
            if target == gate_binary {
                return Ok(Ownership::OwnedByUs);
            }
            let resolved = host.canonicalize(path).ok();
            let gate = host
                .canonicalize(gate_binary)
                .unwrap_or_else(|_| gate_binary.to_path_buf());
            if resolved.as_deref() == Some(gate.as_path()) {
                return Ok(Ownership::OwnedByUs);
            }
            let manager = resolved.as_deref().and_then(ThirdPartyManager::detect);
            Ok(match manager {
                Some(manager) => Ownership::ThirdPartySymlink { target, manager },
                None => Ownership::ForeignSymlink { target },
            })
        }
        EntryKind::File => {
            if has_marker(&host.read(path)?) {
                Ok(Ownership::OwnedByUs)
            } else {
                Ok(Ownership::ForeignFile)
            }
        }
        EntryKind::Directory | EntryKind::Other => Ok(Ownership::ForeignFile),
    }
}
