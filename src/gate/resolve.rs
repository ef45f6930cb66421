//! Locate the real binary behind a gated command name.
//!
//! Any candidate that turns out to be rmgate itself (same device and inode as
//! the running executable, or a marker-bearing dispatcher) is skipped, which
//! keeps partially installed hosts from looping back into the gate.

use std::ffi::OsString;
use std::fs::File;
use std::io::Read;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use crate::core::errors::{Result, RmgateError};
use crate::core::paths::HostOs;
use crate::gate::classify::CommandFamily;
use crate::install::ownership::has_marker;

/// Bytes inspected when looking for the install marker in a candidate.
const MARKER_SCAN_BYTES: u64 = 4096;

/// Ordered candidate list for `family` on `os`: backup/divert paths first,
/// then conventional install locations.
#[must_use]
pub fn candidates(os: HostOs, family: CommandFamily) -> &'static [&'static str] {
    match (os, family) {
        (HostOs::Linux, CommandFamily::Delete) => &[
            "/usr/bin/rm.rmgate.real",
            "/bin/rm.rmgate.real",
            "/usr/bin/rm",
            "/bin/rm",
        ],
        (HostOs::Linux, CommandFamily::VersionControl) => &[
            "/usr/bin/git.rmgate.real",
            "/home/linuxbrew/.linuxbrew/bin/git.rmgate.real",
            "/usr/bin/git",
            "/home/linuxbrew/.linuxbrew/bin/git",
            "/usr/local/bin/git",
        ],
        (HostOs::MacOs, CommandFamily::Delete) => &["/bin/rm"],
        (HostOs::MacOs, CommandFamily::VersionControl) => &[
            "/opt/homebrew/bin/git.rmgate.real",
            "/usr/local/bin/git.rmgate.real",
            "/opt/homebrew/bin/git",
            "/usr/local/bin/git",
            "/usr/bin/git",
        ],
    }
}

/// Conventional location used when every other lookup comes up empty.
#[must_use]
pub const fn last_resort(family: CommandFamily) -> &'static str {
    match family {
        CommandFamily::Delete => "/bin/rm",
        CommandFamily::VersionControl => "/usr/bin/git",
    }
}

/// Resolves the next real binary in the chain after the running wrapper.
#[derive(Debug, Clone)]
pub struct RealTargetResolver {
    os: HostOs,
    self_id: Option<(u64, u64)>,
    excluded_dirs: Vec<PathBuf>,
    search_path: Option<OsString>,
}

impl RealTargetResolver {
    /// Resolver for a wrapper running from `self_exe`. `shim_dir` is excluded
    /// from the PATH fallback along with the wrapper's own directory.
    #[must_use]
    pub fn new(os: HostOs, self_exe: &Path, shim_dir: &Path, search_path: Option<OsString>) -> Self {
        let self_id = std::fs::metadata(self_exe)
            .ok()
            .map(|meta| (meta.dev(), meta.ino()));
        let mut excluded_dirs = vec![shim_dir.to_path_buf()];
        if let Some(dir) = self_exe.parent() {
            excluded_dirs.push(dir.to_path_buf());
        }
        let canonical: Vec<PathBuf> = excluded_dirs
            .iter()
            .filter_map(|dir| std::fs::canonicalize(dir).ok())
            .collect();
        excluded_dirs.extend(canonical);

        Self {
            os,
            self_id,
            excluded_dirs,
            search_path,
        }
    }

    /// Resolver for the current process, reading `PATH` from the environment.
    pub fn for_current_process(shim_dir: &Path) -> Result<Self> {
        let exe = std::env::current_exe().map_err(|err| RmgateError::io("current_exe", err))?;
        Ok(Self::new(
            HostOs::current(),
            &exe,
            shim_dir,
            std::env::var_os("PATH"),
        ))
    }

    /// First usable real binary for `family`.
    pub fn resolve(&self, family: CommandFamily) -> Result<PathBuf> {
        let mut fixed = candidates(self.os, family).iter().map(PathBuf::from);
        if let Some(found) = fixed.find(|c| self.is_usable(c)) {
            return Ok(found);
        }
        if let Some(found) = self.search_path_lookup(family.command_name()) {
            return Ok(found);
        }
        let fallback = PathBuf::from(last_resort(family));
        if self.is_usable(&fallback) {
            return Ok(fallback);
        }
        Err(RmgateError::Resolution {
            command: family.command_name(),
        })
    }

    fn search_path_lookup(&self, name: &str) -> Option<PathBuf> {
        let search_path = self.search_path.as_ref()?;
        std::env::split_paths(search_path)
            .filter(|dir| dir.is_absolute() && !self.is_excluded(dir))
            .map(|dir| dir.join(name))
            .find(|candidate| self.is_usable(candidate))
    }

    fn is_excluded(&self, dir: &Path) -> bool {
        if self.excluded_dirs.iter().any(|ex| ex == dir) {
            return true;
        }
        std::fs::canonicalize(dir)
            .map(|canon| self.excluded_dirs.iter().any(|ex| *ex == canon))
            .unwrap_or(false)
    }

    /// Exists, is an executable regular file, and is not rmgate.
    fn is_usable(&self, candidate: &Path) -> bool {
        let Ok(meta) = std::fs::metadata(candidate) else {
            return false;
        };
        if !meta.is_file() || meta.permissions().mode() & 0o111 == 0 {
            return false;
        }
        if self.self_id == Some((meta.dev(), meta.ino())) {
            return false;
        }
        !head_has_marker(candidate)
    }
}

fn head_has_marker(path: &Path) -> bool {
    let Ok(file) = File::open(path) else {
        return false;
    };
    let mut head = Vec::new();
    if file.take(MARKER_SCAN_BYTES).read_to_end(&mut head).is_err() {
        return false;
    }
    has_marker(&head)
}
