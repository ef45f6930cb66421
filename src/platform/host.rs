//! Host capability used by the installer.
//!
//! All filesystem mutation, privilege checks, and package-manager diversion
//! calls made at install time go through [`HostEnvironment`], so the
//! orchestration logic can be exercised against an in-memory host.

use std::ffi::OsStr;
use std::fs;
use std::io::Write as _;
use std::os::unix::fs::{PermissionsExt, symlink};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use serde::Serialize;

use crate::core::errors::{Result, RmgateError};
use crate::core::paths::HostOs;

/// What sits at a path, without following a final symlink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntryKind {
    Missing,
    File,
    Symlink { target: PathBuf },
    Directory,
    Other,
}

/// Result of validating a sudoers fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SudoersCheck {
    Valid,
    Invalid(String),
    /// No validator available on this host.
    Unavailable,
}

/// Install-time view of the host.
pub trait HostEnvironment {
    /// OS flavor (drives layer selection).
    fn os(&self) -> HostOs;

    /// Effective uid is 0.
    fn is_root(&self) -> bool;

    /// Kind of entry at `path` (lstat semantics).
    fn entry(&self, path: &Path) -> Result<EntryKind>;

    /// Full contents of a regular file.
    fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Follow every symlink to the final path. Errors if the chain dangles.
    fn canonicalize(&self, path: &Path) -> Result<PathBuf>;

    fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Remove `path` if it is an empty directory; anything else is left alone.
    fn remove_empty_dir(&self, path: &Path);

    /// Create `link` pointing at `target`.
    fn symlink(&self, target: &Path, link: &Path) -> Result<()>;

    /// Atomic rename.
    fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    /// Remove a file or symlink.
    fn remove_file(&self, path: &Path) -> Result<()>;

    /// Atomically replace `path` with `contents` and permission `mode`.
    fn write_file(&self, path: &Path, contents: &[u8], mode: u32) -> Result<()>;

    /// `dpkg-divert` is available.
    fn has_divert_tool(&self) -> bool;

    /// The package database lists `path` as installed by some package.
    /// False when the database cannot be queried.
    fn package_owns(&self, path: &Path) -> bool;

    /// Divert-to path registered for `path`, if any.
    fn diversion(&self, path: &Path) -> Result<Option<PathBuf>>;

    /// Register a renaming diversion of `path` to `backup`.
    fn divert(&self, path: &Path, backup: &Path) -> Result<()>;

    /// Remove the diversion of `path`, renaming `backup` back.
    fn undivert(&self, path: &Path, backup: &Path) -> Result<()>;

    /// Syntax-check a sudoers fragment.
    fn validate_sudoers(&self, contents: &[u8]) -> SudoersCheck;
}

/// The real machine.
#[derive(Debug, Clone)]
pub struct SystemHost {
    os: HostOs,
}

impl Default for SystemHost {
    fn default() -> Self {
        Self {
            os: HostOs::current(),
        }
    }
}

impl SystemHost {
    fn divert_tool() -> Option<PathBuf> {
        find_tool("dpkg-divert")
    }

    fn run_divert(args: &[&OsStr], path: &Path) -> Result<String> {
        let tool = Self::divert_tool().ok_or(RmgateError::MissingTool {
            tool: "dpkg-divert",
        })?;
        let output = Command::new(tool)
            .args(args)
            .output()
            .map_err(|err| RmgateError::io("dpkg-divert", err))?;
        if !output.status.success() {
            return Err(RmgateError::DivertFailed {
                path: path.to_path_buf(),
                details: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Locate an administrative tool on PATH or in the sbin directories.
fn find_tool(name: &str) -> Option<PathBuf> {
    let path_dirs = std::env::var_os("PATH")
        .map(|p| std::env::split_paths(&p).collect::<Vec<_>>())
        .unwrap_or_default();
    path_dirs
        .into_iter()
        .chain(["/usr/sbin", "/sbin", "/usr/bin", "/bin"].map(PathBuf::from))
        .map(|dir| dir.join(name))
        .find(|candidate| {
            fs::metadata(candidate)
                .is_ok_and(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        })
}

impl HostEnvironment for SystemHost {
    fn os(&self) -> HostOs {
        self.os
    }

    fn is_root(&self) -> bool {
        nix::unistd::geteuid().is_root()
    }

    fn entry(&self, path: &Path) -> Result<EntryKind> {
        let meta = match fs::symlink_metadata(path) {
            Ok(meta) => meta,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(EntryKind::Missing);
            }
            Err(err) => return Err(RmgateError::io(path, err)),
        };
        let file_type = meta.file_type();
        Ok(if file_type.is_symlink() {
            let target = fs::read_link(path).map_err(|err| RmgateError::io(path, err))?;
            EntryKind::Symlink { target }
        } else if file_type.is_file() {
            EntryKind::File
        } else if file_type.is_dir() {
            EntryKind::Directory
        } else {
            EntryKind::Other
        })
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        fs::read(path).map_err(|err| RmgateError::io(path, err))
    }

    fn canonicalize(&self, path: &Path) -> Result<PathBuf> {
        fs::canonicalize(path).map_err(|err| RmgateError::io(path, err))
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path).map_err(|err| RmgateError::io(path, err))
    }

    fn remove_empty_dir(&self, path: &Path) {
        let _ = fs::remove_dir(path);
    }

    fn symlink(&self, target: &Path, link: &Path) -> Result<()> {
        symlink(target, link).map_err(|err| RmgateError::io(link, err))
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        fs::rename(from, to).map_err(|err| RmgateError::io(from, err))
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(path).map_err(|err| RmgateError::io(path, err))
    }

    fn write_file(&self, path: &Path, contents: &[u8], mode: u32) -> Result<()> {
        let name = path.file_name().ok_or_else(|| RmgateError::Runtime {
            details: format!("not a file path: {}", path.display()),
        })?;
        let mut tmp_name = OsStr::new(".").to_os_string();
        tmp_name.push(name);
        tmp_name.push(".rmgate-tmp");
        let tmp = path.with_file_name(tmp_name);

        let write = || -> std::io::Result<()> {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(contents)?;
            file.sync_all()?;
            fs::set_permissions(&tmp, fs::Permissions::from_mode(mode))?;
            fs::rename(&tmp, path)
        };
        write().map_err(|err| {
            let _ = fs::remove_file(&tmp);
            RmgateError::io(path, err)
        })
    }

    fn has_divert_tool(&self) -> bool {
        Self::divert_tool().is_some()
    }

    fn package_owns(&self, path: &Path) -> bool {
        let Some(query) = find_tool("dpkg-query") else {
            return false;
        };
        Command::new(query)
            .arg("-S")
            .arg(path)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok_and(|status| status.success())
    }

    fn diversion(&self, path: &Path) -> Result<Option<PathBuf>> {
        if !self.has_divert_tool() {
            return Ok(None);
        }
        let truename = Self::run_divert(&[OsStr::new("--truename"), path.as_os_str()], path)?;
        let truename = PathBuf::from(truename);
        Ok((truename != path).then_some(truename))
    }

    fn divert(&self, path: &Path, backup: &Path) -> Result<()> {
        Self::run_divert(
            &[
                OsStr::new("--local"),
                OsStr::new("--rename"),
                OsStr::new("--divert"),
                backup.as_os_str(),
                OsStr::new("--add"),
                path.as_os_str(),
            ],
            path,
        )
        .map(drop)
    }

    fn undivert(&self, path: &Path, backup: &Path) -> Result<()> {
        Self::run_divert(
            &[
                OsStr::new("--local"),
                OsStr::new("--rename"),
                OsStr::new("--divert"),
                backup.as_os_str(),
                OsStr::new("--remove"),
                path.as_os_str(),
            ],
            path,
        )
        .map(drop)
    }

    fn validate_sudoers(&self, contents: &[u8]) -> SudoersCheck {
        let Some(visudo) = find_tool("visudo") else {
            return SudoersCheck::Unavailable;
        };
        let check = || -> std::io::Result<std::process::Output> {
            let mut tmp = tempfile::NamedTempFile::new()?;
            tmp.write_all(contents)?;
            tmp.flush()?;
            Command::new(&visudo).arg("-cf").arg(tmp.path()).output()
        };
        match check() {
            Ok(output) if output.status.success() => SudoersCheck::Valid,
            Ok(output) => SudoersCheck::Invalid(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ),
            Err(err) => SudoersCheck::Invalid(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn entry_kinds_on_real_filesystem() {
        let tmp = TempDir::new().unwrap();
        let host = SystemHost::default();
        let file = tmp.path().join("file");
        let link = tmp.path().join("link");
        std::fs::write(&file, "x").unwrap();
        symlink(&file, &link).unwrap();

        assert_eq!(host.entry(&tmp.path().join("nope")).unwrap(), EntryKind::Missing);
        assert_eq!(host.entry(&file).unwrap(), EntryKind::File);
        assert_eq!(
            host.entry(&link).unwrap(),
            EntryKind::Symlink {
                target: file.clone()
            }
        );
        assert_eq!(host.entry(tmp.path()).unwrap(), EntryKind::Directory);
    }

    #[test]
    fn write_file_is_atomic_and_sets_mode() {
        let tmp = TempDir::new().unwrap();
        let host = SystemHost::default();
        let path = tmp.path().join("rm");
        std::fs::write(&path, "old").unwrap();

        host.write_file(&path, b"#!/bin/sh\n", 0o755).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"#!/bin/sh\n");
        assert_eq!(host.entry(&path).unwrap(), EntryKind::File);
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
        let leftovers: Vec<_> = std::fs::read_dir(tmp.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1, "temp file must not linger");
    }

    #[test]
    fn remove_empty_dir_keeps_non_empty() {
        let tmp = TempDir::new().unwrap();
        let host = SystemHost::default();
        let full = tmp.path().join("full");
        let empty = tmp.path().join("empty");
        std::fs::create_dir_all(&full).unwrap();
        std::fs::create_dir_all(&empty).unwrap();
        std::fs::write(full.join("f"), "").unwrap();

        host.remove_empty_dir(&full);
        host.remove_empty_dir(&empty);
        assert!(full.exists());
        assert!(!empty.exists());
    }
}
