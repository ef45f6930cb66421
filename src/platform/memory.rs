//! In-memory [`HostEnvironment`] for orchestrator tests.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path, PathBuf};

use super::host::{EntryKind, HostEnvironment, SudoersCheck};
use crate::core::errors::{Result, RmgateError};
use crate::core::paths::HostOs;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    File { contents: Vec<u8>, mode: u32 },
    Symlink(PathBuf),
    Dir,
}

/// Snapshot-comparable filesystem plus a diversion table.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HostState {
    pub nodes: BTreeMap<PathBuf, Node>,
    pub diversions: BTreeMap<PathBuf, PathBuf>,
}

#[derive(Debug)]
pub struct MemoryHost {
    pub os: HostOs,
    pub root: bool,
    pub divert_tool: bool,
    pub sudoers_check: SudoersCheck,
    /// File writes and symlink creation at these paths fail.
    pub fail_on: BTreeSet<PathBuf>,
    /// Renames away from these paths fail.
    pub fail_rename: BTreeSet<PathBuf>,
    /// Paths the package database claims.
    pub packaged: BTreeSet<PathBuf>,
    state: RefCell<HostState>,
}

fn denied(path: &Path) -> RmgateError {
    RmgateError::io(
        path,
        std::io::Error::from(std::io::ErrorKind::PermissionDenied),
    )
}

fn not_found(path: &Path) -> RmgateError {
    RmgateError::io(path, std::io::Error::from(std::io::ErrorKind::NotFound))
}

/// Lexically resolve `.` and `..`.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    out
}

impl MemoryHost {
    /// Root-capable Linux host with `dpkg-divert` and a working `visudo`.
    pub fn linux() -> Self {
        Self {
            os: HostOs::Linux,
            root: true,
            divert_tool: true,
            sudoers_check: SudoersCheck::Valid,
            fail_on: BTreeSet::new(),
            fail_rename: BTreeSet::new(),
            packaged: BTreeSet::new(),
            state: RefCell::new(HostState::default()),
        }
    }

    pub fn macos() -> Self {
        Self {
            os: HostOs::MacOs,
            divert_tool: false,
            ..Self::linux()
        }
    }

    pub fn snapshot(&self) -> HostState {
        self.state.borrow().clone()
    }

    pub fn node(&self, path: impl AsRef<Path>) -> Option<Node> {
        self.state.borrow().nodes.get(path.as_ref()).cloned()
    }

    /// Physical location of `path`: symlinked parent directories are
    /// followed, a final symlink is not.
    pub fn locate(&self, path: &Path) -> PathBuf {
        let path = normalize(path);
        match (path.parent(), path.file_name()) {
            (Some(parent), Some(name)) if !parent.as_os_str().is_empty() => {
                self.resolve_dir(parent).join(name)
            }
            _ => path,
        }
    }

    fn resolve_dir(&self, dir: &Path) -> PathBuf {
        let state = self.state.borrow();
        let mut current = PathBuf::new();
        for component in dir.components() {
            current.push(component);
            for _ in 0..40 {
                let Some(Node::Symlink(target)) = state.nodes.get(&current) else {
                    break;
                };
                let base = current.parent().unwrap_or_else(|| Path::new("/"));
                current = normalize(&base.join(target));
            }
        }
        current
    }

    pub fn add_dir(&self, path: impl AsRef<Path>) {
        let located = self.locate(path.as_ref());
        let mut state = self.state.borrow_mut();
        for ancestor in located.ancestors() {
            if ancestor.as_os_str().is_empty() {
                continue;
            }
            state.nodes.entry(ancestor.to_path_buf()).or_insert(Node::Dir);
        }
    }

    pub fn add_file(&self, path: impl AsRef<Path>, contents: impl AsRef<[u8]>, mode: u32) {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            self.add_dir(parent);
        }
        let located = self.locate(path);
        self.state.borrow_mut().nodes.insert(
            located,
            Node::File {
                contents: contents.as_ref().to_vec(),
                mode,
            },
        );
    }

    pub fn add_symlink(&self, link: impl AsRef<Path>, target: impl AsRef<Path>) {
        let link = link.as_ref();
        if let Some(parent) = link.parent() {
            self.add_dir(parent);
        }
        let located = self.locate(link);
        self.state
            .borrow_mut()
            .nodes
            .insert(located, Node::Symlink(target.as_ref().to_path_buf()));
    }

    pub fn add_diversion(&self, path: impl AsRef<Path>, to: impl AsRef<Path>) {
        self.state
            .borrow_mut()
            .diversions
            .insert(path.as_ref().to_path_buf(), to.as_ref().to_path_buf());
    }

    fn check_parent(path: &Path, state: &HostState) -> Result<()> {
        match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => match state.nodes.get(parent) {
                Some(Node::Dir) => Ok(()),
                _ => Err(not_found(parent)),
            },
            _ => Ok(()),
        }
    }

    fn fails(&self, path: &Path) -> bool {
        self.fail_on.contains(path) || self.fail_on.contains(&self.locate(path))
    }

    fn check_writable(&self, path: &Path) -> Result<()> {
        if self.fails(path) {
            return Err(denied(path));
        }
        Self::check_parent(&self.locate(path), &self.state.borrow())
    }
}

impl HostEnvironment for MemoryHost {
    fn os(&self) -> HostOs {
        self.os
    }

    fn is_root(&self) -> bool {
        self.root
    }

    fn entry(&self, path: &Path) -> Result<EntryKind> {
        Ok(match self.state.borrow().nodes.get(&self.locate(path)) {
            None => EntryKind::Missing,
            Some(Node::Dir) => EntryKind::Directory,
            Some(Node::Symlink(target)) => EntryKind::Symlink {
                target: target.clone(),
            },
            Some(Node::File { .. }) => EntryKind::File,
        })
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let resolved = self.canonicalize(path)?;
        match self.state.borrow().nodes.get(&resolved) {
            Some(Node::File { contents, .. }) => Ok(contents.clone()),
            _ => Err(not_found(path)),
        }
    }

    fn canonicalize(&self, path: &Path) -> Result<PathBuf> {
        let mut current = self.locate(path);
        for _ in 0..40 {
            let next = match self.state.borrow().nodes.get(&current) {
                Some(Node::Symlink(target)) => {
                    let base = current.parent().unwrap_or_else(|| Path::new("/"));
                    base.join(target)
                }
                Some(_) => return Ok(current),
                None => return Err(not_found(path)),
            };
            current = self.locate(&next);
        }
        Err(not_found(path))
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        if self.fails(path) {
            return Err(denied(path));
        }
        self.add_dir(path);
        Ok(())
    }

    fn remove_empty_dir(&self, path: &Path) {
        let path = &self.locate(path);
        let mut state = self.state.borrow_mut();
        let has_children = state
            .nodes
            .keys()
            .any(|p| p.parent() == Some(path));
        if !has_children && state.nodes.get(path) == Some(&Node::Dir) {
            state.nodes.remove(path);
        }
    }

    fn symlink(&self, target: &Path, link: &Path) -> Result<()> {
        self.check_writable(link)?;
        let link = &self.locate(link);
        if self.state.borrow().nodes.contains_key(link) {
            return Err(RmgateError::io(
                link,
                std::io::Error::from(std::io::ErrorKind::AlreadyExists),
            ));
        }
        self.state
            .borrow_mut()
            .nodes
            .insert(link.to_path_buf(), Node::Symlink(target.to_path_buf()));
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        if self.fail_rename.contains(from) {
            return Err(denied(from));
        }
        let (from, to) = (&self.locate(from), &self.locate(to));
        let mut state = self.state.borrow_mut();
        Self::check_parent(to, &state)?;
        let node = state.nodes.remove(from).ok_or_else(|| not_found(from))?;
        state.nodes.insert(to.to_path_buf(), node);
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        let path = &self.locate(path);
        let mut state = self.state.borrow_mut();
        match state.nodes.get(path) {
            Some(Node::File { .. } | Node::Symlink(_)) => {
                state.nodes.remove(path);
                Ok(())
            }
            _ => Err(not_found(path)),
        }
    }

    fn write_file(&self, path: &Path, contents: &[u8], mode: u32) -> Result<()> {
        self.check_writable(path)?;
        let located = self.locate(path);
        self.state.borrow_mut().nodes.insert(
            located,
            Node::File {
                contents: contents.to_vec(),
                mode,
            },
        );
        Ok(())
    }

    fn has_divert_tool(&self) -> bool {
        self.divert_tool
    }

    fn package_owns(&self, path: &Path) -> bool {
        self.packaged.contains(path)
    }

    fn diversion(&self, path: &Path) -> Result<Option<PathBuf>> {
        Ok(self.state.borrow().diversions.get(path).cloned())
    }

    fn divert(&self, path: &Path, backup: &Path) -> Result<()> {
        if !self.divert_tool {
            return Err(RmgateError::MissingTool {
                tool: "dpkg-divert",
            });
        }
        if self.fail_on.contains(backup) {
            return Err(RmgateError::DivertFailed {
                path: path.to_path_buf(),
                details: "simulated failure".to_string(),
            });
        }
        self.rename(path, backup)?;
        self.add_diversion(path, backup);
        Ok(())
    }

    fn undivert(&self, path: &Path, backup: &Path) -> Result<()> {
        if self.fail_on.contains(backup) {
            return Err(RmgateError::DivertFailed {
                path: path.to_path_buf(),
                details: "simulated failure".to_string(),
            });
        }
        if self.state.borrow().nodes.contains_key(&self.locate(path)) {
            return Err(RmgateError::DivertFailed {
                path: path.to_path_buf(),
                details: "path still exists".to_string(),
            });
        }
        if self.state.borrow().nodes.contains_key(&self.locate(backup)) {
            self.rename(backup, path)?;
        }
        self.state.borrow_mut().diversions.remove(path);
        Ok(())
    }

    fn validate_sudoers(&self, _contents: &[u8]) -> SudoersCheck {
        self.sudoers_check.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_follows_relative_links() {
        let host = MemoryHost::linux();
        host.add_file("/opt/homebrew/Cellar/git/2.45.0/bin/git", "elf", 0o755);
        host.add_symlink("/opt/homebrew/bin/git", "../Cellar/git/2.45.0/bin/git");
        assert_eq!(
            host.canonicalize(Path::new("/opt/homebrew/bin/git")).unwrap(),
            PathBuf::from("/opt/homebrew/Cellar/git/2.45.0/bin/git")
        );
    }

    #[test]
    fn dangling_and_looping_links_fail() {
        let host = MemoryHost::linux();
        host.add_symlink("/a", "/b");
        assert!(host.canonicalize(Path::new("/a")).is_err());
        host.add_symlink("/b", "/a");
        assert!(host.canonicalize(Path::new("/a")).is_err());
    }

    #[test]
    fn writes_need_an_existing_parent() {
        let host = MemoryHost::linux();
        assert!(host.write_file(Path::new("/nope/file"), b"x", 0o644).is_err());
        host.add_dir("/nope");
        host.write_file(Path::new("/nope/file"), b"x", 0o644).unwrap();
    }

    #[test]
    fn divert_and_undivert_round_trip() {
        let host = MemoryHost::linux();
        host.add_file("/usr/bin/rm", "elf", 0o755);
        let before = host.snapshot();

        host.divert(Path::new("/usr/bin/rm"), Path::new("/usr/bin/rm.x")).unwrap();
        assert_eq!(host.entry(Path::new("/usr/bin/rm")).unwrap(), EntryKind::Missing);
        assert_eq!(
            host.diversion(Path::new("/usr/bin/rm")).unwrap(),
            Some(PathBuf::from("/usr/bin/rm.x"))
        );

        host.undivert(Path::new("/usr/bin/rm"), Path::new("/usr/bin/rm.x")).unwrap();
        assert_eq!(host.snapshot(), before);
    }

    #[test]
    fn paths_under_a_linked_directory_land_on_its_target() {
        let host = MemoryHost::linux();
        host.add_file("/usr/bin/rm", "elf", 0o755);
        host.add_symlink("/bin", "usr/bin");
        assert_eq!(host.entry(Path::new("/bin/rm")).unwrap(), EntryKind::File);
        assert_eq!(host.locate(Path::new("/bin/rm")), PathBuf::from("/usr/bin/rm"));

        host.divert(Path::new("/bin/rm"), Path::new("/bin/rm.x")).unwrap();
        assert!(host.node("/usr/bin/rm.x").is_some());
        assert_eq!(host.diversion(Path::new("/usr/bin/rm")).unwrap(), None);
        assert_eq!(host.node("/bin"), Some(Node::Symlink(PathBuf::from("usr/bin"))));
    }
}
