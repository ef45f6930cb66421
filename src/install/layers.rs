//! Installation layers: the ways `rm` and `git` are made to resolve to the
//! gate.
//!
//! Each layer is handled in two phases. `plan_*` classifies the layer path and
//! decides a [`LayerAction`] without touching anything; [`apply`] carries the
//! action out. Dry runs stop after planning.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::ownership::{Ownership, ThirdPartyManager, classify};
use super::report::StepStatus;
use crate::core::config::PathsConfig;
use crate::core::errors::{Result, RmgateError};
use crate::core::paths::{self, HostOs};
use crate::gate::classify::CommandFamily;
use crate::platform::host::{EntryKind, HostEnvironment};

/// Mode bit of generated dispatchers and the deployed gate binary.
pub const EXECUTABLE_MODE: u32 = 0o755;

/// Soft mode uses symlink shims; hard mode diverts the package-managed
/// binaries themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallMode {
    /// Shims ahead of the system binaries on `PATH`.
    Soft,
    /// Diversions of the system binaries plus the sudoers drop-in.
    Hard,
}

/// Installation strategy for one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    /// Symlink in the shim directory.
    UserBinShim,
    /// Symlink replacing a Homebrew/Linuxbrew link.
    ThirdPartyShim,
    /// dpkg diversion plus a dispatcher script.
    PackageDivert,
}

impl LayerKind {
    /// Short name used in report lines.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::UserBinShim => "shim",
            Self::ThirdPartyShim => "third-party shim",
            Self::PackageDivert => "divert",
        }
    }
}

/// One (command, strategy, path) triple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layer {
    pub kind: LayerKind,
    pub family: CommandFamily,
    pub path: PathBuf,
}

impl Layer {
    #[must_use]
    pub fn backup(&self) -> PathBuf {
        paths::backup_path(&self.path)
    }

    /// `rm: shim /usr/local/bin/rm`
    #[must_use]
    pub fn describe(&self) -> String {
        format!(
            "{}: {} {}",
            self.family.command_name(),
            self.kind.label(),
            self.path.display()
        )
    }
}

/// Bin directories owned by a third-party package manager on `os`.
#[must_use]
pub const fn third_party_bin_dirs(os: HostOs) -> &'static [&'static str] {
    match os {
        HostOs::Linux => &["/home/linuxbrew/.linuxbrew/bin"],
        HostOs::MacOs => &["/opt/homebrew/bin", "/usr/local/bin"],
    }
}

/// Package-managed paths diverted in hard mode.
#[must_use]
pub const fn divert_targets(family: CommandFamily) -> &'static [&'static str] {
    match family {
        CommandFamily::Delete => &["/usr/bin/rm", "/bin/rm"],
        CommandFamily::VersionControl => &["/usr/bin/git"],
    }
}

/// Layers applicable to `mode` on this host, deduplicated by the physical
/// location of each path (first wins).
///
/// Divert targets the package database claims are placed first. On a
/// merged-`/usr` host `/bin/rm` and `/usr/bin/rm` are one file, and a
/// diversion only survives package upgrades when it names the path dpkg
/// actually registered.
pub fn layers_for(
    host: &(impl HostEnvironment + ?Sized),
    mode: InstallMode,
    config: &PathsConfig,
) -> Vec<Layer> {
    let mut layers = Vec::new();
    match mode {
        InstallMode::Soft => {
            for family in CommandFamily::ALL {
                layers.push(Layer {
                    kind: LayerKind::UserBinShim,
                    family,
                    path: config.shim_dir.join(family.command_name()),
                });
            }
            for dir in third_party_bin_dirs(host.os()) {
                layers.push(Layer {
                    kind: LayerKind::ThirdPartyShim,
                    family: CommandFamily::VersionControl,
                    path: Path::new(dir).join(CommandFamily::VersionControl.command_name()),
                });
            }
        }
        InstallMode::Hard => {
            if host.os() == HostOs::Linux {
                for family in CommandFamily::ALL {
                    let mut targets: Vec<PathBuf> =
                        divert_targets(family).iter().map(PathBuf::from).collect();
                    targets.sort_by_key(|target| !host.package_owns(target));
                    layers.extend(targets.into_iter().map(|path| Layer {
                        kind: LayerKind::PackageDivert,
                        family,
                        path,
                    }));
                }
            }
        }
    }

    let mut seen = BTreeSet::new();
    layers.retain(|layer| seen.insert(physical_location(host, &layer.path)));
    layers
}

fn physical_location(host: &(impl HostEnvironment + ?Sized), path: &Path) -> PathBuf {
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => host
            .canonicalize(parent)
            .unwrap_or_else(|_| parent.to_path_buf())
            .join(name),
        _ => path.to_path_buf(),
    }
}

/// `/bin/sh` dispatcher written at diverted paths.
#[must_use]
pub fn dispatcher_script(gate_binary: &Path, family: CommandFamily) -> String {
    let quoted = shell_words::quote(&gate_binary.to_string_lossy()).into_owned();
    format!(
        "#!/bin/sh\n{marker}\nexec {quoted} --gate {cmd} \"$@\"\n",
        marker = paths::INSTALL_MARKER,
        cmd = family.command_name()
    )
}

/// What to do with one layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerAction {
    /// Symlink the gate at an absent path.
    CreateShim,
    /// Move a package manager's link to the backup path, then symlink the gate.
    TakeOver { manager: ThirdPartyManager },
    /// Divert the package-managed binary, then write the dispatcher.
    DivertAndWrite,
    /// Diversion is ours but the dispatcher vanished.
    RewriteDispatcher,
    /// Remove our symlink, moving the backup back if there is one.
    RemoveShim { restore_backup: bool },
    /// Remove the dispatcher (if present) and drop the diversion.
    RemoveDispatcher { present: bool },
    /// Already in the desired state.
    Keep(String),
    /// Nothing applicable.
    Skip(String),
    /// Path is not ours to change.
    Refuse(String),
}

impl LayerAction {
    /// Whether applying this action modifies the host.
    #[must_use]
    pub const fn changes_host(&self) -> bool {
        !matches!(self, Self::Keep(_) | Self::Skip(_) | Self::Refuse(_))
    }

    /// Report status before (dry run) or after a successful apply.
    #[must_use]
    pub const fn status(&self, dry_run: bool) -> StepStatus {
        match self {
            Self::Keep(_) => StepStatus::Unchanged,
            Self::Skip(_) => StepStatus::Skipped,
            Self::Refuse(_) => StepStatus::Refused,
            _ if dry_run => StepStatus::Planned,
            _ => StepStatus::Done,
        }
    }

    /// Extra report text for `layer`.
    #[must_use]
    pub fn detail(&self, layer: &Layer) -> Option<String> {
        let backup = layer.backup();
        match self {
            Self::CreateShim | Self::RemoveShim {
                restore_backup: false,
            } => None,
            Self::TakeOver { manager } => Some(format!(
                "{} link saved at {}",
                manager.label(),
                backup.display()
            )),
            Self::DivertAndWrite => Some(format!("original diverted to {}", backup.display())),
            Self::RewriteDispatcher => Some("dispatcher was missing; rewritten".to_string()),
            Self::RemoveShim {
                restore_backup: true,
            } => Some(format!("original restored from {}", backup.display())),
            Self::RemoveDispatcher { .. } => {
                Some(format!("original restored from {}", backup.display()))
            }
            Self::Keep(text) | Self::Skip(text) | Self::Refuse(text) => Some(text.clone()),
        }
    }
}

fn exists(host: &(impl HostEnvironment + ?Sized), path: &Path) -> Result<bool> {
    Ok(host.entry(path)? != EntryKind::Missing)
}

/// Decide how to install `layer`.
pub fn plan_install(
    host: &(impl HostEnvironment + ?Sized),
    layer: &Layer,
    gate_binary: &Path,
) -> Result<LayerAction> {
    let ownership = classify(host, &layer.path, gate_binary)?;
    let backup = layer.backup();

    if layer.kind == LayerKind::PackageDivert {
        return plan_divert_install(host, layer, ownership, &backup);
    }

    Ok(match ownership {
        Ownership::Absent if layer.kind == LayerKind::ThirdPartyShim => {
            LayerAction::Skip(format!("no {} link to take over", layer.family))
        }
        Ownership::Absent => LayerAction::CreateShim,
        Ownership::OwnedByUs => LayerAction::Keep("already installed".to_string()),
        Ownership::ForeignFile => LayerAction::Refuse(
            "a file not created by rmgate is in the way; left untouched".to_string(),
        ),
        Ownership::ForeignSymlink { target } => LayerAction::Refuse(format!(
            "symlink to {} is not managed by rmgate; left untouched",
            target.display()
        )),
        Ownership::ThirdPartySymlink { manager, .. } => {
            if exists(host, &backup)? {
                LayerAction::Refuse(format!(
                    "backup {} already exists; not overwriting it",
                    backup.display()
                ))
            } else {
                LayerAction::TakeOver { manager }
            }
        }
    })
}

fn plan_divert_install(
    host: &(impl HostEnvironment + ?Sized),
    layer: &Layer,
    ownership: Ownership,
    backup: &Path,
) -> Result<LayerAction> {
    let diversion = host.diversion(&layer.path)?;
    Ok(match (diversion, ownership) {
        (Some(to), Ownership::OwnedByUs) if to == backup => {
            LayerAction::Keep("already diverted".to_string())
        }
        (Some(to), Ownership::Absent) if to == backup => LayerAction::RewriteDispatcher,
        (Some(to), _) if to == backup => LayerAction::Refuse(format!(
            "diverted by rmgate but {} was replaced since; left untouched",
            layer.path.display()
        )),
        (Some(to), _) => LayerAction::Refuse(format!(
            "already diverted to {} by something else",
            to.display()
        )),
        (None, Ownership::Absent) => LayerAction::Skip("not present on this host".to_string()),
        (None, Ownership::ForeignFile) => {
            if host.entry(&layer.path)? != EntryKind::File {
                LayerAction::Refuse("not a regular file; left untouched".to_string())
            } else if exists(host, backup)? {
                LayerAction::Refuse(format!(
                    "backup {} already exists; not overwriting it",
                    backup.display()
                ))
            } else {
                LayerAction::DivertAndWrite
            }
        }
        (None, Ownership::OwnedByUs) => LayerAction::Refuse(
            "rmgate dispatcher present without a diversion; left untouched".to_string(),
        ),
        (None, Ownership::ForeignSymlink { .. } | Ownership::ThirdPartySymlink { .. }) => {
            LayerAction::Refuse("is a symlink; only regular files are diverted".to_string())
        }
    })
}

/// Decide how to uninstall `layer`. Only what classification proves is ours
/// is ever removed.
pub fn plan_uninstall(
    host: &(impl HostEnvironment + ?Sized),
    layer: &Layer,
    gate_binary: &Path,
) -> Result<LayerAction> {
    let ownership = classify(host, &layer.path, gate_binary)?;
    let backup = layer.backup();

    if layer.kind == LayerKind::PackageDivert {
        let diversion = host.diversion(&layer.path)?;
        return Ok(match (diversion, ownership) {
            (Some(to), Ownership::OwnedByUs) if to == backup => {
                LayerAction::RemoveDispatcher { present: true }
            }
            (Some(to), Ownership::Absent) if to == backup => {
                LayerAction::RemoveDispatcher { present: false }
            }
            (Some(to), _) if to == backup => LayerAction::Refuse(format!(
                "{} was replaced since install; diversion to {} left in place",
                layer.path.display(),
                backup.display()
            )),
            (Some(to), _) => {
                LayerAction::Skip(format!("diverted to {} by something else", to.display()))
            }
            (None, Ownership::OwnedByUs) => LayerAction::Refuse(
                "rmgate dispatcher present without a diversion; left untouched".to_string(),
            ),
            (None, _) => LayerAction::Skip("not installed".to_string()),
        });
    }

    let backup_present = exists(host, &backup)?;
    Ok(match ownership {
        Ownership::OwnedByUs => LayerAction::RemoveShim {
            restore_backup: backup_present,
        },
        Ownership::Absent if backup_present => LayerAction::Refuse(format!(
            "shim is gone; original left at {}",
            backup.display()
        )),
        _ if backup_present => LayerAction::Refuse(format!(
            "path was replaced since install; original left at {}",
            backup.display()
        )),
        Ownership::Absent => LayerAction::Skip("not installed".to_string()),
        _ => LayerAction::Skip("not managed by rmgate".to_string()),
    })
}

/// `err` from a failed second step, annotated when undoing the first step
/// failed too.
fn with_rollback(err: RmgateError, rollback: Result<()>) -> RmgateError {
    match rollback {
        Ok(()) => err,
        Err(rollback_err) => RmgateError::Runtime {
            details: format!("{err}; rollback failed, manual repair needed: {rollback_err}"),
        },
    }
}

/// Carry out `action` for `layer`. Multi-step actions roll back their first
/// step when the second fails.
pub fn apply(
    host: &(impl HostEnvironment + ?Sized),
    layer: &Layer,
    gate_binary: &Path,
    action: &LayerAction,
) -> Result<()> {
    let path = layer.path.as_path();
    let backup = layer.backup();
    let script = || dispatcher_script(gate_binary, layer.family);

    match action {
        LayerAction::CreateShim => {
            if let Some(parent) = path.parent() {
                host.create_dir_all(parent)?;
            }
            host.symlink(gate_binary, path)
        }
        LayerAction::TakeOver { .. } => {
            host.rename(path, &backup)?;
            if let Err(err) = host.symlink(gate_binary, path) {
                return Err(with_rollback(err, host.rename(&backup, path)));
            }
            Ok(())
        }
        LayerAction::DivertAndWrite => {
            host.divert(path, &backup)?;
            if let Err(err) = host.write_file(path, script().as_bytes(), EXECUTABLE_MODE) {
                return Err(with_rollback(err, host.undivert(path, &backup)));
            }
            Ok(())
        }
        LayerAction::RewriteDispatcher => {
            host.write_file(path, script().as_bytes(), EXECUTABLE_MODE)
        }
        LayerAction::RemoveShim { restore_backup } => {
            host.remove_file(path)?;
            if *restore_backup {
                if let Err(err) = host.rename(&backup, path) {
                    return Err(with_rollback(err, host.symlink(gate_binary, path)));
                }
            }
            Ok(())
        }
        LayerAction::RemoveDispatcher { present } => {
            if *present {
                host.remove_file(path)?;
            }
            if let Err(err) = host.undivert(path, &backup) {
                let rollback = if *present {
                    host.write_file(path, script().as_bytes(), EXECUTABLE_MODE)
                } else {
                    Ok(())
                };
                return Err(with_rollback(err, rollback));
            }
            Ok(())
        }
        LayerAction::Keep(_) | LayerAction::Skip(_) | LayerAction::Refuse(_) => Ok(()),
    }
}

/// Whether `layer` currently routes through the gate.
pub fn is_installed(
    host: &(impl HostEnvironment + ?Sized),
    layer: &Layer,
    gate_binary: &Path,
) -> Result<bool> {
    if classify(host, &layer.path, gate_binary)?.is_ours() {
        return Ok(true);
    }
    if layer.kind == LayerKind::PackageDivert {
        return Ok(host.diversion(&layer.path)? == Some(layer.backup()));
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::install::ownership::has_marker;
    use crate::platform::memory::MemoryHost;

    const GATE: &str = "/usr/local/lib/rmgate/rmgate";

    fn shim(path: &str) -> Layer {
        Layer {
            kind: LayerKind::UserBinShim,
            family: CommandFamily::Delete,
            path: PathBuf::from(path),
        }
    }

    fn divert(path: &str) -> Layer {
        Layer {
            kind: LayerKind::PackageDivert,
            family: CommandFamily::Delete,
            path: PathBuf::from(path),
        }
    }

    #[test]
    fn dispatcher_quotes_gate_path_and_carries_marker() {
        let script =
            dispatcher_script(Path::new("/opt/my tools/rmgate"), CommandFamily::VersionControl);
        assert!(script.starts_with("#!/bin/sh\n"));
        assert!(has_marker(script.as_bytes()));
        assert!(script.contains("exec '/opt/my tools/rmgate' --gate git \"$@\""));
    }

    #[test]
    fn soft_layers_on_macos_dedupe_usr_local_bin() {
        let host = MemoryHost::macos();
        let layers = layers_for(&host, InstallMode::Soft, &PathsConfig::default());
        let paths: Vec<_> = layers.iter().map(|l| l.path.clone()).collect();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/usr/local/bin/rm"),
                PathBuf::from("/usr/local/bin/git"),
                PathBuf::from("/opt/homebrew/bin/git"),
            ]
        );
        assert_eq!(layers[1].kind, LayerKind::UserBinShim);
    }

    #[test]
    fn hard_layers_collapse_merged_bin() {
        let host = MemoryHost::linux();
        host.add_dir("/usr/bin");
        host.add_symlink("/bin", "usr/bin");
        let layers = layers_for(&host, InstallMode::Hard, &PathsConfig::default());
        let paths: Vec<_> = layers.iter().map(|l| l.path.to_str().unwrap()).collect();
        assert_eq!(paths, vec!["/usr/bin/rm", "/usr/bin/git"]);
    }

    #[test]
    fn merged_bin_diverts_the_path_dpkg_registered() {
        let mut host = MemoryHost::linux();
        host.add_dir("/usr/bin");
        host.add_symlink("/bin", "usr/bin");
        host.packaged.insert(PathBuf::from("/bin/rm"));
        host.packaged.insert(PathBuf::from("/usr/bin/git"));
        let layers = layers_for(&host, InstallMode::Hard, &PathsConfig::default());
        let paths: Vec<_> = layers.iter().map(|l| l.path.to_str().unwrap()).collect();
        assert_eq!(paths, vec!["/bin/rm", "/usr/bin/git"]);
    }

    #[test]
    fn split_bin_keeps_both_rm_paths() {
        let mut host = MemoryHost::linux();
        host.add_dir("/usr/bin");
        host.add_dir("/bin");
        host.packaged.insert(PathBuf::from("/bin/rm"));
        let layers = layers_for(&host, InstallMode::Hard, &PathsConfig::default());
        let paths: Vec<_> = layers.iter().map(|l| l.path.to_str().unwrap()).collect();
        assert_eq!(paths, vec!["/bin/rm", "/usr/bin/rm", "/usr/bin/git"]);
    }

    #[test]
    fn hard_layers_empty_on_macos() {
        let host = MemoryHost::macos();
        assert!(layers_for(&host, InstallMode::Hard, &PathsConfig::default()).is_empty());
    }

    #[test]
    fn absent_third_party_path_is_skipped() {
        let host = MemoryHost::linux();
        let layer = Layer {
            kind: LayerKind::ThirdPartyShim,
            family: CommandFamily::VersionControl,
            path: PathBuf::from("/home/linuxbrew/.linuxbrew/bin/git"),
        };
        assert!(matches!(
            plan_install(&host, &layer, Path::new(GATE)).unwrap(),
            LayerAction::Skip(_)
        ));
    }

    #[test]
    fn take_over_rolls_back_when_symlink_fails() {
        let mut host = MemoryHost::macos();
        host.add_file("/opt/homebrew/Cellar/git/2.45.0/bin/git", "elf", 0o755);
        host.add_symlink("/opt/homebrew/bin/git", "../Cellar/git/2.45.0/bin/git");
        let layer = Layer {
            kind: LayerKind::ThirdPartyShim,
            family: CommandFamily::VersionControl,
            path: PathBuf::from("/opt/homebrew/bin/git"),
        };
        let action = plan_install(&host, &layer, Path::new(GATE)).unwrap();
        assert_eq!(
            action,
            LayerAction::TakeOver {
                manager: ThirdPartyManager::Homebrew
            }
        );

        let before = host.snapshot();
        host.fail_on.insert(PathBuf::from("/opt/homebrew/bin/git"));
        // Rename onto the backup path is allowed; only the new symlink fails.
        assert!(apply(&host, &layer, Path::new(GATE), &action).is_err());
        host.fail_on.clear();
        assert_eq!(host.snapshot(), before);
    }

    #[test]
    fn failed_rollback_is_reported() {
        let mut host = MemoryHost::macos();
        host.add_file("/opt/homebrew/Cellar/git/2.45.0/bin/git", "elf", 0o755);
        host.add_symlink("/opt/homebrew/bin/git", "../Cellar/git/2.45.0/bin/git");
        let layer = Layer {
            kind: LayerKind::ThirdPartyShim,
            family: CommandFamily::VersionControl,
            path: PathBuf::from("/opt/homebrew/bin/git"),
        };
        let action = plan_install(&host, &layer, Path::new(GATE)).unwrap();
        host.fail_on.insert(PathBuf::from("/opt/homebrew/bin/git"));
        host.fail_rename.insert(layer.backup());

        let err = apply(&host, &layer, Path::new(GATE), &action).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("rollback failed"), "{text}");
        assert!(text.contains("git.rmgate.real"), "{text}");
        assert_eq!(host.node("/opt/homebrew/bin/git"), None);
    }

    #[test]
    fn divert_plan_requires_regular_file_and_free_backup() {
        let host = MemoryHost::linux();
        host.add_file("/usr/bin/rm", "elf", 0o755);
        assert_eq!(
            plan_install(&host, &divert("/usr/bin/rm"), Path::new(GATE)).unwrap(),
            LayerAction::DivertAndWrite
        );

        host.add_file("/usr/bin/rm.rmgate.real", "stale", 0o755);
        assert!(matches!(
            plan_install(&host, &divert("/usr/bin/rm"), Path::new(GATE)).unwrap(),
            LayerAction::Refuse(_)
        ));
    }

    #[test]
    fn foreign_diversion_is_refused_and_not_undone() {
        let host = MemoryHost::linux();
        host.add_file("/usr/bin/rm", "elf", 0o755);
        host.add_diversion("/usr/bin/rm", "/usr/bin/rm.distrib");
        let layer = divert("/usr/bin/rm");
        assert!(matches!(
            plan_install(&host, &layer, Path::new(GATE)).unwrap(),
            LayerAction::Refuse(_)
        ));
        assert!(matches!(
            plan_uninstall(&host, &layer, Path::new(GATE)).unwrap(),
            LayerAction::Skip(_)
        ));
    }

    #[test]
    fn missing_dispatcher_is_rewritten_or_undiverted() {
        let host = MemoryHost::linux();
        host.add_file("/usr/bin/rm.rmgate.real", "elf", 0o755);
        host.add_diversion("/usr/bin/rm", "/usr/bin/rm.rmgate.real");
        let layer = divert("/usr/bin/rm");
        assert_eq!(
            plan_install(&host, &layer, Path::new(GATE)).unwrap(),
            LayerAction::RewriteDispatcher
        );
        assert_eq!(
            plan_uninstall(&host, &layer, Path::new(GATE)).unwrap(),
            LayerAction::RemoveDispatcher { present: false }
        );
        assert!(is_installed(&host, &layer, Path::new(GATE)).unwrap());
    }

    #[test]
    fn uninstall_refuses_replaced_shim_with_backup() {
        let host = MemoryHost::linux();
        host.add_file("/usr/local/bin/rm", "someone else's rm", 0o755);
        host.add_symlink("/usr/local/bin/rm.rmgate.real", "/elsewhere/rm");
        let action = plan_uninstall(&host, &shim("/usr/local/bin/rm"), Path::new(GATE)).unwrap();
        assert!(matches!(action, LayerAction::Refuse(ref text) if text.contains("rm.rmgate.real")));
    }

    #[test]
    fn action_status_mapping() {
        assert_eq!(LayerAction::CreateShim.status(false), StepStatus::Done);
        assert_eq!(LayerAction::CreateShim.status(true), StepStatus::Planned);
        assert_eq!(
            LayerAction::Refuse(String::new()).status(true),
            StepStatus::Refused
        );
        assert!(!LayerAction::Keep(String::new()).changes_host());
    }
}
