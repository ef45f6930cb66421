//! Install/uninstall orchestration for `rmgate install`, `uninstall`,
//! `install-hard`, `uninstall-hard` and `status`.
//!
//! Coordinates the sequence: precondition checks, gate binary deployment,
//! per-layer install or removal, and (hard mode) the sudoers drop-in. Every
//! layer is attempted independently; refusals and failures are collected in
//! the [`InstallReport`] instead of aborting the run.

pub mod layers;
pub mod ownership;
pub mod report;
pub mod sudoers;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use self::layers::{EXECUTABLE_MODE, InstallMode, Layer, LayerAction};
use self::ownership::classify;
use self::report::{InstallReport, LayerStatus, Operation, StatusReport, StepStatus};
use crate::core::config::PathsConfig;
use crate::core::errors::{Result, RmgateError};
use crate::core::paths::HostOs;
use crate::gate::toggle::ToggleStatus;
use crate::platform::host::{EntryKind, HostEnvironment};

/// Sequences layer changes against a host.
pub struct Orchestrator<'a, H: HostEnvironment + ?Sized> {
    host: &'a H,
    paths: &'a PathsConfig,
    dry_run: bool,
}

impl<'a, H: HostEnvironment + ?Sized> Orchestrator<'a, H> {
    #[must_use]
    pub const fn new(host: &'a H, paths: &'a PathsConfig) -> Self {
        Self {
            host,
            paths,
            dry_run: false,
        }
    }

    /// Plan only; the host is not modified.
    #[must_use]
    pub const fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Fatal checks run before anything is touched.
    fn check_preconditions(&self, mode: InstallMode) -> Result<()> {
        if mode == InstallMode::Hard {
            if self.host.os() != HostOs::Linux {
                return Err(RmgateError::UnsupportedPlatform {
                    details: "hard mode needs a dpkg-based Linux host".to_string(),
                });
            }
            if !self.host.has_divert_tool() {
                return Err(RmgateError::MissingTool {
                    tool: "dpkg-divert",
                });
            }
        }
        if !self.dry_run && !self.host.is_root() {
            return Err(RmgateError::PermissionDenied {
                details: "install and uninstall must run as root (use sudo)".to_string(),
            });
        }
        Ok(())
    }

    /// Deploy the gate binary from `gate_source`, then install every layer of
    /// `mode`.
    pub fn install(&self, mode: InstallMode, gate_source: &Path) -> Result<InstallReport> {
        self.check_preconditions(mode)?;
        let mut report = InstallReport::new(
            Operation::new(mode, false),
            self.paths.gate_binary.clone(),
            self.dry_run,
        );

        if !self.deploy_gate_binary(gate_source, &mut report) {
            // Layers pointing at a missing binary would break `rm` outright.
            return Ok(report);
        }

        for layer in layers::layers_for(self.host, mode, self.paths) {
            self.run_layer(&layer, layers::plan_install, &mut report);
        }
        if mode == InstallMode::Hard {
            sudoers::install(
                self.host,
                &self.paths.sudoers_dropin,
                &self.paths.gate_binary,
                self.dry_run,
                &mut report,
            );
        }
        Ok(report)
    }

    /// Remove every layer of `mode` that is provably ours. The gate binary
    /// goes too once no layer of either mode still uses it.
    pub fn uninstall(&self, mode: InstallMode) -> Result<InstallReport> {
        self.check_preconditions(mode)?;
        let mut report = InstallReport::new(
            Operation::new(mode, true),
            self.paths.gate_binary.clone(),
            self.dry_run,
        );

        let mut removed = BTreeSet::new();
        for layer in layers::layers_for(self.host, mode, self.paths) {
            if let Some(action) = self.run_layer(&layer, layers::plan_uninstall, &mut report) {
                if matches!(
                    action,
                    LayerAction::RemoveShim { .. } | LayerAction::RemoveDispatcher { .. }
                ) {
                    removed.insert(layer.path.clone());
                }
            }
        }
        if mode == InstallMode::Hard {
            sudoers::remove(
                self.host,
                &self.paths.sudoers_dropin,
                &self.paths.gate_binary,
                self.dry_run,
                &mut report,
            );
        }
        self.retire_gate_binary(&removed, &mut report);
        Ok(report)
    }

    /// Layers of both modes with their current state.
    pub fn status(&self, toggle: ToggleStatus) -> Result<StatusReport> {
        let gate = &self.paths.gate_binary;
        let mut statuses = Vec::new();
        for layer in self.all_layers() {
            let ownership = classify(self.host, &layer.path, gate)?;
            let diverted_to = if layer.kind == layers::LayerKind::PackageDivert {
                self.host.diversion(&layer.path)?
            } else {
                None
            };
            statuses.push(LayerStatus {
                command: layer.family,
                kind: layer.kind,
                backup_present: self.host.entry(&layer.backup())? != EntryKind::Missing,
                path: layer.path,
                ownership,
                diverted_to,
            });
        }

        Ok(StatusReport {
            os: self.host.os(),
            gate_binary: gate.clone(),
            gate_binary_present: self.host.entry(gate)? == EntryKind::File,
            layers: statuses,
            sudoers_dropin: self.paths.sudoers_dropin.clone(),
            sudoers_ownership: classify(self.host, &self.paths.sudoers_dropin, gate)?,
            toggle,
        })
    }

    fn all_layers(&self) -> Vec<Layer> {
        let mut all = layers::layers_for(self.host, InstallMode::Soft, self.paths);
        all.extend(layers::layers_for(self.host, InstallMode::Hard, self.paths));
        all
    }

    /// Plan one layer, apply unless dry-running, and record the step.
    fn run_layer(
        &self,
        layer: &Layer,
        plan: fn(&H, &Layer, &Path) -> Result<LayerAction>,
        report: &mut InstallReport,
    ) -> Option<LayerAction> {
        let description = layer.describe();
        let gate = &self.paths.gate_binary;
        let action = match plan(self.host, layer, gate) {
            Ok(action) => action,
            Err(err) => {
                report.step_fail(description, err.to_string());
                return None;
            }
        };

        if !self.dry_run && action.changes_host() {
            if let Err(err) = layers::apply(self.host, layer, gate, &action) {
                report.step_fail(description, err.to_string());
                return None;
            }
        }
        report.push(action.status(self.dry_run), description, action.detail(layer));
        Some(action)
    }

    /// Copy the running binary into place unless an identical copy is there.
    /// Returns false when layers must not be installed.
    fn deploy_gate_binary(&self, source: &Path, report: &mut InstallReport) -> bool {
        let gate = &self.paths.gate_binary;
        let description = format!("gate binary {}", gate.display());

        let bytes = match self.host.read(source) {
            Ok(bytes) => bytes,
            Err(err) => {
                report.step_fail(description, err.to_string());
                return false;
            }
        };
        let digest = hex_digest(&bytes);
        let deployed = match self.host.entry(gate) {
            Ok(EntryKind::File) => self.host.read(gate).ok().map(|b| hex_digest(&b)),
            _ => None,
        };

        if deployed.as_deref() == Some(digest.as_str()) {
            report.push(
                StepStatus::Unchanged,
                description,
                Some(format!("sha256 {}", &digest[..12])),
            );
            return true;
        }
        if self.dry_run {
            report.push(StepStatus::Planned, description, Some(format!("copy from {}", source.display())));
            return true;
        }

        let write = || -> Result<()> {
            if let Some(parent) = gate.parent() {
                self.host.create_dir_all(parent)?;
            }
            self.host.write_file(gate, &bytes, EXECUTABLE_MODE)
        };
        match write() {
            Ok(()) => {
                report.push(
                    StepStatus::Done,
                    description,
                    Some(format!("sha256 {}", &digest[..12])),
                );
                true
            }
            Err(err) => {
                report.step_fail(description, err.to_string());
                false
            }
        }
    }

    /// Remove the deployed binary when nothing routes through it anymore.
    fn retire_gate_binary(&self, removed: &BTreeSet<PathBuf>, report: &mut InstallReport) {
        let gate = &self.paths.gate_binary;
        let description = format!("gate binary {}", gate.display());

        let mut remaining = 0usize;
        for layer in self.all_layers() {
            if removed.contains(&layer.path) && self.dry_run {
                continue;
            }
            match layers::is_installed(self.host, &layer, gate) {
                Ok(false) => {}
                Ok(true) | Err(_) => remaining += 1,
            }
        }

        if remaining > 0 {
            report.push(
                StepStatus::Skipped,
                description,
                Some(format!("kept; still used by {remaining} layer(s)")),
            );
            return;
        }
        match self.host.entry(gate) {
            Ok(EntryKind::File) => {}
            Ok(EntryKind::Missing) => {
                report.push(StepStatus::Skipped, description, Some("not present".to_string()));
                return;
            }
            Ok(_) => {
                report.push(
                    StepStatus::Refused,
                    description,
                    Some("not a regular file; left untouched".to_string()),
                );
                return;
            }
            Err(err) => {
                report.step_fail(description, err.to_string());
                return;
            }
        }
        if self.dry_run {
            report.push(StepStatus::Planned, description, None);
            return;
        }
        match self.host.remove_file(gate) {
            Ok(()) => {
                if let Some(parent) = gate.parent() {
                    self.host.remove_empty_dir(parent);
                }
                report.step_ok(description);
            }
            Err(err) => report.step_fail(description, err.to_string()),
        }
    }
}

fn hex_digest(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
