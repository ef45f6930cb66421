//! Structured results of `install`, `uninstall` and `status`, plus their
//! human formatting. JSON output serializes these types directly.

use std::fmt::Write as _;
use std::path::PathBuf;

use serde::Serialize;

use super::layers::{InstallMode, LayerKind};
use super::ownership::Ownership;
use crate::core::paths::HostOs;
use crate::gate::classify::CommandFamily;
use crate::gate::toggle::ToggleStatus;

// ---------------------------------------------------------------------------
// Install / uninstall report
// ---------------------------------------------------------------------------

/// How a single step ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Change applied.
    Done,
    /// Already in the desired state.
    Unchanged,
    /// Would be applied (dry run).
    Planned,
    /// Not applicable on this host.
    Skipped,
    /// Left alone because the path is not ours.
    Refused,
    /// Attempted and failed.
    Failed,
}

impl StepStatus {
    /// Four-letter tag used in the text report.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Done => "DONE",
            Self::Unchanged => "KEEP",
            Self::Planned => "PLAN",
            Self::Skipped => "SKIP",
            Self::Refused => "WARN",
            Self::Failed => "FAIL",
        }
    }

    /// Whether this step leaves the host short of the requested state.
    #[must_use]
    pub const fn is_problem(self) -> bool {
        matches!(self, Self::Refused | Self::Failed)
    }
}

/// A single step in an install or uninstall run.
#[derive(Debug, Clone, Serialize)]
pub struct InstallStep {
    /// Human-readable description.
    pub description: String,
    pub status: StepStatus,
    /// Reason, warning or error text.
    pub detail: Option<String>,
}

/// Which administrative operation produced a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    Install,
    Uninstall,
    InstallHard,
    UninstallHard,
}

impl Operation {
    #[must_use]
    pub const fn new(mode: InstallMode, removing: bool) -> Self {
        match (mode, removing) {
            (InstallMode::Soft, false) => Self::Install,
            (InstallMode::Soft, true) => Self::Uninstall,
            (InstallMode::Hard, false) => Self::InstallHard,
            (InstallMode::Hard, true) => Self::UninstallHard,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Uninstall => "uninstall",
            Self::InstallHard => "install-hard",
            Self::UninstallHard => "uninstall-hard",
        }
    }
}

/// Structured report from an install or uninstall run.
#[derive(Debug, Clone, Serialize)]
pub struct InstallReport {
    pub operation: Operation,
    /// Ordered list of steps attempted.
    pub steps: Vec<InstallStep>,
    /// No step was refused or failed.
    pub success: bool,
    /// Deployed gate binary every layer points at.
    pub gate_binary: PathBuf,
    /// Whether this was a dry run.
    pub dry_run: bool,
}

impl InstallReport {
    #[must_use]
    pub const fn new(operation: Operation, gate_binary: PathBuf, dry_run: bool) -> Self {
        Self {
            operation,
            steps: Vec::new(),
            success: true,
            gate_binary,
            dry_run,
        }
    }

    pub fn push(
        &mut self,
        status: StepStatus,
        description: impl Into<String>,
        detail: Option<String>,
    ) {
        if status.is_problem() {
            self.success = false;
        }
        self.steps.push(InstallStep {
            description: description.into(),
            status,
            detail,
        });
    }

    pub fn step_ok(&mut self, description: impl Into<String>) {
        self.push(StepStatus::Done, description, None);
    }

    pub fn step_fail(&mut self, description: impl Into<String>, error: impl Into<String>) {
        self.push(StepStatus::Failed, description, Some(error.into()));
    }

    /// Number of steps in `status`.
    #[must_use]
    pub fn count(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }
}

// ---------------------------------------------------------------------------
// Status report
// ---------------------------------------------------------------------------

/// State of one layer path.
#[derive(Debug, Clone, Serialize)]
pub struct LayerStatus {
    pub command: CommandFamily,
    pub kind: LayerKind,
    pub path: PathBuf,
    pub ownership: Ownership,
    /// `<path>.rmgate.real` exists.
    pub backup_present: bool,
    /// dpkg diversion target, for divert layers.
    pub diverted_to: Option<PathBuf>,
}

/// Output of `rmgate status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub os: HostOs,
    pub gate_binary: PathBuf,
    pub gate_binary_present: bool,
    pub layers: Vec<LayerStatus>,
    pub sudoers_dropin: PathBuf,
    pub sudoers_ownership: Ownership,
    pub toggle: ToggleStatus,
}

impl StatusReport {
    /// At least one layer of any mode routes through the gate.
    #[must_use]
    pub fn any_installed(&self) -> bool {
        self.layers.iter().any(|l| l.ownership.is_ours())
    }
}

// ---------------------------------------------------------------------------
// Human formatting
// ---------------------------------------------------------------------------

/// Format an install or uninstall report for terminal output.
#[must_use]
pub fn format_install_report(report: &InstallReport) -> String {
    let mut out = String::new();

    let suffix = if report.dry_run { " (dry run)" } else { "" };
    let _ = writeln!(out, "rmgate {}{suffix}:\n", report.operation.as_str());

    for step in &report.steps {
        let _ = writeln!(out, "  [{}] {}", step.status.tag(), step.description);
        if let Some(detail) = &step.detail {
            let label = match step.status {
                StepStatus::Failed => "error",
                StepStatus::Refused => "warning",
                _ => "note",
            };
            let _ = writeln!(out, "         {label}: {detail}");
        }
    }

    let problems = report.count(StepStatus::Refused) + report.count(StepStatus::Failed);
    out.push('\n');
    if problems == 0 {
        let _ = writeln!(out, "  All steps completed.");
    } else {
        let _ = writeln!(
            out,
            "  {problems} step(s) need attention; other layers were still processed."
        );
    }
    out
}

/// Format `rmgate status` for terminal output.
#[must_use]
pub fn format_status_report(report: &StatusReport) -> String {
    let mut out = String::new();

    let gating = if report.toggle.enabled {
        "enabled".to_string()
    } else {
        let by = report
            .toggle
            .disabled_by
            .map_or("unknown", |scope| scope.label());
        format!("DISABLED by {by}")
    };
    let _ = writeln!(out, "rmgate status:\n");
    let _ = writeln!(out, "  Gating:      {gating}");
    let _ = writeln!(
        out,
        "  Gate binary: {} ({})",
        report.gate_binary.display(),
        if report.gate_binary_present {
            "present"
        } else {
            "missing"
        }
    );
    let _ = writeln!(
        out,
        "  Sudoers:     {} ({})",
        report.sudoers_dropin.display(),
        report.sudoers_ownership.label()
    );
    out.push('\n');

    for layer in &report.layers {
        let _ = write!(
            out,
            "  {:<4} {:<16} {:<44} {}",
            layer.command.command_name(),
            layer.kind.label(),
            layer.path.display(),
            layer.ownership.label()
        );
        if let Some(to) = &layer.diverted_to {
            let _ = write!(out, ", diverted to {}", to.display());
        }
        if layer.backup_present {
            let _ = write!(out, ", backup present");
        }
        out.push('\n');
    }
    out
}
