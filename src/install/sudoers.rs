//! Sudoers drop-in that strips the one-shot bypass variable at the sudo
//! boundary.

use std::path::Path;

use super::ownership::{Ownership, classify};
use super::report::{InstallReport, StepStatus};
use crate::core::paths::{ENV_DISABLED, INSTALL_MARKER};
use crate::platform::host::{EntryKind, HostEnvironment, SudoersCheck};

/// Required mode for files under `/etc/sudoers.d`.
pub const DROPIN_MODE: u32 = 0o440;

/// Full drop-in text.
#[must_use]
pub fn dropin_contents() -> String {
    format!("{INSTALL_MARKER}\nDefaults env_delete += \"{ENV_DISABLED}\"\n")
}

/// Write the drop-in after `visudo` validation. Validation failure or a
/// missing `visudo` skips the step with a note; it never fails the install.
pub fn install(
    host: &(impl HostEnvironment + ?Sized),
    path: &Path,
    gate_binary: &Path,
    dry_run: bool,
    report: &mut InstallReport,
) {
    let description = format!("sudoers drop-in {}", path.display());
    let contents = dropin_contents();

    match classify(host, path, gate_binary) {
        Err(err) => report.step_fail(description, err.to_string()),
        Ok(Ownership::OwnedByUs)
            if host.read(path).is_ok_and(|bytes| bytes == contents.as_bytes()) =>
        {
            report.push(
                StepStatus::Unchanged,
                description,
                Some("already installed".to_string()),
            );
        }
        Ok(Ownership::Absent | Ownership::OwnedByUs) => {
            let parent_ok = path
                .parent()
                .is_some_and(|parent| host.entry(parent).ok() == Some(EntryKind::Directory));
            if !parent_ok {
                report.push(
                    StepStatus::Skipped,
                    description,
                    Some("sudoers.d directory not found; sudo may not be installed".to_string()),
                );
                return;
            }
            match host.validate_sudoers(contents.as_bytes()) {
                SudoersCheck::Valid => {}
                SudoersCheck::Invalid(msg) => {
                    report.push(
                        StepStatus::Skipped,
                        description,
                        Some(format!("failed visudo validation, not written: {msg}")),
                    );
                    return;
                }
                SudoersCheck::Unavailable => {
                    report.push(
                        StepStatus::Skipped,
                        description,
                        Some("visudo not found, not written".to_string()),
                    );
                    return;
                }
            }
            if dry_run {
                report.push(StepStatus::Planned, description, None);
                return;
            }
            match host.write_file(path, contents.as_bytes(), DROPIN_MODE) {
                Ok(()) => report.step_ok(description),
                Err(err) => report.step_fail(description, err.to_string()),
            }
        }
        Ok(_) => report.push(
            StepStatus::Refused,
            description,
            Some("existing file not created by rmgate; left untouched".to_string()),
        ),
    }
}

/// Delete the drop-in, but only when it carries the marker.
pub fn remove(
    host: &(impl HostEnvironment + ?Sized),
    path: &Path,
    gate_binary: &Path,
    dry_run: bool,
    report: &mut InstallReport,
) {
    let description = format!("sudoers drop-in {}", path.display());
    match classify(host, path, gate_binary) {
        Err(err) => report.step_fail(description, err.to_string()),
        Ok(Ownership::OwnedByUs) if dry_run => report.push(StepStatus::Planned, description, None),
        Ok(Ownership::OwnedByUs) => match host.remove_file(path) {
            Ok(()) => report.step_ok(description),
            Err(err) => report.step_fail(description, err.to_string()),
        },
        Ok(Ownership::Absent) => report.push(
            StepStatus::Skipped,
            description,
            Some("not installed".to_string()),
        ),
        Ok(_) => report.push(
            StepStatus::Refused,
            description,
            Some("not created by rmgate; left untouched".to_string()),
        ),
    }
}
