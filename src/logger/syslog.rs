//! RFC 3164 datagrams to the local syslog socket.

use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};

use chrono::Local;

use super::{AuditAction, AuditEvent};
use crate::core::paths::PROGRAM;

/// `LOG_AUTH`
const FACILITY_AUTH: u8 = 4;
const SEVERITY_WARNING: u8 = 4;
const SEVERITY_NOTICE: u8 = 5;

/// Writes audit events to a syslog Unix datagram socket.
#[derive(Debug, Clone)]
pub struct SyslogWriter {
    socket: PathBuf,
}

impl SyslogWriter {
    #[must_use]
    pub fn new(socket: impl AsRef<Path>) -> Self {
        Self {
            socket: socket.as_ref().to_path_buf(),
        }
    }

    /// Send one event. Failures are ignored.
    pub fn send(&self, event: &AuditEvent) {
        let Ok(sock) = UnixDatagram::unbound() else {
            return;
        };
        let _ = sock.send_to(format_datagram(event).as_bytes(), &self.socket);
    }
}

fn priority(action: AuditAction) -> u8 {
    let severity = match action {
        AuditAction::Blocked | AuditAction::Declined => SEVERITY_WARNING,
        AuditAction::Confirmed | AuditAction::Bypassed => SEVERITY_NOTICE,
    };
    FACILITY_AUTH * 8 + severity
}

/// `<PRI>Mmm dd hh:mm:ss rmgate[pid]: message`
fn format_datagram(event: &AuditEvent) -> String {
    let stamp = event.ts.with_timezone(&Local).format("%b %e %H:%M:%S");
    format!(
        "<{}>{stamp} {PROGRAM}[{}]: {}",
        priority(event.action),
        event.pid,
        event.to_line().replace(['\n', '\r'], " ")
    )
}
