//! Decision audit trail: syslog plus an optional JSONL file, both best-effort.
//!
//! Nothing in here may fail the gate. Every write error is swallowed.

pub mod jsonl;
pub mod syslog;

use std::fmt::Write as _;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::config::AuditConfig;
use crate::core::paths::HostOs;

/// What happened to a gated invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// Destructive command refused: no terminal, or the terminal went away.
    Blocked,
    /// Destructive command refused by the operator.
    Declined,
    /// Destructive command confirmed and handed to the real binary.
    Confirmed,
    /// Destructive command passed through because gating is disabled.
    Bypassed,
}

impl AuditAction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Blocked => "BLOCKED",
            Self::Declined => "DECLINED",
            Self::Confirmed => "CONFIRMED",
            Self::Bypassed => "BYPASSED",
        }
    }
}

/// One decision record.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub ts: DateTime<Utc>,
    pub action: AuditAction,
    /// Shell-escaped command line.
    pub command: String,
    pub user: String,
    /// `SUDO_USER`, when elevated.
    pub sudo_user: Option<String>,
    pub pid: u32,
    pub cwd: Option<PathBuf>,
    /// Why the decision went the way it did, when not obvious from `action`.
    pub detail: Option<String>,
}

impl AuditEvent {
    /// Event stamped with the current process identity.
    #[must_use]
    pub fn new(action: AuditAction, command: impl Into<String>) -> Self {
        Self {
            ts: Utc::now(),
            action,
            command: command.into(),
            user: current_user_name(),
            sudo_user: std::env::var(crate::core::paths::ENV_SUDO_USER).ok(),
            pid: std::process::id(),
            cwd: std::env::current_dir().ok(),
            detail: None,
        }
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Single-line text form used for syslog.
    #[must_use]
    pub fn to_line(&self) -> String {
        let mut line = format!("{} user={}", self.action.as_str(), self.user);
        if let Some(sudo) = &self.sudo_user {
            let _ = write!(line, " sudo_user={sudo}");
        }
        if let Some(cwd) = &self.cwd {
            let _ = write!(line, " cwd={}", cwd.display());
        }
        if let Some(detail) = &self.detail {
            let _ = write!(line, " reason={detail:?}");
        }
        let _ = write!(line, " cmd={}", self.command);
        line
    }
}

fn current_user_name() -> String {
    nix::unistd::User::from_uid(nix::unistd::getuid())
        .ok()
        .flatten()
        .map(|u| u.name)
        .or_else(|| std::env::var("USER").ok())
        .unwrap_or_else(|| format!("uid:{}", nix::unistd::getuid()))
}

/// Dual-write sink.
#[derive(Debug, Clone)]
pub struct AuditSink {
    syslog: Option<syslog::SyslogWriter>,
    jsonl: Option<jsonl::JsonlWriter>,
}

impl AuditSink {
    /// Sink configured from `[audit]`.
    #[must_use]
    pub fn from_config(config: &AuditConfig, os: HostOs) -> Self {
        Self {
            syslog: config
                .syslog
                .then(|| syslog::SyslogWriter::new(os.syslog_socket())),
            jsonl: config.jsonl_log.as_ref().map(jsonl::JsonlWriter::new),
        }
    }

    /// Record `event` everywhere configured. Never fails.
    pub fn record(&self, event: &AuditEvent) {
        if let Some(writer) = &self.syslog {
            writer.send(event);
        }
        if let Some(writer) = &self.jsonl {
            writer.append(event);
        }
    }
}
