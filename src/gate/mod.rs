//! Runtime gate: the per-invocation decision loop run in front of `rm` and
//! `git`.
//!
//! [`evaluate`] is the pure-ish state machine (classification, toggle state,
//! confirmation). [`run`] wires it to the real terminal, the audit sink and
//! the resolver, and ends by replacing the process with the real binary.

pub mod classify;
pub mod resolve;
pub mod terminal;
pub mod toggle;

use std::ffi::OsString;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::Command;

use self::classify::{CommandFamily, CommandInvocation};
use self::resolve::RealTargetResolver;
use self::terminal::{ConfirmationChannel, TerminalGate, TerminalOutcome};
use self::toggle::{DisabledStateOracle, ToggleEnv, ToggleScope};
use crate::core::config::Config;
use crate::core::paths::{EXIT_BLOCKED, EXIT_NOT_FOUND, HostOs, PROGRAM};
use crate::logger::{AuditAction, AuditEvent, AuditSink};

/// Terminal state of the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateVerdict {
    /// Resolve the real binary and replace this process with it.
    Transfer,
    /// Exit with this code; the real binary never runs.
    Block(i32),
}

/// Everything [`run`] needs to act on and report a decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    /// Whether the real binary runs.
    pub verdict: GateVerdict,
    /// Shell-escaped command line.
    pub rendered: String,
    /// Audit record to emit, if the invocation was destructive.
    pub audit: Option<AuditAction>,
    /// Set when a disabled toggle let a destructive command through.
    pub bypassed_by: Option<ToggleScope>,
    /// Set when the operator was asked.
    pub outcome: Option<TerminalOutcome>,
}

/// Decide what to do with `invocation`.
///
/// `disabled` is only consulted for destructive commands, so benign
/// invocations never touch the toggle markers.
pub fn evaluate(
    invocation: &CommandInvocation,
    disabled: impl FnOnce() -> Option<ToggleScope>,
    channel: &mut dyn ConfirmationChannel,
) -> Evaluation {
    let decision = invocation.decide();
    let mut evaluation = Evaluation {
        verdict: GateVerdict::Transfer,
        rendered: decision.rendered,
        audit: None,
        bypassed_by: None,
        outcome: None,
    };
    if !decision.must_confirm {
        return evaluation;
    }
    if let Some(scope) = disabled() {
        evaluation.audit = Some(AuditAction::Bypassed);
        evaluation.bypassed_by = Some(scope);
        return evaluation;
    }

    let outcome = channel.confirm(&evaluation.rendered);
    evaluation.outcome = Some(outcome);
    (evaluation.verdict, evaluation.audit) = match outcome.exit_code() {
        None => (GateVerdict::Transfer, Some(AuditAction::Confirmed)),
        Some(code) if outcome == TerminalOutcome::Rejected => {
            (GateVerdict::Block(code), Some(AuditAction::Declined))
        }
        Some(code) => (GateVerdict::Block(code), Some(AuditAction::Blocked)),
    };
    evaluation
}

/// One-line explanation printed to stderr when the gate blocks.
#[must_use]
pub fn block_message(evaluation: &Evaluation) -> String {
    let reason = match evaluation.outcome {
        Some(TerminalOutcome::Rejected) => "not confirmed; nothing was executed",
        Some(TerminalOutcome::ReadFailed) => {
            "the terminal closed before confirmation; nothing was executed"
        }
        _ => "destructive command needs confirmation but no terminal is available",
    };
    format!("{PROGRAM}: blocked `{}`: {reason}", evaluation.rendered)
}

fn audit_event(evaluation: &Evaluation, action: AuditAction) -> AuditEvent {
    let event = AuditEvent::new(action, evaluation.rendered.clone());
    match (evaluation.bypassed_by, evaluation.outcome) {
        (Some(scope), _) => event.with_detail(format!("disabled by {}", scope.label())),
        (_, Some(TerminalOutcome::Unavailable)) => event.with_detail("no terminal"),
        (_, Some(TerminalOutcome::ReadFailed)) => event.with_detail("terminal read failed"),
        _ => event,
    }
}

/// Run the gate for `family` with `args` (excluding `argv[0]`).
///
/// Returns only when the command is blocked or the hand-over fails; the
/// return value is the process exit code.
#[must_use]
pub fn run(family: CommandFamily, args: Vec<OsString>) -> i32 {
    let config = Config::load_for_gate();
    let invocation = CommandInvocation::new(family, args);
    let oracle = DisabledStateOracle::new(ToggleEnv::from_process(
        &config.paths.system_disabled_marker,
    ));
    let mut terminal = TerminalGate::default();

    let evaluation = evaluate(&invocation, || oracle.disabled_by(), &mut terminal);
    if let Some(action) = evaluation.audit {
        AuditSink::from_config(&config.audit, HostOs::current())
            .record(&audit_event(&evaluation, action));
    }

    match evaluation.verdict {
        GateVerdict::Block(code) => {
            eprintln!("{}", block_message(&evaluation));
            code
        }
        GateVerdict::Transfer => transfer(&invocation, &config.paths.shim_dir),
    }
}

/// `ResolveAndTransfer`: replace this process with the real binary.
fn transfer(invocation: &CommandInvocation, shim_dir: &Path) -> i32 {
    let family = invocation.family();
    let real = match RealTargetResolver::for_current_process(shim_dir)
        .and_then(|resolver| resolver.resolve(family))
    {
        Ok(real) => real,
        Err(err) => {
            eprintln!("{PROGRAM}: {err}");
            return EXIT_NOT_FOUND;
        }
    };

    let err = Command::new(&real)
        .arg0(family.command_name())
        .args(invocation.args())
        .exec();
    eprintln!("{PROGRAM}: cannot execute {}: {err}", real.display());
    if err.kind() == std::io::ErrorKind::NotFound {
        EXIT_NOT_FOUND
    } else {
        EXIT_BLOCKED
    }
}
