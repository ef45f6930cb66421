//! Confirmation over a genuine terminal.
//!
//! The prompt goes to the controlling terminal device directly, never to the
//! process's standard streams, so a gate invoked from a pipeline still reaches
//! the human sitting at the keyboard. When no terminal can be reached the
//! outcome is `Unavailable` and the caller blocks the command.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crossterm::style::Stylize;
use crossterm::tty::IsTty;

use crate::core::paths::{CONFIRM_TOKEN, EXIT_BLOCKED, EXIT_DECLINED};

/// Default controlling-terminal device.
pub const TTY_DEVICE: &str = "/dev/tty";

/// Result of one confirmation exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalOutcome {
    /// The operator typed the confirmation token.
    Confirmed,
    /// The operator typed anything else, including an empty line.
    Rejected,
    /// No terminal could be reached.
    Unavailable,
    /// The terminal went away (EOF, hangup, I/O error) before an answer.
    ReadFailed,
}

impl TerminalOutcome {
    /// Process exit code for a blocked outcome; `None` when confirmed.
    #[must_use]
    pub const fn exit_code(self) -> Option<i32> {
        match self {
            Self::Confirmed => None,
            Self::Rejected => Some(EXIT_DECLINED),
            Self::Unavailable | Self::ReadFailed => Some(EXIT_BLOCKED),
        }
    }
}

/// Anything that can ask a human to confirm a rendered command line.
pub trait ConfirmationChannel {
    /// Present `rendered` and wait for an answer.
    fn confirm(&mut self, rendered: &str) -> TerminalOutcome;
}

/// Confirmation channel backed by the controlling terminal.
#[derive(Debug, Clone)]
pub struct TerminalGate {
    device: PathBuf,
}

impl Default for TerminalGate {
    fn default() -> Self {
        Self::with_device(TTY_DEVICE)
    }
}

impl TerminalGate {
    /// Gate that talks to `device` instead of `/dev/tty`.
    #[must_use]
    pub fn with_device(device: impl AsRef<Path>) -> Self {
        Self {
            device: device.as_ref().to_path_buf(),
        }
    }

    /// Open a read handle and a write handle on a usable terminal.
    ///
    /// Tries the terminal device first; on any failure (including a device
    /// node that exists but refuses the open) falls back to stdin, but only
    /// when stdin is itself a terminal.
    fn acquire(&self) -> Option<(Box<dyn BufRead>, Box<dyn Write>)> {
        if let Some((reader, writer)) = open_device(&self.device) {
            return Some((Box::new(BufReader::new(reader)), Box::new(writer)));
        }

        let stdin = io::stdin();
        if !stdin.is_tty() {
            return None;
        }
        let writer: Box<dyn Write> = if io::stderr().is_tty() || !io::stdout().is_tty() {
            Box::new(io::stderr())
        } else {
            Box::new(io::stdout())
        };
        Some((Box::new(stdin.lock()), writer))
    }
}

fn open_device(device: &Path) -> Option<(File, File)> {
    let reader = File::open(device).ok()?;
    let writer = OpenOptions::new().append(true).open(device).ok()?;
    Some((reader, writer))
}

impl ConfirmationChannel for TerminalGate {
    fn confirm(&mut self, rendered: &str) -> TerminalOutcome {
        let Some((mut reader, mut writer)) = self.acquire() else {
            return TerminalOutcome::Unavailable;
        };
        let outcome = prompt(&mut reader, &mut writer, rendered);
        if outcome == TerminalOutcome::Rejected {
            let _ = writeln!(writer, "{}", "Not confirmed. Nothing was executed.".yellow());
        }
        // Handles drop here, before the caller replaces this process.
        outcome
    }
}

/// Run the notice-and-answer exchange over arbitrary streams.
pub fn prompt<R: BufRead + ?Sized, W: Write + ?Sized>(
    reader: &mut R,
    writer: &mut W,
    rendered: &str,
) -> TerminalOutcome {
    if write_notice(writer, rendered).is_err() {
        return TerminalOutcome::ReadFailed;
    }

    let mut answer = Vec::new();
    match reader.read_until(b'\n', &mut answer) {
        Ok(0) | Err(_) => TerminalOutcome::ReadFailed,
        Ok(_) => {
            let line = answer.strip_suffix(b"\n").unwrap_or(&answer);
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if line == CONFIRM_TOKEN.as_bytes() {
                TerminalOutcome::Confirmed
            } else {
                TerminalOutcome::Rejected
            }
        }
    }
}

fn write_notice<W: Write + ?Sized>(writer: &mut W, rendered: &str) -> io::Result<()> {
    writeln!(writer)?;
    writeln!(
        writer,
        "{}",
        "rmgate: destructive command intercepted".red().bold()
    )?;
    writeln!(writer, "  {} {}", "command:".bold(), rendered.bold())?;
    writeln!(
        writer,
        "  This can permanently destroy files or repository history."
    )?;
    write!(writer, "Type '{CONFIRM_TOKEN}' to proceed: ")?;
    writer.flush()
}
