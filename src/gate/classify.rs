//! Argument classification: does this argv describe a destructive action?
//!
//! Pure functions over the raw argument vector. No I/O, no environment.

use std::borrow::Cow;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::str::FromStr;

use serde::Serialize;

/// Command family guarded by rmgate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandFamily {
    /// `rm`
    Delete,
    /// `git`
    VersionControl,
}

impl CommandFamily {
    /// Every guarded family, in install order.
    pub const ALL: [Self; 2] = [Self::Delete, Self::VersionControl];

    /// Command name as typed by users and as installed on disk.
    #[must_use]
    pub const fn command_name(self) -> &'static str {
        match self {
            Self::Delete => "rm",
            Self::VersionControl => "git",
        }
    }

    /// Family for an `argv[0]`, matched on its basename.
    #[must_use]
    pub fn from_argv0(argv0: &OsStr) -> Option<Self> {
        let name = std::path::Path::new(argv0).file_name()?;
        name.to_str()?.parse().ok()
    }
}

impl fmt::Display for CommandFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.command_name())
    }
}

impl FromStr for CommandFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rm" => Ok(Self::Delete),
            "git" => Ok(Self::VersionControl),
            other => Err(format!("unsupported command family: {other}")),
        }
    }
}

/// One gated process start. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInvocation {
    family: CommandFamily,
    args: Vec<OsString>,
}

impl CommandInvocation {
    /// Capture an invocation; `args` excludes `argv[0]`.
    #[must_use]
    pub fn new(family: CommandFamily, args: Vec<OsString>) -> Self {
        Self { family, args }
    }

    /// Guarded command this invocation targets.
    #[must_use]
    pub const fn family(&self) -> CommandFamily {
        self.family
    }

    /// Arguments after `argv[0]`, untouched.
    #[must_use]
    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    /// Classify and render this invocation.
    #[must_use]
    pub fn decide(&self) -> GateDecision {
        GateDecision {
            must_confirm: must_confirm(self.family, &self.args),
            rendered: render_command_line(self.family, &self.args),
        }
    }
}

/// Outcome of classification for a single invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateDecision {
    /// Whether a human must type the confirmation token first.
    pub must_confirm: bool,
    /// Shell-escaped command line shown to the human and written to the audit log.
    pub rendered: String,
}

/// Whether `args` (excluding `argv[0]`) is destructive for `family`.
#[must_use]
pub fn must_confirm<S: AsRef<OsStr>>(family: CommandFamily, args: &[S]) -> bool {
    let args: Vec<Cow<'_, str>> = args.iter().map(|a| a.as_ref().to_string_lossy()).collect();
    match family {
        CommandFamily::Delete => delete_is_destructive(&args),
        CommandFamily::VersionControl => git_is_destructive(&args),
    }
}

/// Reconstruct the command line with POSIX shell quoting.
#[must_use]
pub fn render_command_line<S: AsRef<OsStr>>(family: CommandFamily, args: &[S]) -> String {
    let words = std::iter::once(Cow::Borrowed(family.command_name()))
        .chain(args.iter().map(|a| a.as_ref().to_string_lossy()));
    shell_words::join(words)
}

// ---------------------------------------------------------------------------
// rm
// ---------------------------------------------------------------------------

fn delete_is_destructive(args: &[Cow<'_, str>]) -> bool {
    let mut force = false;
    let mut recursive = false;

    for arg in args {
        match &**arg {
            "--" => break,
            "-" => {}
            "--force" => force = true,
            "--recursive" => recursive = true,
            // Clustered short options; long spellings and abbreviations such
            // as `--forc` or `--recur` land here too.
            group if group.starts_with('-') => {
                force |= group.contains('f');
                recursive |= group.contains(['r', 'R']);
            }
            _ => {}
        }
        if force && recursive {
            return true;
        }
    }
    false
}

// ---------------------------------------------------------------------------
// git
// ---------------------------------------------------------------------------

/// Global options that consume the following token as their value.
const GIT_VALUE_GLOBALS: &[&str] = &[
    "-C",
    "-c",
    "--git-dir",
    "--work-tree",
    "--config-env",
    "--exec-path",
    "--html-path",
    "--man-path",
    "--info-path",
    "--namespace",
    "--super-prefix",
];

/// Position and name of the git subcommand, skipping global options.
#[must_use]
pub fn git_subcommand<S: AsRef<str>>(args: &[S]) -> Option<(usize, &str)> {
    let mut idx = 0;
    while idx < args.len() {
        let token = args[idx].as_ref();
        if token == "--" {
            return args.get(idx + 1).map(|s| (idx + 1, s.as_ref()));
        }
        if GIT_VALUE_GLOBALS.contains(&token) {
            idx += 2;
            continue;
        }
        if token.starts_with('-') {
            // `--opt=value` and flag-only globals both take one slot.
            idx += 1;
            continue;
        }
        return Some((idx, token));
    }
    None
}

fn git_is_destructive(args: &[Cow<'_, str>]) -> bool {
    let Some((idx, subcommand)) = git_subcommand(args) else {
        return false;
    };
    let any = |flags: &[&str]| args.iter().any(|a| flags.contains(&&**a));

    match subcommand {
        "reset" | "revert" | "checkout" | "restore" => true,
        "clean" => any(&["-f", "--force"]),
        "switch" => any(&["-f", "--force", "--discard-changes"]),
        "stash" => matches!(
            args.get(idx + 1).map(|s| &**s),
            Some("drop" | "clear" | "pop")
        ),
        _ => false,
    }
}
