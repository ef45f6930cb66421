//! Shared helpers for black-box tests of the `rmgate` binary.

#![allow(dead_code, missing_docs)]

use std::ffi::OsStr;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

/// Captured result of one binary invocation.
pub struct CliCase {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

/// Isolated environment: config, markers and audit log under one temp dir.
pub struct Sandbox {
    pub dir: tempfile::TempDir,
}

impl Sandbox {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create sandbox dir");
        let sandbox = Self { dir };
        fs::create_dir_all(sandbox.shim_dir()).expect("create shim dir");
        let config = format!(
            "[paths]\ngate_binary = \"{}\"\nshim_dir = \"{}\"\nsystem_disabled_marker = \"{}\"\nsudoers_dropin = \"{}\"\n\n[audit]\nsyslog = false\n",
            sandbox.path("lib/rmgate").display(),
            sandbox.shim_dir().display(),
            sandbox.system_marker().display(),
            sandbox.path("sudoers.d/rmgate").display(),
        );
        fs::write(sandbox.config_path(), config).expect("write sandbox config");
        sandbox
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn config_path(&self) -> PathBuf {
        self.path("config.toml")
    }

    pub fn shim_dir(&self) -> PathBuf {
        self.path("shims")
    }

    pub fn config_home(&self) -> PathBuf {
        self.path("xdg")
    }

    pub fn system_marker(&self) -> PathBuf {
        self.path("system-disabled")
    }

    pub fn user_marker(&self) -> PathBuf {
        self.config_home().join("rmgate").join("disabled")
    }

    /// Binary command with the sandbox wired in and ambient toggles cleared.
    pub fn command(&self) -> Command {
        let mut command = Command::new(binary());
        self.configure(&mut command);
        command
    }

    pub fn configure(&self, command: &mut Command) {
        command
            .env("RMGATE_CONFIG", self.config_path())
            .env("XDG_CONFIG_HOME", self.config_home())
            .env_remove("RMGATE_DISABLED")
            .env_remove("SUDO_USER")
            .stdin(Stdio::null());
    }
}

pub fn binary() -> &'static str {
    env!("CARGO_BIN_EXE_rmgate")
}

fn log_dir() -> PathBuf {
    let dir = std::env::temp_dir().join("rmgate-test-logs");
    let _ = fs::create_dir_all(&dir);
    dir
}

/// Run `command`, capture its output and keep a log for failure messages.
pub fn run_command(case_name: &str, mut command: Command) -> CliCase {
    let output = command.output().expect("spawn rmgate");
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    let log_path = log_dir().join(format!("{case_name}.log"));
    if let Ok(mut log) = fs::File::create(&log_path) {
        let _ = writeln!(log, "command: {command:?}");
        let _ = writeln!(log, "status: {}", output.status);
        let _ = writeln!(log, "--- stdout ---\n{stdout}");
        let _ = writeln!(log, "--- stderr ---\n{stderr}");
    }

    CliCase {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}

/// Run the admin CLI with `args` inside a fresh sandbox.
pub fn run_cli_case(case_name: &str, args: &[&str]) -> CliCase {
    let sandbox = Sandbox::new();
    run_sandboxed(case_name, &sandbox, args)
}

/// Run the binary with `args` against an existing sandbox.
pub fn run_sandboxed<S: AsRef<OsStr>>(case_name: &str, sandbox: &Sandbox, args: &[S]) -> CliCase {
    let mut command = sandbox.command();
    command.args(args);
    run_command(case_name, command)
}

pub fn is_root() -> bool {
    nix::unistd::geteuid().is_root()
}

pub fn tool_on_path(name: &str) -> bool {
    std::env::var_os("PATH").is_some_and(|path| {
        std::env::split_paths(&path).any(|dir| Path::new(&dir).join(name).is_file())
    })
}
