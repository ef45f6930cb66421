//! Top-level CLI definition and dispatch.

use std::io::{self, Write};
use std::path::PathBuf;

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

use rmgate::core::config::Config;
use rmgate::core::errors::RmgateError;
use rmgate::gate::toggle::{ToggleEnv, ToggleStatus, ToggleStore, ToggleTarget};
use rmgate::install::Orchestrator;
use rmgate::install::layers::InstallMode;
use rmgate::install::report::{
    InstallReport, StepStatus, format_install_report, format_status_report,
};
use rmgate::platform::host::SystemHost;

/// rmgate: terminal confirmation in front of destructive `rm` and `git`.
#[derive(Debug, Parser)]
#[command(
    name = "rmgate",
    author,
    version,
    about = "Require a human at a terminal before rm -rf and history-rewriting git commands run",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Route `rm` and `git` through the gate with symlink shims.
    Install(ModeArgs),
    /// Remove the symlink shims installed by `install`.
    Uninstall(ModeArgs),
    /// Show every layer, the deployed binary and the toggle state.
    Status,
    /// Divert the package-managed `rm` and `git` (dpkg hosts).
    InstallHard(ModeArgs),
    /// Undo `install-hard`.
    UninstallHard(ModeArgs),
    /// Turn gating on or off, or show its state.
    Toggle(ToggleArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args)]
struct ModeArgs {
    /// Print what would be done without making changes.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "snake_case")]
enum ToggleAction {
    /// Gate destructive commands.
    #[value(aliases = ["enable", "enabled", "yes", "true", "1"])]
    On,
    /// Let destructive commands through unprompted.
    #[value(aliases = ["disable", "disabled", "no", "false", "0"])]
    Off,
    /// Show the effective state.
    #[value(aliases = ["show", "state"])]
    Status,
}

#[derive(Debug, Clone, Args)]
struct ToggleArgs {
    /// on, off or status.
    #[arg(value_enum, ignore_case = true)]
    action: ToggleAction,
    /// Act on the system-wide marker (requires root).
    #[arg(short, long)]
    global: bool,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completion script for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input or missing privilege.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// Operation partially succeeded.
    #[error("{0}")]
    Partial(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Json(_) => 3,
            Self::Partial(_) => 4,
        }
    }
}

impl From<RmgateError> for CliError {
    fn from(err: RmgateError) -> Self {
        match err {
            RmgateError::InvalidConfig { .. }
            | RmgateError::ConfigParse { .. }
            | RmgateError::PermissionDenied { .. } => Self::User(err.to_string()),
            _ => Self::Runtime(err.to_string()),
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Install(args) => run_install(cli, InstallMode::Soft, args),
        Command::Uninstall(args) => run_uninstall(cli, InstallMode::Soft, args),
        Command::InstallHard(args) => run_install(cli, InstallMode::Hard, args),
        Command::UninstallHard(args) => run_uninstall(cli, InstallMode::Hard, args),
        Command::Status => run_status(cli),
        Command::Toggle(args) => run_toggle(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

fn load_config(cli: &Cli) -> Result<Config, CliError> {
    let path = Config::resolve_path(cli.config.as_deref());
    Ok(Config::load(&path)?)
}

fn run_install(cli: &Cli, mode: InstallMode, args: &ModeArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let host = SystemHost::default();
    let source = std::env::current_exe()?;
    let report = Orchestrator::new(&host, &config.paths)
        .dry_run(args.dry_run)
        .install(mode, &source)?;
    emit_install_report(cli, &report)
}

fn run_uninstall(cli: &Cli, mode: InstallMode, args: &ModeArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let host = SystemHost::default();
    let report = Orchestrator::new(&host, &config.paths)
        .dry_run(args.dry_run)
        .uninstall(mode)?;
    emit_install_report(cli, &report)
}

fn emit_install_report(cli: &Cli, report: &InstallReport) -> Result<(), CliError> {
    match output_mode(cli) {
        OutputMode::Human => {
            let mut stdout = io::stdout().lock();
            write!(stdout, "{}", format_install_report(report))?;
        }
        OutputMode::Json => write_json_line(&serde_json::to_value(report)?)?,
    }
    if report.success {
        return Ok(());
    }
    let problems = report.count(StepStatus::Refused) + report.count(StepStatus::Failed);
    Err(CliError::Partial(format!(
        "{} finished with {problems} step(s) refused or failed",
        report.operation.as_str()
    )))
}

fn toggle_store(config: &Config) -> ToggleStore {
    ToggleStore::new(ToggleEnv::from_process(
        &config.paths.system_disabled_marker,
    ))
}

fn run_status(cli: &Cli) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let host = SystemHost::default();
    let toggle = toggle_store(&config).status();
    let report = Orchestrator::new(&host, &config.paths).status(toggle)?;

    match output_mode(cli) {
        OutputMode::Human => {
            let mut stdout = io::stdout().lock();
            write!(stdout, "{}", format_status_report(&report))?;
            if !report.any_installed() {
                writeln!(
                    stdout,
                    "\n  {} no layer is installed; run `sudo rmgate install`.",
                    "note:".yellow()
                )?;
            }
        }
        OutputMode::Json => write_json_line(&serde_json::to_value(&report)?)?,
    }
    Ok(())
}

fn run_toggle(cli: &Cli, args: &ToggleArgs) -> Result<(), CliError> {
    let store = toggle_store(&load_config(cli)?);
    let target = if args.global {
        ToggleTarget::Global
    } else {
        ToggleTarget::User
    };

    let marker = match args.action {
        ToggleAction::Status => None,
        ToggleAction::On => Some(store.set(target, true)?),
        ToggleAction::Off => Some(store.set(target, false)?),
    };
    let status = store.status();

    match output_mode(cli) {
        OutputMode::Human => {
            let mut stdout = io::stdout().lock();
            if let Some(marker) = &marker {
                let verb = if args.action == ToggleAction::On {
                    "removed"
                } else {
                    "created"
                };
                writeln!(stdout, "{verb} {}", marker.display())?;
            }
            writeln!(stdout, "{}", describe_toggle(&status))?;
        }
        OutputMode::Json => write_json_line(&json!({
            "action": args.action,
            "target": target,
            "marker": marker,
            "status": status,
        }))?,
    }
    Ok(())
}

fn describe_toggle(status: &ToggleStatus) -> String {
    match status.disabled_by {
        None => format!("rmgate is {}", "enabled".green().bold()),
        Some(scope) => format!(
            "rmgate is {} ({})",
            "disabled".red().bold(),
            scope.label()
        ),
    }
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

const fn output_mode(cli: &Cli) -> OutputMode {
    if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    }
}
