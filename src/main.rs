//! rmgate binary entrypoint.
//!
//! Invoked as `rm` or `git` (through a shim), or as `rmgate --gate <name>`
//! (through a dispatcher script), it runs the gate. Anything else is the
//! admin CLI.

mod cli_app;

use std::ffi::OsString;
use std::process::ExitCode;

use clap::Parser;
use rmgate::gate;
use rmgate::gate::classify::CommandFamily;

fn main() -> ExitCode {
    let mut args = std::env::args_os();
    let argv0 = args.next().unwrap_or_default();
    if let Some(family) = CommandFamily::from_argv0(&argv0) {
        std::process::exit(gate::run(family, args.collect()));
    }

    let rest: Vec<OsString> = args.collect();
    if rest.first().is_some_and(|flag| flag == "--gate") {
        let family = rest
            .get(1)
            .and_then(|name| name.to_str())
            .and_then(|name| name.parse::<CommandFamily>().ok());
        let Some(family) = family else {
            eprintln!("rmgate: --gate expects `rm` or `git`");
            return ExitCode::from(2);
        };
        std::process::exit(gate::run(family, rest[2..].to_vec()));
    }

    let cli = cli_app::Cli::parse();
    match cli_app::run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("rmgate: {err}");
            ExitCode::from(u8::try_from(err.exit_code()).unwrap_or(1))
        }
    }
}
