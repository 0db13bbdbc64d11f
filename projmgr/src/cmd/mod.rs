mod convert;
mod list;
mod run_generator;
mod update_rte;

use self::convert::Convert;
use self::list::ListCommand;
use self::run_generator::RunGenerator;
use self::update_rte::UpdateRte;
use anyhow::Result;
use clap::Parser;
use env_logger::Builder;
use log::LevelFilter;

const DEFAULT_LEVEL_FILTER: LevelFilter = LevelFilter::Info;

/// A tool for resolving csolution projects against CMSIS packs and
/// generating build plans.
#[derive(Debug, Parser)]
#[clap(about, long_about = None, version)]
pub struct Args {
    /// Set the logging level. One of [off|error|warn|info|debug|trace]. You can
    /// also leave this unset and use the RUST_LOG env variable. See
    /// https://github.com/rust-cli/env_logger/
    #[clap(long = "log-level", global = true)]
    pub log_level: Option<LevelFilter>,

    #[clap(subcommand)]
    pub subcommand: Subcommand,
}

#[derive(Debug, Parser)]
pub enum Subcommand {
    Convert(Convert),

    /// List properties of the solution and the installed environment.
    #[clap(subcommand)]
    List(ListCommand),

    /// Update the RTE directory and its configuration files.
    UpdateRte(UpdateRte),

    /// Run a generator for a context.
    Run(RunGenerator),
}

/// Entrypoint for the `csolution` command line program.
pub fn run(args: Args) -> Result<()> {
    match args.subcommand {
        Subcommand::Convert(convert_args) => convert_args.run(),
        Subcommand::List(list_args) => list_args.run(),
        Subcommand::UpdateRte(update_args) => update_args.run(),
        Subcommand::Run(run_args) => run_args.run(),
    }
}

/// use `level` if present, or else use `RUST_LOG` if present, or else use a default.
pub fn init_logger(level: Option<LevelFilter>) {
    match (std::env::var(env_logger::DEFAULT_FILTER_ENV).ok(), level) {
        (Some(_), None) => {
            // RUST_LOG exists and level does not; use the environment variable.
            Builder::from_default_env().init();
        }
        _ => {
            // use provided log level or default for this crate only.
            Builder::new()
                .filter(
                    Some(env!("CARGO_CRATE_NAME")),
                    level.unwrap_or(DEFAULT_LEVEL_FILTER),
                )
                .init();
        }
    }
}
