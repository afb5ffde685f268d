mod commands;

use crate::commands::{Cli, Commands};
use anyhow::Result;
use bkcron::{config, logging, sysexits};
use clap::Parser;
use std::process;

/// Entry point for the bkcron CLI application.
/// Parses command-line arguments and dispatches to the appropriate command handler.
fn main() -> Result<()> {
    let cli = Cli::parse();
    let commands = match cli.commands {
        Some(commands) => commands,
        None => {
            eprintln!(
                "bkcron requires at least one command to execute. See 'bkcron --help' for usage."
            );
            process::exit(sysexits::EX_USAGE);
        }
    };

    logging::init();
    let path = cli.config.unwrap_or_else(config::config_file);

    match commands {
        Commands::Start { now } => commands::start(&path, now)?,
        Commands::Run => commands::run(&path)?,
        Commands::List => commands::list(&path)?,
        Commands::Config => commands::config(&path)?,
    }
    Ok(())
}
