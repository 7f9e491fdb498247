mod bootstrap;
mod cli;
mod commands;
mod config;
mod credentials;
mod engine;
mod incident;
mod interrupt;
mod paths;
mod phases;
mod progress;
mod state;
mod teardown;
#[cfg(test)]
mod testing;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use incident::{Category, Incident};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    pub config: Option<PathBuf>,
    pub state_dir: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        config: cli.config,
        state_dir: cli.state_dir,
    };

    // Runs that touch hosts leave a trail in the incident log
    let records_incidents = matches!(cli.command, Command::Install(_) | Command::Push(_));

    match dispatch(&ctx, cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let category = Category::from_error(&e);
            ui::fatal(category.as_str(), &format!("{e:#}"), category.advice());
            if records_incidents && let Ok(state_dir) = ctx.state_dir() {
                incident::record(&paths::incident_log(&state_dir), &Incident::from_error(&e, 1));
            }
            ExitCode::FAILURE
        }
    }
}

fn dispatch(ctx: &Context, command: Command) -> Result<()> {
    match command {
        Command::Install(args) => commands::install::run(ctx, &args),
        Command::Status => commands::status::run(ctx),
        Command::Generate { output } => commands::generate::run(ctx, output),
        Command::Validate { init } => commands::validate::run(ctx, init),
        Command::Push(args) => commands::push::run(ctx, &args),
        Command::Sweep => commands::sweep::run(ctx),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "mppinstall", &mut io::stdout());
            Ok(())
        }
    }
}
