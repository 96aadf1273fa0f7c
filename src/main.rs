//! cocoa-way - A Wayland compositor for macOS
//!
//! Parses the command line, then either runs the compositor on the chosen
//! backend or relays Wayland traffic between two endpoints.

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use log::{error, info};

use cocoa_way::backend;
use cocoa_way::config::{Cli, Command, RelayArgs};
use cocoa_way::error::{exit_code_for, StartupError};
use cocoa_way::transport::RelayListener;

fn relay(args: RelayArgs) -> anyhow::Result<()> {
    let listener = RelayListener::bind(args.listen, args.connect).map_err(StartupError::from)?;
    listener.run().context("relay stopped")
}

fn run(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Run(args) => {
            let config = args.resolve().map_err(StartupError::from)?;
            backend::run(&config)
        }
        Command::Relay(args) => relay(args),
    }
}

fn main() -> ExitCode {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let command = Cli::parse().into_command();
    match run(command) {
        Ok(()) => {
            info!("cocoa-way exited cleanly");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(exit_code_for(&e))
        }
    }
}
