//! flowclass CLI
//!
//! Command-line interface for the flow classifier.

mod args;
mod commands;
mod logging;

use anyhow::{Context, Result};
use clap::Parser;
use flowclass_core::Config;
use std::path::Path;
use tracing::error;

use args::Args;

fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(args.config.as_deref())?;
    logging::init(&args, &config.logging)?;

    let result = run(args, config);

    if let Err(ref e) = result {
        error!("Fatal error: {:#}", e);
    }

    result
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => {
            Config::load(path).with_context(|| format!("Failed to load config from {}", path.display()))
        }
        None => Ok(Config::default()),
    }
}

fn run(args: Args, config: Config) -> Result<()> {
    match args.command {
        commands::Command::Protocols(protocol_args) => commands::protocols::execute(&protocol_args),
        commands::Command::Config(config_args) => commands::config::execute(config_args, &config),
        commands::Command::Replay(replay_args) => commands::replay::execute(&replay_args, &config),
        commands::Command::Completions(comp_args) => commands::completions::execute(comp_args),
    }
}
