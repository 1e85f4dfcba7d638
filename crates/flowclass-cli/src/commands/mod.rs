//! CLI commands

pub mod completions;
pub mod config;
pub mod protocols;
pub mod replay;

use clap::Subcommand;

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the protocol table
    Protocols(protocols::ProtocolsArgs),

    /// Configuration management
    Config(config::ConfigArgs),

    /// Replay a packet trace through the classifier
    Replay(replay::ReplayArgs),

    /// Generate shell completions
    Completions(completions::CompletionsArgs),
}
