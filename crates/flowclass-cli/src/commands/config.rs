//! Config command - configuration management

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use flowclass_core::Config;
use std::path::{Path, PathBuf};
use tracing::info;

/// Config command arguments
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show {
        /// Config file to show (default: the one given with --config)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Generate a configuration file with default values
    Generate {
        /// Output file path
        #[arg(short, long, default_value = "flowclass.toml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Validate a configuration file
    Validate {
        /// Config file to validate
        file: PathBuf,
    },
}

/// Execute config command
pub fn execute(args: ConfigArgs, current: &Config) -> Result<()> {
    match args.action {
        ConfigAction::Show { file } => show_config(file.as_deref(), current),
        ConfigAction::Generate { output, force } => generate_config(&output, force),
        ConfigAction::Validate { file } => validate_config(&file),
    }
}

fn show_config(file: Option<&Path>, current: &Config) -> Result<()> {
    let loaded;
    let config = match file {
        Some(path) => {
            loaded = Config::load(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?;
            &loaded
        }
        None => current,
    };

    let toml_str = config.to_toml().context("Failed to serialize config")?;
    println!("{toml_str}");
    Ok(())
}

fn render_default() -> Result<String> {
    let toml_str = Config::default()
        .to_toml()
        .context("Failed to serialize config")?;

    Ok(format!(
        "# flowclass configuration\n\
         # Every key is optional; omitted keys take the values shown here\n\n\
         {toml_str}"
    ))
}

fn generate_config(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", output.display());
    }

    std::fs::write(output, render_default()?)
        .with_context(|| format!("Failed to write config to {}", output.display()))?;

    info!(path = %output.display(), "generated config file");
    println!("Configuration file generated: {}", output.display());
    Ok(())
}

fn validate_config(file: &Path) -> Result<()> {
    let config = Config::load(file)
        .with_context(|| format!("Failed to load config from {}", file.display()))?;

    config.validate().context("Configuration validation failed")?;

    println!("{} Configuration is valid", "✓".green());
    println!("  Cache capacity: {}", config.cache.capacity);
    println!(
        "  Max active classifications: {}",
        config.cache.max_active_classifications
    );
    println!(
        "  Packet ceiling: {} (weak: {})",
        config.classification.packet_ceiling, config.classification.weak_packet_limit
    );
    println!("  Port guessing: {}", config.classification.guess_protocol);
    println!("  Detectors: {}", config.detectors.enabled.join(", "));

    Ok(())
}
