//! Logging initialization

use anyhow::{Context, Result};
use flowclass_core::config::LoggingConfig;
use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::args::{Args, LogFormat};

/// Level from the command line, falling back to the config file
fn level(args: &Args, config: &LoggingConfig) -> Result<Level> {
    if args.quiet {
        return Ok(Level::ERROR);
    }
    Ok(match args.verbose {
        0 => config
            .level
            .parse()
            .with_context(|| format!("Invalid log level: {}", config.level))?,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    })
}

/// Initialize logging based on CLI arguments and the `[logging]` section
pub fn init(args: &Args, config: &LoggingConfig) -> Result<()> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(level(args, config)?.into())
        .from_env_lossy();

    let format = args.log_format.unwrap_or(if config.json_format {
        LogFormat::Json
    } else {
        LogFormat::Text
    });
    let log_file = args
        .log_file
        .as_deref()
        .or(config.file.as_deref())
        .filter(|f| !f.is_empty());

    // Logs go to stderr; stdout carries command output
    match format {
        LogFormat::Text => {
            let subscriber = tracing_subscriber::registry().with(env_filter).with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(args.verbose >= 2)
                    .with_thread_ids(args.verbose >= 3)
                    .with_file(args.verbose >= 3)
                    .with_line_number(args.verbose >= 3),
            );

            if let Some(log_file) = log_file {
                let file = std::fs::File::create(log_file)
                    .with_context(|| format!("Failed to create log file: {log_file}"))?;
                let file_layer = fmt::layer().with_ansi(false).with_writer(file);
                subscriber.with(file_layer).init();
            } else {
                subscriber.init();
            }
        }
        LogFormat::Json => {
            let subscriber = tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr));

            if let Some(log_file) = log_file {
                let file = std::fs::File::create(log_file)
                    .with_context(|| format!("Failed to create log file: {log_file}"))?;
                let file_layer = fmt::layer().json().with_writer(file);
                subscriber.with(file_layer).init();
            } else {
                subscriber.init();
            }
        }
        LogFormat::Compact => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }

    Ok(())
}
