use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::*;
use tracing::{info, Level};
use tracing_subscriber::{
    fmt::{self, time::ChronoUtc},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

mod commands;
mod config;
mod output;

use config::KeyboxerConfig;

/// Keyboxer: validate and curate Android attestation keyboxes
#[derive(Parser, Debug)]
#[command(name = "keyboxer", version)]
#[command(about = "Validate Android attestation keyboxes and maintain a store of valid ones")]
struct Args {
    /// Configuration file path (defaults to ./keyboxer.toml when present)
    #[arg(short, long, global = true, env = "KEYBOXER_CONFIG")]
    config: Option<PathBuf>,

    /// Trust anchor PEM bundle, overriding the configuration
    #[arg(long, global = true)]
    anchors: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate keybox files and print their verdicts
    Check {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Print verdicts as JSON
        #[arg(long)]
        json: bool,
    },
    /// Validate a directory (or file) of candidates and store the valid ones
    Import {
        /// Source directory; defaults to the configured manual directory
        dir: Option<PathBuf>,
    },
    /// Re-validate stored keyboxes and delete those that no longer pass
    Cleanup,
    /// Import, then clean up
    Run,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    init_tracing(args.verbose, args.json_logs);
    info!(version = env!("CARGO_PKG_VERSION"), "Starting keyboxer");

    let mut config = KeyboxerConfig::load(args.config.as_deref())?;
    if let Some(anchors) = args.anchors {
        config.anchors = anchors;
    }
    let validator = commands::build_validator(&config)?;

    match args.command {
        Command::Check { files, json } => {
            let all_valid = commands::check(&validator, &files, json).await?;
            if !all_valid {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Import { dir } => {
            let source = dir.unwrap_or_else(|| config.manual_dir.clone());
            commands::import(&config, &validator, &source).await?;
        }
        Command::Cleanup => {
            commands::cleanup(&config, &validator).await?;
        }
        Command::Run => {
            commands::import(&config, &validator, &config.manual_dir).await?;
            commands::cleanup(&config, &validator).await?;
        }
    }

    println!();
    println!("{}", "Done.".bright_green());
    Ok(ExitCode::SUCCESS)
}

fn init_tracing(verbose: bool, json: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "keyboxer={level},keybox_engine={level},keybox_store={level},reqwest=warn",
            level = level
        )
        .into()
    });

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(false)
                    .with_writer(std::io::stderr)
                    .json(),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}
