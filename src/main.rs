//! kiln - build and run compiled-language scripts
//!
//! CLI entry point. Without a subcommand the first argument is a script:
//! it is built if needed and its artifact replaces kiln as the process
//! whose exit code the caller sees.

use clap::Parser;
use kiln::cli::commands::{self, CommandContext};
use kiln::cli::{Cli, Commands};
use kiln::config::ConfigManager;
use kiln::error::KilnResult;
use kiln::ui;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Environment variable overriding the log filter
const LOG_ENV: &str = "KILN_LOG";

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            ui::error(&e.to_string(), e.hint());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> KilnResult<u8> {
    let cli = Cli::parse();

    let manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };

    let config = match manager.load().await {
        Ok(config) => config,
        Err(e) => {
            init_logging(cli.verbose, "text");
            return Err(e);
        }
    };
    init_logging(cli.verbose, &config.general.log_format);
    debug!("Loaded configuration from {}", manager.path().display());

    let ctx = CommandContext {
        config,
        cache_override: cli.cache_dir,
        verbose: cli.verbose,
    };

    match cli.command {
        None => commands::run(cli.script, &ctx).await,
        Some(Commands::Build(args)) => commands::build(args, &ctx).await.map(|()| 0),
        Some(Commands::Cache(args)) => commands::cache(args, &ctx).await.map(|()| 0),
        Some(Commands::Config(args)) => commands::config(args, &ctx, &manager).await.map(|()| 0),
    }
}

/// Initialize logging on stderr: 0 = warn, 1 = info, 2+ = debug
///
/// `KILN_LOG` takes precedence over `-v` when set.
fn init_logging(verbose: u8, format: &str) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| match verbose {
        0 => EnvFilter::new("kiln=warn"),
        1 => EnvFilter::new("kiln=info"),
        _ => EnvFilter::new("kiln=debug"),
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time();

    if format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}
