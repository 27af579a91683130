//! CLI argument definitions using clap derive

use crate::build::BuildMode;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::ffi::OsString;
use std::path::PathBuf;

/// kiln - build and run compiled-language scripts
///
/// Put `#!/usr/bin/env kiln` at the top of a source file with an embedded
/// kiln-begin / kiln-end config block. The first run builds it into a
/// content-addressed cache; every later run executes the cached artifact.
#[derive(Parser, Debug)]
#[command(name = "kiln")]
#[command(author, version, about, long_about = None)]
#[command(args_conflicts_with_subcommands = true, arg_required_else_help = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Script to run, followed by the arguments passed to it
    #[arg(value_name = "SCRIPT", trailing_var_arg = true)]
    pub script: Vec<OsString>,

    /// Increase verbosity (-v info and build output, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "KILN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Cache root directory
    #[arg(long, global = true, env = "KILN_CACHE_ROOT", value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build a script without running it
    Build(BuildArgs),

    /// Inspect a script's cache entry
    Cache(CacheArgs),

    /// Show or edit configuration
    Config(ConfigArgs),
}

/// Arguments for the build command
#[derive(Parser, Debug)]
pub struct BuildArgs {
    /// Script to build
    pub script: PathBuf,

    /// What to rebuild when the entry already exists
    #[arg(short, long, value_enum, default_value_t = BuildMode::Default)]
    pub mode: BuildMode,
}

/// Arguments for the cache command
#[derive(Parser, Debug)]
pub struct CacheArgs {
    /// Subcommand for cache
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache subcommands
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Show everything known about a script's cache entry
    Info {
        /// Script to inspect
        script: PathBuf,

        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Print a single item, for use in shell scripts
    Get {
        /// Item to print
        item: CacheItem,

        /// Script to inspect
        script: PathBuf,
    },
}

/// Single values `cache get` can print
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "snake_case")]
pub enum CacheItem {
    /// Cache entry directory
    CachePath,
    /// Cache key
    Key,
    /// Entry state
    State,
    /// Path of the materialized main source
    ScriptSrc,
    /// Artifact command line
    Target,
}

/// Output format for cache info
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Set a configuration value
    Set {
        /// Configuration key (e.g., build.shell)
        key: String,
        /// Value to set
        value: String,
    },
}
