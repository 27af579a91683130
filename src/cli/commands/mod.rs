//! CLI command implementations

pub mod build;
pub mod cache;
pub mod config;
pub mod run;

pub use build::execute as build;
pub use cache::execute as cache;
pub use config::execute as config;
pub use run::execute as run;

use crate::build::{BuildMode, BuildOptions};
use crate::config::Config;
use crate::error::KilnResult;
use std::path::PathBuf;

/// Settings shared by every command
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub config: Config,
    /// `--cache-dir` / `KILN_CACHE_ROOT`
    pub cache_override: Option<PathBuf>,
    pub verbose: u8,
}

impl CommandContext {
    /// Resolved cache root
    pub fn cache_root(&self) -> KilnResult<PathBuf> {
        self.config.cache_root(self.cache_override.as_deref())
    }

    /// Build options for `mode`; logs are shown when configured, when
    /// `-v` is given, or when the caller asks for them
    pub fn build_options(&self, mode: BuildMode, show_logs: bool) -> BuildOptions {
        BuildOptions {
            mode,
            show_logs: show_logs || self.verbose > 0 || self.config.build.show_logs,
            shell: self.config.build.shell.clone(),
        }
    }
}
