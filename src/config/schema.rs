//! Configuration schema for kiln
//!
//! Configuration is stored at `~/.config/kiln/config.toml`. Every field has
//! a default, so a missing or partial file is fine.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Cache location
    pub cache: CacheConfig,

    /// Build step settings
    pub build: BuildConfig,
}

/// General application settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
        }
    }
}

/// Cache settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache root; defaults to the platform cache dir plus `kiln`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
}

/// Build step settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Shell used as `<shell> -c <command>`
    pub shell: String,

    /// Stream build output instead of showing it only on failure
    pub show_logs: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            shell: "/bin/sh".to_string(),
            show_logs: false,
        }
    }
}
