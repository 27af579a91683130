//! Error types for kiln
//!
//! All modules use `KilnResult<T>` as their return type. Each error belongs
//! to one exit-code class so a caller can tell a broken config block from a
//! failed build or an artifact that could not be started.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for kiln operations
pub type KilnResult<T> = Result<T, KilnError>;

/// Process exit codes used by kiln itself
pub mod exit_codes {
    /// Internal or environment failure (IO, invalid tool config)
    pub const FAILURE: u8 = 1;
    /// Build step exited non-zero (EX_SOFTWARE)
    pub const BUILD: u8 = 70;
    /// Cache lock could not be acquired (EX_TEMPFAIL)
    pub const LOCK: u8 = 75;
    /// The embedded config block is malformed (EX_CONFIG)
    pub const CONFIG: u8 = 78;
    /// The artifact could not be started
    pub const SPAWN: u8 = 127;
    /// Base added to a signal number when kiln was interrupted
    pub const SIGNAL_BASE: u8 = 128;
}

/// Which build step a failure belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStep {
    /// `build_once_cmd`
    Once,
    /// `build_cmd`
    Build,
}

impl std::fmt::Display for BuildStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Once => write!(f, "build_once_cmd"),
            Self::Build => write!(f, "build_cmd"),
        }
    }
}

/// All errors that can occur in kiln
#[derive(Error, Debug)]
pub enum KilnError {
    // Script config block errors
    #[error("No kiln-begin marker found in {0}")]
    MissingBlock(PathBuf),

    #[error("Config block starting at line {line} has no kiln-end marker")]
    UnterminatedBlock { line: usize },

    #[error("Config block error at line {line}: {reason}")]
    ConfigBlock { line: usize, reason: String },

    #[error("Config block is missing required key: {0}")]
    MissingKey(&'static str),

    #[error("Invalid path '{path}' in config block: {reason}")]
    ConfigPath { path: String, reason: String },

    #[error("Script {path} is not valid UTF-8")]
    ScriptEncoding { path: PathBuf },

    // Tool configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Cannot determine a cache directory for this user")]
    NoCacheRoot,

    // Build errors
    #[error("{step} failed with exit code {code}: {command}")]
    BuildFailed {
        step: BuildStep,
        command: String,
        code: i32,
    },

    #[error("{step} was terminated by signal {signal}: {command}")]
    BuildSignaled {
        step: BuildStep,
        command: String,
        signal: i32,
    },

    #[error("Failed to acquire cache lock {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Interrupted by signal {signal}")]
    Interrupted { signal: i32 },

    // Execution errors
    #[error("Cannot execute artifact {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("target_bin is empty after substitution")]
    EmptyTarget,

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to run command: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("{0}")]
    User(String),
}

impl KilnError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Create a config block error at a 1-based script line
    pub fn block(line: usize, reason: impl Into<String>) -> Self {
        Self::ConfigBlock {
            line,
            reason: reason.into(),
        }
    }

    /// Whether the error comes from the script's embedded config block
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::MissingBlock(_)
                | Self::UnterminatedBlock { .. }
                | Self::ConfigBlock { .. }
                | Self::MissingKey(_)
                | Self::ConfigPath { .. }
                | Self::ScriptEncoding { .. }
        )
    }

    /// Whether the error is a failed build step
    pub fn is_build_error(&self) -> bool {
        matches!(self, Self::BuildFailed { .. } | Self::BuildSignaled { .. })
    }

    /// Exit code kiln terminates with for this error
    pub fn exit_code(&self) -> u8 {
        if self.is_config_error() {
            return exit_codes::CONFIG;
        }
        if self.is_build_error() {
            return exit_codes::BUILD;
        }
        match self {
            Self::Lock { .. } => exit_codes::LOCK,
            Self::Spawn { .. } | Self::EmptyTarget => exit_codes::SPAWN,
            Self::Interrupted { signal } => {
                exit_codes::SIGNAL_BASE.saturating_add(u8::try_from(*signal).unwrap_or(0))
            }
            _ => exit_codes::FAILURE,
        }
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::MissingBlock(_) => {
                Some("Add a '// kiln-begin' ... '// kiln-end' block with at least build_cmd")
            }
            Self::MissingKey("build_cmd") => Some("Add a line like 'build_cmd: make' to the block"),
            Self::Spawn { .. } => {
                Some("Check target_bin, or rebuild with: kiln build --mode source <script>")
            }
            Self::NoCacheRoot => Some("Set KILN_CACHE_ROOT or [cache] root in the config file"),
            _ => None,
        }
    }
}
