//! kiln - build and run compiled-language scripts
//!
//! A script carries a comment-wrapped YAML block describing how to build
//! it. kiln hashes the script, materializes it into a content-addressed
//! cache entry, runs the declared build commands once, and then executes
//! the cached artifact on every later invocation.

#[cfg(not(unix))]
compile_error!("kiln supports Unix-like systems only");

pub mod build;
pub mod cache;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod process;
pub mod script;
pub mod ui;

pub use error::{KilnError, KilnResult};
