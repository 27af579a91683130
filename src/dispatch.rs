//! Running the built artifact in place of the script
//!
//! The artifact gets kiln's stdin, stdout, stderr, environment and working
//! directory unchanged, plus the caller's arguments verbatim. kiln then
//! exits with whatever the artifact exited with.

use crate::error::{exit_codes, KilnError, KilnResult};
use crate::process::{terminating_signal, SignalForwarder};
use crate::script::build_spec::CACHE_DIR_PLACEHOLDER;
use crate::script::BuildSpec;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;

/// The artifact's command line, resolved against a cache entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetCommand {
    /// Program to execute
    pub program: PathBuf,
    /// Arguments placed before the caller's arguments
    pub args: Vec<OsString>,
    /// Artifact file inside the cache entry, when the command names one
    artifact: Option<PathBuf>,
}

impl TargetCommand {
    /// Build the command line from `target_interpreter` and `target_bin`
    ///
    /// Both are split on whitespace; there is no quoting. `@@@` expands to
    /// the entry directory, and a first `target_bin` word starting with
    /// `./` or `../` is taken relative to the entry.
    pub fn resolve(spec: &BuildSpec, entry_dir: &Path) -> KilnResult<Self> {
        let dir = entry_dir.to_string_lossy();
        let bin = spec.target_bin.replace(CACHE_DIR_PLACEHOLDER, &dir);

        let mut words: Vec<OsString> = Vec::new();
        if let Some(interpreter) = &spec.target_interpreter {
            words.extend(
                interpreter
                    .replace(CACHE_DIR_PLACEHOLDER, &dir)
                    .split_whitespace()
                    .map(OsString::from),
            );
        }

        let mut bin_words = bin.split_whitespace();
        let first = bin_words.next().ok_or(KilnError::EmptyTarget)?;
        let first = resolve_local(first, entry_dir);
        let artifact = first.starts_with(entry_dir).then(|| first.clone());
        words.push(first.into_os_string());
        words.extend(bin_words.map(OsString::from));

        let mut words = words.into_iter();
        let program = words.next().map(PathBuf::from).ok_or(KilnError::EmptyTarget)?;
        Ok(Self {
            program,
            args: words.collect(),
            artifact,
        })
    }

    /// The artifact file inside the cache entry, if any
    pub fn artifact(&self) -> Option<&Path> {
        self.artifact.as_deref()
    }

    /// Full argument vector for display
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_os_str())
            .chain(self.args.iter().map(OsString::as_os_str))
            .map(|s| s.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn resolve_local(word: &str, entry_dir: &Path) -> PathBuf {
    if let Some(rest) = word.strip_prefix("./") {
        entry_dir.join(rest)
    } else if word.starts_with("../") {
        entry_dir.join(word)
    } else {
        PathBuf::from(word)
    }
}

/// Run `target` with the caller's arguments and return kiln's exit code
pub async fn dispatch(target: &TargetCommand, caller_args: &[OsString]) -> KilnResult<u8> {
    if let Some(artifact) = target.artifact() {
        if !artifact.exists() {
            return Err(KilnError::Spawn {
                program: artifact.display().to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "artifact missing after build"),
            });
        }
    }

    debug!("Dispatching {} with {} args", target.display(), caller_args.len());
    let mut forwarder = SignalForwarder::install()?;
    let mut child = Command::new(&target.program)
        .args(&target.args)
        .args(caller_args)
        .spawn()
        .map_err(|e| KilnError::Spawn {
            program: target.program.display().to_string(),
            source: e,
        })?;

    let exit = forwarder.wait(&mut child).await?;
    if let Some(code) = exit.status.code() {
        return Ok(u8::try_from(code & 0xff).unwrap_or(exit_codes::FAILURE));
    }
    let signal = terminating_signal(&exit.status)
        .or(exit.forwarded)
        .unwrap_or(0);
    Ok(exit_codes::SIGNAL_BASE.saturating_add(u8::try_from(signal).unwrap_or(0)))
}
