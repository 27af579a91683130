//! Running a single build step through the shell

use crate::error::{BuildStep, KilnError, KilnResult};
use crate::process::{terminating_signal, ChildExit, SignalForwarder};
use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::debug;

/// Environment variable holding the cache entry directory
pub const ENV_CACHE_DIR: &str = "KILN_CACHE_DIR";
/// Environment variable holding the absolute script path
pub const ENV_SOURCE: &str = "KILN_SOURCE";
/// Environment variable holding the script's directory
pub const ENV_SOURCE_DIR: &str = "KILN_SOURCE_DIR";

/// Where a step's stdout and stderr go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Buffer both streams; surfaced only when the step fails
    Capture,
    /// Copy both streams to kiln's stderr as they arrive
    Stream,
}

/// Shared settings for the steps of one build
#[derive(Debug, Clone)]
pub struct StepRunner {
    shell: String,
    dir: PathBuf,
    env: Vec<(&'static str, OsString)>,
    output: OutputMode,
}

/// Result of a finished step
#[derive(Debug)]
pub struct StepOutcome {
    pub step: BuildStep,
    pub command: String,
    pub exit: ChildExit,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl StepRunner {
    /// Runner executing in `dir` with the build environment set
    pub fn new(shell: &str, dir: &Path, source: &Path, output: OutputMode) -> Self {
        let source_dir = source.parent().unwrap_or(Path::new("/"));
        Self {
            shell: shell.to_string(),
            dir: dir.to_path_buf(),
            env: vec![
                (ENV_CACHE_DIR, dir.as_os_str().to_owned()),
                (ENV_SOURCE, source.as_os_str().to_owned()),
                (ENV_SOURCE_DIR, source_dir.as_os_str().to_owned()),
            ],
            output,
        }
    }

    pub fn output(&self) -> OutputMode {
        self.output
    }

    /// Run `command` as `<shell> -c <command>` and wait for it
    pub async fn run(&self, step: BuildStep, command: &str) -> KilnResult<StepOutcome> {
        debug!("Running {} in {}: {}", step, self.dir.display(), command);

        let mut forwarder = SignalForwarder::install()?;
        // stdin is the script's input, not the build's
        let mut child = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .current_dir(&self.dir)
            .envs(self.env.iter().map(|(k, v)| (*k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| KilnError::command_failed(format!("{} -c {}", self.shell, command), e))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stream = self.output == OutputMode::Stream;

        let (exit, out, err) = tokio::join!(
            forwarder.wait(&mut child),
            pump(stdout, stream),
            pump(stderr, stream),
        );

        Ok(StepOutcome {
            step,
            command: command.to_string(),
            exit: exit?,
            stdout: out.map_err(|e| KilnError::io(format!("reading {} output", step), e))?,
            stderr: err.map_err(|e| KilnError::io(format!("reading {} output", step), e))?,
        })
    }
}

impl StepOutcome {
    pub fn success(&self) -> bool {
        self.exit.forwarded.is_none() && self.exit.status.success()
    }

    /// Turn the outcome into a result, surfacing captured output on failure
    pub fn into_result(self) -> KilnResult<()> {
        if self.success() {
            return Ok(());
        }

        let mut sink = std::io::stderr().lock();
        let _ = sink.write_all(&self.stderr);
        let _ = sink.write_all(&self.stdout);
        let _ = sink.flush();

        if let Some(signal) = self.exit.forwarded {
            return Err(KilnError::Interrupted { signal });
        }
        match (self.exit.status.code(), terminating_signal(&self.exit.status)) {
            (Some(code), _) => Err(KilnError::BuildFailed {
                step: self.step,
                command: self.command,
                code,
            }),
            (None, Some(signal)) => Err(KilnError::BuildSignaled {
                step: self.step,
                command: self.command,
                signal,
            }),
            (None, None) => Err(KilnError::BuildFailed {
                step: self.step,
                command: self.command,
                code: -1,
            }),
        }
    }
}

async fn pump<R>(reader: Option<R>, stream: bool) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return Ok(Vec::new());
    };
    if stream {
        let mut sink = tokio::io::stderr();
        tokio::io::copy(&mut reader, &mut sink).await?;
        Ok(Vec::new())
    } else {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await?;
        Ok(buf)
    }
}
