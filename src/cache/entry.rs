//! Cache entry layout and state
//!
//! Tracks where an entry lives on disk and how far its build has progressed
//! (empty, materialized, once-done, built).

use crate::cache::key::CacheKey;
use crate::dispatch::TargetCommand;
use crate::error::{KilnError, KilnResult};
use crate::script::BuildSpec;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

/// Marker recording that `build_once_cmd` succeeded
pub const ONCE_MARKER: &str = ".kiln-once";

/// Marker recording that `build_cmd` succeeded
pub const BUILT_MARKER: &str = ".kiln-built";

/// Lock file serializing builds of one entry
pub const LOCK_FILE: &str = ".kiln-lock";

/// Human-readable size with one decimal above a kibibyte, e.g. "1.5 MB"
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];

    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut size = bytes as f64 / 1024.0;
    let mut unit = 0;
    while size >= 1024.0 && unit + 1 < UNITS.len() {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", size, UNITS[unit])
}

/// Build progress of a cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    /// Directory does not exist yet
    Empty,
    /// Sources written, setup not yet run
    Materialized,
    /// Setup done (or not declared), artifact not built
    OnceDone,
    /// Artifact built and present
    Built,
    /// A build step failed during this invocation
    Failed,
}

impl EntryState {
    /// Whether the artifact can be dispatched without building
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Built)
    }

    /// Whether the build loop stops here
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Built | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Materialized => "materialized",
            Self::OnceDone => "once_done",
            Self::Built => "built",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Contents of the built marker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuiltMarker {
    pub key: String,
    pub built_at: DateTime<Utc>,
}

/// A content-addressed directory under the cache root
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Cache key naming the directory
    pub key: CacheKey,
    /// Absolute path of the entry
    pub dir: PathBuf,
    /// Whether the directory existed when the entry was located
    pub existed: bool,
}

impl CacheEntry {
    /// Entry for `key` under `cache_root`; nothing is created
    pub fn locate(cache_root: &Path, key: CacheKey) -> Self {
        let dir = cache_root.join(key.as_str());
        let existed = dir.is_dir();
        Self { key, dir, existed }
    }

    /// Whether the entry directory already exists
    pub fn exists(&self) -> bool {
        self.dir.is_dir()
    }

    pub fn once_marker(&self) -> PathBuf {
        self.dir.join(ONCE_MARKER)
    }

    pub fn built_marker(&self) -> PathBuf {
        self.dir.join(BUILT_MARKER)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.dir.join(LOCK_FILE)
    }

    /// Resolve the artifact command line against this entry
    pub fn target(&self, spec: &BuildSpec) -> KilnResult<TargetCommand> {
        TargetCommand::resolve(spec, &self.dir)
    }

    /// Inspect the markers on disk
    ///
    /// An entry only counts as built when the built marker exists and the
    /// artifact it points to is still there, so deleting the artifact by
    /// hand triggers a rebuild without rerunning setup.
    pub fn probe(&self, spec: &BuildSpec) -> KilnResult<EntryState> {
        if !self.exists() {
            return Ok(EntryState::Empty);
        }
        if self.built_marker().is_file() && self.artifact_present(spec)? {
            return Ok(EntryState::Built);
        }
        if spec.build_once_cmd.is_none() || self.once_marker().is_file() {
            return Ok(EntryState::OnceDone);
        }
        Ok(EntryState::Materialized)
    }

    fn artifact_present(&self, spec: &BuildSpec) -> KilnResult<bool> {
        let target = self.target(spec)?;
        Ok(target.artifact().map_or(true, Path::exists))
    }

    /// Create the entry directory
    pub async fn create(&self) -> KilnResult<()> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| KilnError::io(format!("creating cache entry {}", self.dir.display()), e))
    }

    pub async fn mark_once_done(&self) -> KilnResult<()> {
        let path = self.once_marker();
        fs::write(&path, Utc::now().to_rfc3339())
            .await
            .map_err(|e| KilnError::io(format!("writing {}", path.display()), e))
    }

    pub async fn mark_built(&self) -> KilnResult<()> {
        let marker = BuiltMarker {
            key: self.key.to_string(),
            built_at: Utc::now(),
        };
        let path = self.built_marker();
        fs::write(&path, serde_json::to_vec_pretty(&marker)?)
            .await
            .map_err(|e| KilnError::io(format!("writing {}", path.display()), e))
    }

    /// Read the built marker, if any
    pub async fn read_built_marker(&self) -> KilnResult<Option<BuiltMarker>> {
        let path = self.built_marker();
        match fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(marker) => Ok(Some(marker)),
                Err(e) => {
                    warn!("Ignoring unreadable built marker {}: {}", path.display(), e);
                    Ok(None)
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(KilnError::io(format!("reading {}", path.display()), e)),
        }
    }

    /// Drop the built marker so the next run reruns `build_cmd`
    pub async fn clear_built(&self) -> KilnResult<()> {
        remove_if_exists(&self.built_marker()).await
    }

    /// Drop both markers, starting a new setup lifetime
    pub async fn clear_markers(&self) -> KilnResult<()> {
        remove_if_exists(&self.built_marker()).await?;
        remove_if_exists(&self.once_marker()).await?;
        debug!("Cleared markers in {}", self.dir.display());
        Ok(())
    }

    /// Write `content` to `relative`, skipping files already identical
    pub async fn write_file(&self, relative: &str, content: &[u8]) -> KilnResult<()> {
        let path = self.dir.join(relative);
        if let Ok(existing) = fs::read(&path).await {
            if existing == content {
                return Ok(());
            }
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| KilnError::io(format!("creating {}", parent.display()), e))?;
        }
        fs::write(&path, content)
            .await
            .map_err(|e| KilnError::io(format!("writing {}", path.display()), e))
    }

    /// Total size of the entry in bytes
    pub fn size(&self) -> KilnResult<u64> {
        dir_size(&self.dir).map_err(|e| KilnError::io(format!("sizing {}", self.dir.display()), e))
    }
}

async fn remove_if_exists(path: &Path) -> KilnResult<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(KilnError::io(format!("removing {}", path.display()), e)),
    }
}

fn dir_size(dir: &Path) -> io::Result<u64> {
    let mut total = 0;
    if !dir.exists() {
        return Ok(0);
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if meta.is_dir() {
            total += dir_size(&entry.path())?;
        } else {
            total += meta.len();
        }
    }
    Ok(total)
}
