//! Cross-process lock over a cache entry
//!
//! Uses `flock(2)` on a file inside the entry. The lock is advisory and
//! held by the open file description, so the kernel drops it if the holder
//! dies; `Drop` releases it on every other exit path.

use crate::error::{KilnError, KilnResult};
use rustix::fs::FlockOperation;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Exclusive lock on one cache entry
#[derive(Debug)]
pub struct EntryLock {
    file: File,
    path: PathBuf,
}

impl EntryLock {
    /// Acquire the lock, waiting for any other holder to finish
    pub async fn acquire(path: PathBuf) -> KilnResult<Self> {
        if let Some(lock) = Self::try_acquire(&path)? {
            return Ok(lock);
        }

        info!("Waiting for another kiln process to finish building");
        let wait_path = path.clone();
        tokio::task::spawn_blocking(move || Self::acquire_blocking(&wait_path))
            .await
            .map_err(|e| KilnError::Lock {
                path,
                source: io::Error::other(e),
            })?
    }

    /// Acquire the lock without waiting; `None` when another process holds it
    pub fn try_acquire(path: &Path) -> KilnResult<Option<Self>> {
        let file = open(path)?;
        match flock(&file, FlockOperation::NonBlockingLockExclusive) {
            Ok(()) => {
                debug!("Acquired lock {}", path.display());
                Ok(Some(Self {
                    file,
                    path: path.to_path_buf(),
                }))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(KilnError::Lock {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }

    /// Acquire the lock, blocking the current thread
    pub fn acquire_blocking(path: &Path) -> KilnResult<Self> {
        let file = open(path)?;
        loop {
            match flock(&file, FlockOperation::LockExclusive) {
                Ok(()) => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(KilnError::Lock {
                        path: path.to_path_buf(),
                        source: e,
                    })
                }
            }
        }
        debug!("Acquired lock {} after waiting", path.display());
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for EntryLock {
    fn drop(&mut self) {
        let _ = flock(&self.file, FlockOperation::Unlock);
        debug!("Released lock {}", self.path.display());
    }
}

fn open(path: &Path) -> KilnResult<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|e| KilnError::Lock {
            path: path.to_path_buf(),
            source: e,
        })
}

fn flock(file: &File, operation: FlockOperation) -> io::Result<()> {
    rustix::fs::flock(file, operation).map_err(|e| io::Error::from_raw_os_error(e.raw_os_error()))
}
