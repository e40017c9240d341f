//! Per-target advisory lock.
//!
//! Several `sdf` processes may walk the same directory tree. Each target is
//! guarded by `<dir>/.sdf_lock-<rawphot file name>`; a target whose lock is
//! already held is skipped rather than waited for.
//!
//! The lock is an exclusive, non-blocking `File::try_lock` on that file
//! (`flock` on unix), released when the guard is dropped or the process exits.

use std::fs::{File, OpenOptions, TryLockError};
use std::path::{Path, PathBuf};

use crate::error::AppError;

/// Outcome of a lock attempt.
#[derive(Debug)]
pub enum LockOutcome {
    /// Keep the guard alive while working on the target.
    Acquired(LockGuard),
    /// Another process (or file descriptor) holds the lock.
    Held,
}

/// RAII guard releasing the lock on drop.
pub struct LockGuard {
    file: File,
    path: PathBuf,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard").field("path", &self.path).finish()
    }
}

/// Lock file guarding `rawphot`.
pub fn lock_path(rawphot: &Path) -> PathBuf {
    let name = rawphot
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let dir = rawphot.parent().unwrap_or_else(|| Path::new("."));
    dir.join(format!(".sdf_lock-{name}"))
}

/// Try once to take the lock for `rawphot`; never blocks.
pub fn try_lock(rawphot: &Path) -> Result<LockOutcome, AppError> {
    let path = lock_path(rawphot);
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&path)
        .map_err(|e| AppError::io(format!("Failed to open lock '{}': {e}", path.display())))?;

    match file.try_lock() {
        Ok(()) => Ok(LockOutcome::Acquired(LockGuard { file, path })),
        Err(TryLockError::WouldBlock) => Ok(LockOutcome::Held),
        Err(TryLockError::Error(e)) => {
            Err(AppError::io(format!("Failed to lock '{}': {e}", path.display())))
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            tracing::debug!(path = %self.path.display(), error = %e, "failed to release lock");
        }
    }
}
