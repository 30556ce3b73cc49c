//! Process-external exclusive lock guarding a repository directory.
//!
//! The lock is an OS advisory lock on `<repo>/.artifactlock`. It coordinates
//! cooperating processes on one machine; it is a no-op for repositories that
//! are not local directories, and when locking is disabled.

use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fs4::FileExt;
use parking_lot::Mutex;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Name of the lock file inside a repository directory.
pub const LOCK_FILE: &str = ".artifactlock";

/// Interval between acquisition attempts while waiting.
pub const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Failure to take or hold the repository lock.
#[derive(Error, Debug)]
pub enum LockError {
    /// Another process holds the lock and waiting was not requested.
    #[error("Lock {0} is held by another process")]
    Unavailable(PathBuf),

    /// This instance already holds the lock.
    #[error("Lock {0} acquired twice without release")]
    Reentered(PathBuf),

    /// The cancellation token fired while waiting.
    #[error("Cancelled while waiting for lock")]
    Cancelled,

    /// The lock file could not be opened or locked.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Exclusive, non-reentrant repository lock.
#[derive(Debug)]
pub struct RepositoryLock {
    path: Option<PathBuf>,
    held: Mutex<Option<File>>,
}

impl RepositoryLock {
    /// Lock for the repository directory `dir`.
    pub fn new(dir: &Path) -> Self {
        Self {
            path: Some(dir.join(LOCK_FILE)),
            held: Mutex::new(None),
        }
    }

    /// A lock that always succeeds and holds nothing.
    pub fn disabled() -> Self {
        Self {
            path: None,
            held: Mutex::new(None),
        }
    }

    /// `true` if this lock guards a real file.
    pub fn is_enabled(&self) -> bool {
        self.path.is_some()
    }

    /// `true` while this instance holds the lock.
    pub fn is_held(&self) -> bool {
        self.held.lock().is_some()
    }

    /// Try to take the lock.
    ///
    /// With `wait`, polls every [`POLL_INTERVAL`] until the lock is free or
    /// `cancel` fires. Without `wait`, a contended lock returns `Ok(false)`.
    ///
    /// # Errors
    ///
    /// [`LockError::Reentered`] if this instance already holds the lock,
    /// [`LockError::Cancelled`] if cancelled while waiting, or an I/O error.
    pub fn try_acquire(&self, wait: bool, cancel: &CancellationToken) -> Result<bool, LockError> {
        let Some(path) = &self.path else {
            return Ok(true);
        };

        let mut held = self.held.lock();
        if held.is_some() {
            return Err(LockError::Reentered(path.clone()));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    tracing::debug!(lock = %path.display(), "Acquired repository lock");
                    *held = Some(file);
                    return Ok(true);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    if !wait {
                        return Ok(false);
                    }
                }
                Err(e) => return Err(e.into()),
            }
            if cancel.is_cancelled() {
                return Err(LockError::Cancelled);
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    /// Acquire and return a guard that releases on drop.
    ///
    /// # Errors
    ///
    /// As [`try_acquire`](Self::try_acquire); a contended lock without `wait`
    /// becomes [`LockError::Unavailable`].
    pub fn acquire(&self, wait: bool, cancel: &CancellationToken) -> Result<LockGuard<'_>, LockError> {
        if self.try_acquire(wait, cancel)? {
            Ok(LockGuard { lock: self })
        } else {
            Err(LockError::Unavailable(self.path.clone().unwrap_or_default()))
        }
    }

    /// Release the lock. Releasing an unheld lock does nothing.
    pub fn release(&self) {
        if let Some(file) = self.held.lock().take() {
            if let Err(e) = FileExt::unlock(&file) {
                tracing::warn!(error = %e, "Failed to release repository lock");
            }
        }
    }
}

/// Releases the lock when dropped, including on early return.
#[derive(Debug)]
pub struct LockGuard<'a> {
    lock: &'a RepositoryLock,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}
