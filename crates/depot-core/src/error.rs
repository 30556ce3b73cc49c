//! Domain-specific errors for repository operations

use std::path::PathBuf;

use thiserror::Error;

use crate::codec::CodecError;
use crate::config::ConfigError;
use crate::lock::LockError;

/// Everything a repository operation can fail with.
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// No rule, reference or blob id yields a location.
    #[error("No location could be resolved for {0}")]
    LocationUnresolvable(String),

    /// Another process holds the repository lock.
    #[error("Repository lock {0} is held by another process")]
    LockUnavailable(PathBuf),

    /// The lock was taken twice by one owner.
    #[error("Repository lock {0} acquired twice without release")]
    LockReentered(PathBuf),

    /// Moving bytes to or from a location failed.
    #[error("Transport failure for {url}: {message}")]
    Transport {
        /// Location being transferred.
        url: String,
        /// Rendered transport status.
        message: String,
    },

    /// Checksum, signature or structure check failed.
    #[error("Artifact content invalid: {0}")]
    ArtifactContentInvalid(String),

    /// Metadata could not be read or written.
    #[error("Failed to read or write repository metadata: {0}")]
    Persistence(#[from] CodecError),

    /// The operation observed a cancellation request.
    #[error("Operation cancelled")]
    Cancelled,

    /// An equal descriptor is already registered.
    #[error("Artifact already exists: {0}")]
    ArtifactExists(String),

    /// Metadata already exists at the create location.
    #[error("A repository already exists at {0}")]
    RepositoryExists(String),

    /// Mutation of a repository that is not a local directory.
    #[error("Repository {0} is read-only")]
    ReadOnly(String),

    /// The location cannot be used as a repository base.
    #[error("Invalid repository location '{0}'")]
    InvalidLocation(String),

    /// The engine configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Filesystem failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LockError> for RepositoryError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Unavailable(path) => Self::LockUnavailable(path),
            LockError::Reentered(path) => Self::LockReentered(path),
            LockError::Cancelled => Self::Cancelled,
            LockError::Io(e) => Self::Io(e),
        }
    }
}

/// Shorthand used throughout the engine.
pub type Result<T, E = RepositoryError> = std::result::Result<T, E>;
