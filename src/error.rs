//! Error types

use std::io;
use std::path::{Path, PathBuf};

/// Convenience alias for fallible tree and watch operations
pub type Result<T, E = ConvertError> = std::result::Result<T, E>;

/// Invalid configuration, reported before any conversion begins
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Size string is not digits with an optional K/M/G suffix
    #[error("invalid size format: '{0}'")]
    InvalidSize(String),

    /// Encoding name is not in the catalog
    #[error("unsupported encoding: '{0}'")]
    UnsupportedEncoding(String),

    /// Exclusion pattern is not a valid glob
    #[error("invalid exclude pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    /// A required directory does not exist
    #[error("directory does not exist: {}", .0.display())]
    MissingDirectory(PathBuf),

    /// Poll interval is not a positive, finite number of seconds
    #[error("invalid watch interval: {0}")]
    InvalidInterval(f64),
}

/// Failure while converting or mirroring files
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    /// Filesystem operation failed on a specific path
    #[error("failed to {action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Directory traversal failed
    #[error("directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),

    /// Symbolic link could not be recreated
    #[error("failed to remap symlink {}: {source}", .path.display())]
    Symlink {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The watch worker owns the sync state (running or still stopping)
    #[error("sync engine worker is active")]
    WorkerActive,

    /// A tree root vanished or could not be read; the tick was abandoned
    #[error("cannot scan {}: {reason}", .root.display())]
    Scan { root: PathBuf, reason: String },

    /// The watch worker thread could not be spawned
    #[error("failed to spawn watch worker: {0}")]
    Spawn(#[source] io::Error),

    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ConvertError {
    pub(crate) fn io(action: &'static str, path: &Path, source: io::Error) -> Self {
        ConvertError::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    }
}
