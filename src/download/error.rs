//! Error types for the download module.

use std::path::PathBuf;

use thiserror::Error;

use crate::engine::EngineError;

/// Errors raised by handlers and items.
///
/// Item operations report most failures as `false`/`None` and log them;
/// these values surface where a caller can act on the cause.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The item has no usable source URL.
    #[error("item '{title}' is not downloadable: no source URL")]
    NotDownloadable {
        /// Title of the offending item.
        title: String,
    },

    /// The destination storage cannot be written.
    #[error("storage at {path} is not writable")]
    StorageNotWritable {
        /// Root directory of the storage.
        path: PathBuf,
    },

    /// The engine refused a request.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// File system error while preparing or removing an artifact.
    #[error("IO error at {path}: {source}")]
    Io {
        /// The path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl DownloadError {
    /// Creates a not-downloadable error.
    pub fn not_downloadable(title: impl Into<String>) -> Self {
        Self::NotDownloadable {
            title: title.into(),
        }
    }

    /// Creates a storage-not-writable error.
    pub fn storage_not_writable(path: impl Into<PathBuf>) -> Self {
        Self::StorageNotWritable { path: path.into() }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
