use std::path::PathBuf;

use thiserror::Error;

use crate::fileio::FileIoError;

/// Failures surfaced by [`crate::BackupStore`] operations.
///
/// Every public operation returns one of these definitively; nothing in the
/// store panics or hangs for an expected failure mode. Transient sharing
/// violations are retried internally and only show up here, as [`Self::Io`],
/// once the retry budget is spent.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("source file not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    #[error("backup file not found: {}", .0.display())]
    BackupNotFound(PathBuf),

    #[error("a backup named {0} already exists")]
    BackupExists(String),

    #[error("could not create backup directory {}: {reason}", .path.display())]
    BackupDir { path: PathBuf, reason: String },

    #[error("could not delete {}: {reason}", .path.display())]
    Delete { path: PathBuf, reason: String },

    #[error("backup worker failed: {0}")]
    Worker(String),

    #[error(transparent)]
    Io(#[from] FileIoError),
}
