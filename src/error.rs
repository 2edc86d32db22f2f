//! Run-level and persistence errors.
//!
//! Per-file failures never surface here; they are counted in
//! [`SyncStats::errors`](docsync_core::models::SyncStats). Only conditions
//! that stop a run before it can produce stats become a [`SyncError`].

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// The document store rejected our credentials.
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("a sync run is already in progress")]
    AlreadyRunning,

    #[error("sync run was cancelled")]
    Cancelled,
}

impl SyncError {
    /// Machine-readable code used by the HTTP control surface.
    pub fn code(&self) -> &'static str {
        match self {
            SyncError::Auth(_) => "auth_failed",
            SyncError::AlreadyRunning => "already_running",
            SyncError::Cancelled => "cancelled",
        }
    }
}

/// Failure to durably write the cursor or the manifest.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
