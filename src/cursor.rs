//! Durable change-feed cursor.
//!
//! The cursor file is a small versioned JSON record:
//!
//! ```json
//! { "version": 1, "delta_link": "https://graph.microsoft.com/...", "captured_at": "2026-10-19T08:00:00Z" }
//! ```
//!
//! Files written by older deployments that hold only `{"delta_link": ...}`
//! are accepted. A missing, unreadable, or corrupt file reads as "no
//! cursor", which sends the scheduler back to a full sync.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use docsync_core::models::SyncCursor;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::PersistenceError;
use crate::state;

const CURSOR_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct CursorFile {
    #[serde(default = "legacy_version")]
    version: u32,
    delta_link: Option<String>,
    #[serde(default)]
    captured_at: Option<DateTime<Utc>>,
}

fn legacy_version() -> u32 {
    CURSOR_VERSION
}

#[derive(Debug, Clone)]
pub struct CursorStore {
    path: PathBuf,
}

impl CursorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The persisted cursor, or `None` if absent or unreadable.
    pub fn load(&self) -> Option<SyncCursor> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "cursor file unreadable; treating as absent");
                return None;
            }
        };

        let file: CursorFile = match serde_json::from_slice(&bytes) {
            Ok(file) => file,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "cursor file corrupt; treating as absent");
                return None;
            }
        };

        if file.version > CURSOR_VERSION {
            warn!(
                path = %self.path.display(),
                version = file.version,
                "cursor file written by a newer version; treating as absent"
            );
            return None;
        }

        let token = file.delta_link.filter(|t| !t.is_empty())?;
        let captured_at = file
            .captured_at
            .or_else(|| self.modified_at())
            .unwrap_or_else(Utc::now);
        Some(SyncCursor { token, captured_at })
    }

    pub fn save(&self, cursor: &SyncCursor) -> Result<(), PersistenceError> {
        let file = CursorFile {
            version: CURSOR_VERSION,
            delta_link: Some(cursor.token.clone()),
            captured_at: Some(cursor.captured_at),
        };
        state::write_json_atomic(&self.path, &file)?;
        info!(path = %self.path.display(), "saved change-feed cursor");
        Ok(())
    }

    /// Delete the cursor. Returns whether one existed.
    pub fn clear(&self) -> Result<bool, PersistenceError> {
        state::remove_file(&self.path)
    }

    fn modified_at(&self) -> Option<DateTime<Utc>> {
        let modified = std::fs::metadata(&self.path).ok()?.modified().ok()?;
        Some(DateTime::<Utc>::from(modified))
    }
}
