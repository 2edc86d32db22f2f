//! Core data models used throughout docsync.
//!
//! These types describe what flows through a sync run: records discovered
//! in the remote repository, the chunks derived from their text, the
//! vector records written to the index, and the per-run statistics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A file discovered in the remote repository by a listing or change-feed call.
///
/// Produced by [`DocumentStore`](crate::source::DocumentStore) implementations
/// and never mutated locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Provider-assigned stable identifier.
    pub id: String,
    /// Display name, including the extension (`"proposal.docx"`).
    pub name: String,
    /// Remote path of the containing folder plus the name.
    pub path: String,
    /// Size in bytes as reported by the provider.
    pub size: u64,
    /// MIME type hint, empty when the provider did not report one.
    pub content_type: String,
    /// Browser URL for the file, empty when unknown.
    pub web_url: String,
    pub last_modified: Option<DateTime<Utc>>,
    /// Tombstone flag from the change feed.
    pub deleted: bool,
}

impl FileRecord {
    /// Convenience constructor for a live file with only an id and a name.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: id.into(),
            path: format!("/{}", name),
            name,
            size: 0,
            content_type: String::new(),
            web_url: String::new(),
            last_modified: None,
            deleted: false,
        }
    }

    /// Returns a tombstone for this record.
    pub fn tombstone(&self) -> Self {
        Self {
            deleted: true,
            ..self.clone()
        }
    }
}

/// A folder reference used as a unit of work during recursive listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FolderRef {
    pub id: String,
    pub name: String,
    pub path: String,
}

/// One entry of a listing or change-feed page.
#[derive(Debug, Clone, PartialEq)]
pub enum DriveItem {
    File(FileRecord),
    Folder(FolderRef),
}

/// One page of `list_children`.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub items: Vec<DriveItem>,
    /// Token for the next page of the same folder, if any.
    pub next_page: Option<String>,
}

/// One page of the change feed.
///
/// A page carries either a `next_link` (more pages follow) or a
/// `delta_link` (the feed is exhausted and this is the new cursor). A page
/// with neither means the feed was truncated and no cursor is available.
#[derive(Debug, Clone, Default)]
pub struct DeltaPage {
    pub items: Vec<DriveItem>,
    pub next_link: Option<String>,
    pub delta_link: Option<String>,
}

/// Opaque change-feed position plus the time it was captured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncCursor {
    pub token: String,
    pub captured_at: DateTime<Utc>,
}

impl SyncCursor {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            captured_at: Utc::now(),
        }
    }
}

/// A segment of a file's extracted text, the unit of embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub file_id: String,
    /// Position of this chunk within the file, contiguous from 0.
    pub ordinal: u32,
    pub text: String,
    /// SHA-256 of `text`, hex encoded.
    pub hash: String,
}

/// Provenance metadata stored next to every vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMetadata {
    /// Origin label of the repository (e.g. `"sharepoint"`).
    pub source: String,
    pub knowledge_base: String,
    pub source_file_id: String,
    pub filename: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub web_url: String,
    /// RFC 3339 timestamp, empty when unknown.
    #[serde(default)]
    pub last_modified: String,
    #[serde(default)]
    pub content_type: String,
    pub chunk_index: u32,
    /// The chunk text itself, returned with query matches.
    pub text: String,
}

/// A vector together with its identifier and metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: VectorMetadata,
}

/// A nearest-neighbour query result.
#[derive(Debug, Clone, Serialize)]
pub struct VectorMatch {
    pub id: String,
    pub score: f32,
    pub metadata: VectorMetadata,
}

/// Which entry point produced a [`SyncStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncKind {
    Full,
    Incremental,
}

impl std::fmt::Display for SyncKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncKind::Full => write!(f, "full"),
            SyncKind::Incremental => write!(f, "incremental"),
        }
    }
}

/// Counters for a single sync run. Created fresh per run and returned to
/// the caller; never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStats {
    pub kind: SyncKind,
    /// Files whose vectors were written successfully.
    pub files_processed: u64,
    /// Changed files handled by an incremental run.
    pub files_updated: u64,
    /// Tombstones (and, on full runs, orphans) handled.
    pub files_deleted: u64,
    /// Files skipped for having too little extractable text.
    pub files_skipped: u64,
    pub chunks_created: u64,
    pub vectors_uploaded: u64,
    pub vectors_deleted: u64,
    pub errors: u64,
    /// Whether this run persisted a new cursor.
    pub cursor_saved: bool,
    /// Reason the run stopped before processing every file, if it did.
    pub aborted: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SyncStats {
    pub fn new(kind: SyncKind) -> Self {
        Self {
            kind,
            files_processed: 0,
            files_updated: 0,
            files_deleted: 0,
            files_skipped: 0,
            chunks_created: 0,
            vectors_uploaded: 0,
            vectors_deleted: 0,
            errors: 0,
            cursor_saved: false,
            aborted: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn has_errors(&self) -> bool {
        self.errors > 0
    }
}
