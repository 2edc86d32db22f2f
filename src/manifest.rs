//! Vector manifest: which vectors each indexed file owns.
//!
//! Vector ids are a deterministic function of `(file_id, ordinal)`, so the
//! number of chunks last written for a file is enough to recompute every
//! id it owns. The manifest records that count per file, which is what
//! lets a sync delete the vectors of removed files and the stale tail of
//! files that shrank.
//!
//! Stored next to the cursor as versioned JSON and replaced atomically.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::PersistenceError;
use crate::state;

const MANIFEST_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Chunks written on the last successful index of this file.
    pub chunks: u32,
    /// SHA-256 of the extracted text that produced them.
    pub content_hash: String,
    pub filename: String,
    pub indexed_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ManifestFile {
    version: u32,
    files: BTreeMap<String, ManifestEntry>,
}

#[derive(Debug, Clone)]
pub struct Manifest {
    path: PathBuf,
    files: BTreeMap<String, ManifestEntry>,
}

impl Manifest {
    /// Empty manifest that will be saved to `path`.
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            files: BTreeMap::new(),
        }
    }

    /// Load from `path`. Missing or corrupt files load as empty.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "manifest unreadable; starting empty");
                }
                return Self::empty(path);
            }
        };
        match serde_json::from_slice::<ManifestFile>(&bytes) {
            Ok(file) if file.version <= MANIFEST_VERSION => Self {
                path,
                files: file.files,
            },
            Ok(file) => {
                warn!(path = %path.display(), version = file.version, "manifest written by a newer version; starting empty");
                Self::empty(path)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "manifest corrupt; starting empty");
                Self::empty(path)
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, file_id: &str) -> Option<&ManifestEntry> {
        self.files.get(file_id)
    }

    /// Record a file's new entry, returning the previous one.
    pub fn record(&mut self, file_id: &str, entry: ManifestEntry) -> Option<ManifestEntry> {
        self.files.insert(file_id.to_string(), entry)
    }

    pub fn remove(&mut self, file_id: &str) -> Option<ManifestEntry> {
        self.files.remove(file_id)
    }

    pub fn file_ids(&self) -> impl Iterator<Item = &String> {
        self.files.keys()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn save(&self) -> Result<(), PersistenceError> {
        let file = ManifestFile {
            version: MANIFEST_VERSION,
            files: self.files.clone(),
        };
        state::write_json_atomic(&self.path, &file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(chunks: u32) -> ManifestEntry {
        ManifestEntry {
            chunks,
            content_hash: "h".into(),
            filename: "a.pdf".into(),
            indexed_at: Utc::now(),
        }
    }

    #[test]
    fn record_save_reload() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("manifest.json");
        let mut manifest = Manifest::load(&path);
        assert!(manifest.is_empty());

        assert!(manifest.record("f1", entry(3)).is_none());
        assert_eq!(manifest.record("f1", entry(5)).unwrap().chunks, 3);
        manifest.record("f2", entry(1));
        manifest.remove("f2");
        manifest.save().unwrap();

        let reloaded = Manifest::load(&path);
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.get("f1").unwrap().chunks, 5);
    }

    #[test]
    fn corrupt_manifest_loads_empty() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("manifest.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(Manifest::load(&path).is_empty());
    }
}
