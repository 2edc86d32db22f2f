//! Vector index abstraction.
//!
//! The [`VectorIndex`] trait is the write and query surface the sync
//! orchestrator and the search endpoint are written against. Backends:
//!
//! | Backend | Location |
//! |---------|----------|
//! | [`InMemoryIndex`](memory::InMemoryIndex) | this crate, for tests |
//! | Pinecone | `docsync::index::pinecone` |
//! | SQLite | `docsync::index::sqlite` |

pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::models::{VectorMatch, VectorMetadata, VectorRecord};

/// Equality filter over top-level metadata fields.
///
/// Every entry must match for a vector to be returned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataFilter {
    pub equals: BTreeMap<String, String>,
}

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a `field == value` condition.
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.equals.insert(field.into(), value.into());
        self
    }

    /// Filter selecting every vector of one source file.
    pub fn source_file(file_id: &str) -> Self {
        Self::new().eq("source_file_id", file_id)
    }

    pub fn is_empty(&self) -> bool {
        self.equals.is_empty()
    }

    /// Whether `metadata` satisfies every condition.
    pub fn matches(&self, metadata: &VectorMetadata) -> bool {
        if self.equals.is_empty() {
            return true;
        }
        let value = match serde_json::to_value(metadata) {
            Ok(v) => v,
            Err(_) => return false,
        };
        self.equals.iter().all(|(field, expected)| {
            match value.get(field) {
                Some(serde_json::Value::String(s)) => s == expected,
                Some(other) => other.to_string() == *expected,
                None => false,
            }
        })
    }
}

/// Abstract vector index.
///
/// `upsert` overwrites records with the same id. `delete` ignores ids that
/// are not present. `query` returns at most `k` matches ordered by
/// descending score.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or overwrite records. Returns the number written.
    async fn upsert(&self, records: &[VectorRecord]) -> Result<usize, ProviderError>;

    /// Remove records by id. Returns the number of ids submitted.
    async fn delete(&self, ids: &[String]) -> Result<usize, ProviderError>;

    /// Nearest-neighbour search.
    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<VectorMatch>, ProviderError>;
}

/// Sort matches by descending score and keep the best `k`.
pub fn top_k(mut matches: Vec<VectorMatch>, k: usize) -> Vec<VectorMatch> {
    matches.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    matches.truncate(k);
    matches
}
