//! In-memory [`VectorIndex`] implementation for testing.
//!
//! Uses a `HashMap` behind `std::sync::RwLock`. Queries are brute-force
//! cosine similarity over every stored vector.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::ProviderError;
use crate::models::{VectorMatch, VectorRecord};

use super::{top_k, MetadataFilter, VectorIndex};

/// In-memory vector index.
#[derive(Default)]
pub struct InMemoryIndex {
    records: RwLock<HashMap<String, VectorRecord>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: &str) -> Option<VectorRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// All stored ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Stored records of one source file, ordered by chunk index.
    pub fn records_for_file(&self, file_id: &str) -> Vec<VectorRecord> {
        let mut out: Vec<VectorRecord> = self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|r| r.metadata.source_file_id == file_id)
            .cloned()
            .collect();
        out.sort_by_key(|r| r.metadata.chunk_index);
        out
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn upsert(&self, records: &[VectorRecord]) -> Result<usize, ProviderError> {
        let mut stored = self
            .records
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        for r in records {
            stored.insert(r.id.clone(), r.clone());
        }
        Ok(records.len())
    }

    async fn delete(&self, ids: &[String]) -> Result<usize, ProviderError> {
        let mut stored = self
            .records
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        for id in ids {
            stored.remove(id);
        }
        Ok(ids.len())
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<VectorMatch>, ProviderError> {
        let stored = self.records.read().unwrap_or_else(PoisonError::into_inner);
        let matches = stored
            .values()
            .filter(|r| filter.map_or(true, |f| f.matches(&r.metadata)))
            .map(|r| VectorMatch {
                id: r.id.clone(),
                score: cosine_similarity(vector, &r.values),
                metadata: r.metadata.clone(),
            })
            .collect();
        Ok(top_k(matches, k))
    }
}
