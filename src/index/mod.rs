//! Vector index backends.
//!
//! | Backend | Type | Notes |
//! |---------|------|-------|
//! | `pinecone` | [`PineconeIndex`](pinecone::PineconeIndex) | REST data plane, key from `PINECONE_API_KEY` |
//! | `sqlite` | [`SqliteIndex`](sqlite::SqliteIndex) | local file, brute-force cosine |
//! | `memory` | [`InMemoryIndex`] | lost on exit; dry runs and tests |

pub mod pinecone;
pub mod sqlite;

use std::sync::Arc;

use anyhow::{bail, Result};
use docsync_core::index::memory::InMemoryIndex;
use docsync_core::index::VectorIndex;
use tracing::warn;

use crate::config::Config;

/// Build the backend named by `index.backend`.
pub async fn create_index(config: &Config) -> Result<Arc<dyn VectorIndex>> {
    match config.index.backend.as_str() {
        "pinecone" => Ok(Arc::new(pinecone::PineconeIndex::from_config(&config.index)?)),
        "sqlite" => {
            let path = config
                .index
                .path
                .clone()
                .unwrap_or_else(|| config.state.dir.join("vectors.sqlite"));
            Ok(Arc::new(sqlite::SqliteIndex::open(&path).await?))
        }
        "memory" => {
            warn!("using the in-memory vector index; vectors are lost on exit");
            Ok(Arc::new(InMemoryIndex::new()))
        }
        other => bail!("Unknown index backend: {}", other),
    }
}
