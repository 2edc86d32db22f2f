//! Semantic search over the vector index.
//!
//! Embeds the query with the configured provider and returns the nearest
//! chunks, optionally restricted to one source file. Used by the `search`
//! CLI command and `POST /search`.

use docsync_core::index::MetadataFilter;
use docsync_core::models::VectorMatch;
use docsync_core::ProviderError;
use thiserror::Error;

use crate::retry::RetryPolicy;
use crate::sync::Providers;

pub const DEFAULT_K: usize = 5;
pub const MAX_K: usize = 100;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("query must not be empty")]
    EmptyQuery,
    #[error("k must be between 1 and {MAX_K}")]
    InvalidK,
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

pub async fn search(
    providers: &Providers,
    retry: &RetryPolicy,
    query: &str,
    k: usize,
    file_id: Option<&str>,
) -> Result<Vec<VectorMatch>, SearchError> {
    let query = query.trim();
    if query.is_empty() {
        return Err(SearchError::EmptyQuery);
    }
    if k == 0 || k > MAX_K {
        return Err(SearchError::InvalidK);
    }

    let texts = vec![query.to_string()];
    let embedder = &providers.embedder;
    let mut vectors = retry.call("embed", || embedder.embed(&texts)).await?;
    let vector = vectors
        .pop()
        .ok_or_else(|| ProviderError::Malformed("embedder returned no vector".into()))?;

    let filter = file_id.map(MetadataFilter::source_file);
    let index = &providers.index;
    let matches = retry
        .call("query", || index.query(&vector, k, filter.as_ref()))
        .await?;
    Ok(matches)
}
