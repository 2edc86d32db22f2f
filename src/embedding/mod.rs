//! Embedding providers.
//!
//! Concrete implementations of [`Embedder`]:
//! - **[`LocalEmbedder`]**: fastembed on the blocking pool; the model is
//!   downloaded once, loaded on first use, and reused for every batch.
//! - **[`OpenAIEmbedder`]**: `POST {url}/embeddings`, key from `OPENAI_API_KEY`.
//! - **[`OllamaEmbedder`]**: `POST {url}/api/embed` on a local Ollama.
//!
//! Providers make exactly one attempt per call. Retries, backoff, and the
//! per-call timeout are applied by the sync's
//! [`RetryPolicy`](crate::retry::RetryPolicy) so every provider behaves the
//! same under failure.
//!
//! Use [`create_embedder`] to build the configured provider.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use docsync_core::embedding::{check_batch, Embedder};
use docsync_core::ProviderError;

use crate::config::EmbeddingConfig;
use crate::http;

/// Build the provider named by `embedding.provider`.
///
/// `index_dims` is used when the config leaves `embedding.dims` unset.
pub fn create_embedder(config: &EmbeddingConfig, index_dims: usize) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAIEmbedder::new(config, index_dims)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config, index_dims)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(LocalEmbedder::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings-fastembed"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

// ============ OpenAI ============

pub struct OpenAIEmbedder {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    dims: usize,
}

impl OpenAIEmbedder {
    pub fn new(config: &EmbeddingConfig, index_dims: usize) -> Result<Self> {
        let model = config
            .model
            .clone()
            .context("embedding.model required for OpenAI provider")?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .context("OPENAI_API_KEY environment variable not set")?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        Ok(Self {
            client: http::client()?,
            url: url.trim_end_matches('/').to_string(),
            api_key,
            model,
            dims: config.dims.unwrap_or(index_dims),
        })
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let mut body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        // Only the text-embedding-3 family accepts a dimensions override.
        if self.model.starts_with("text-embedding-3") {
            body["dimensions"] = serde_json::json!(self.dims);
        }

        let response = self
            .client
            .post(format!("{}/embeddings", self.url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(http::transport_error)?;
        let json = http::json(http::check(response).await?).await?;
        let vectors = parse_openai_response(&json)?;
        check_batch(texts.len(), &vectors, self.dims)?;
        Ok(vectors)
    }
}

/// `data[].embedding`, reordered by `data[].index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, ProviderError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| ProviderError::Malformed("missing data array".into()))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| ProviderError::Malformed("missing embedding".into()))?;
        indexed.push((index, to_f32_vec(embedding)?));
    }
    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama ============

pub struct OllamaEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    dims: usize,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig, index_dims: usize) -> Result<Self> {
        let model = config
            .model
            .clone()
            .context("embedding.model required for Ollama provider")?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        Ok(Self {
            client: http::client()?,
            url: url.trim_end_matches('/').to_string(),
            model,
            dims: config.dims.unwrap_or(index_dims),
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let response = self
            .client
            .post(format!("{}/api/embed", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                ProviderError::Transport(format!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    self.url, e
                ))
            })?;
        let json = http::json(http::check(response).await?).await?;

        let embeddings = json
            .get("embeddings")
            .and_then(|e| e.as_array())
            .ok_or_else(|| ProviderError::Malformed("missing embeddings array".into()))?;
        let vectors = embeddings
            .iter()
            .map(|e| {
                e.as_array()
                    .ok_or_else(|| ProviderError::Malformed("embedding is not an array".into()))
                    .and_then(|values| to_f32_vec(values))
            })
            .collect::<Result<Vec<_>, _>>()?;
        check_batch(texts.len(), &vectors, self.dims)?;
        Ok(vectors)
    }
}

fn to_f32_vec(values: &[serde_json::Value]) -> Result<Vec<f32>, ProviderError> {
    values
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| ProviderError::Malformed("non-numeric embedding value".into()))
        })
        .collect()
}

// ============ Local (fastembed) ============

#[cfg(feature = "local-embeddings-fastembed")]
pub use local::LocalEmbedder;

#[cfg(feature = "local-embeddings-fastembed")]
mod local {
    use std::sync::{Arc, Mutex, PoisonError};

    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use docsync_core::embedding::{check_batch, Embedder};
    use docsync_core::ProviderError;
    use tracing::info;

    use crate::config::EmbeddingConfig;

    /// fastembed model held for the life of the process.
    pub struct LocalEmbedder {
        model_name: String,
        dims: usize,
        batch_size: usize,
        model: Arc<Mutex<Option<fastembed::TextEmbedding>>>,
    }

    impl LocalEmbedder {
        pub fn new(config: &EmbeddingConfig) -> Result<Self> {
            let model_name = config
                .model
                .clone()
                .unwrap_or_else(|| "all-minilm-l6-v2".to_string());
            // Validate the name up front so a typo fails at startup.
            fastembed_model(&model_name)?;
            let dims = config.dims.unwrap_or_else(|| native_dims(&model_name));
            Ok(Self {
                model_name,
                dims,
                batch_size: config.batch_size,
                model: Arc::new(Mutex::new(None)),
            })
        }
    }

    fn native_dims(model_name: &str) -> usize {
        match model_name {
            "bge-base-en-v1.5" | "nomic-embed-text-v1.5" | "multilingual-e5-base" => 768,
            "bge-large-en-v1.5" | "multilingual-e5-large" => 1024,
            _ => 384,
        }
    }

    fn fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
        match name {
            "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
            "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
            "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
            "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
            "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
            "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
            "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
            "multilingual-e5-large" => Ok(fastembed::EmbeddingModel::MultilingualE5Large),
            other => bail!(
                "Unknown local embedding model: '{}'. Supported models: \
                 all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
                 nomic-embed-text-v1.5, multilingual-e5-small, multilingual-e5-base, \
                 multilingual-e5-large",
                other
            ),
        }
    }

    #[async_trait]
    impl Embedder for LocalEmbedder {
        fn model_name(&self) -> &str {
            &self.model_name
        }

        fn dims(&self) -> usize {
            self.dims
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
            let slot = self.model.clone();
            let name = self.model_name.clone();
            let batch_size = self.batch_size;
            let input = texts.to_vec();

            let vectors = tokio::task::spawn_blocking(move || {
                let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
                if guard.is_none() {
                    let model = fastembed_model(&name)
                        .map_err(|e| ProviderError::Other(e.to_string()))?;
                    info!(model = %name, "loading local embedding model");
                    let loaded = fastembed::TextEmbedding::try_new(
                        fastembed::InitOptions::new(model).with_show_download_progress(false),
                    )
                    .map_err(|e| {
                        ProviderError::Other(format!("failed to initialize local model: {}", e))
                    })?;
                    *guard = Some(loaded);
                }
                match guard.as_mut() {
                    Some(model) => model
                        .embed(input, Some(batch_size))
                        .map_err(|e| ProviderError::Other(format!("local embedding failed: {}", e))),
                    None => Err(ProviderError::Other("local model unavailable".into())),
                }
            })
            .await
            .map_err(|e| ProviderError::Other(format!("embedding task failed: {}", e)))??;

            check_batch(texts.len(), &vectors, self.dims)?;
            Ok(vectors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openai_response_is_reordered_by_index() {
        let json = serde_json::json!({
            "data": [
                { "index": 1, "embedding": [0.0, 1.0] },
                { "index": 0, "embedding": [1.0, 0.0] }
            ]
        });
        let vectors = parse_openai_response(&json).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn openai_response_without_data_is_malformed() {
        let err = parse_openai_response(&serde_json::json!({"object": "list"})).unwrap_err();
        assert!(matches!(err, ProviderError::Malformed(_)));
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let config = EmbeddingConfig {
            provider: "cohere".into(),
            ..EmbeddingConfig::default()
        };
        assert!(create_embedder(&config, 384).is_err());
    }

    #[test]
    fn ollama_dims_fall_back_to_index() {
        let config = EmbeddingConfig {
            provider: "ollama".into(),
            model: Some("nomic-embed-text".into()),
            ..EmbeddingConfig::default()
        };
        let embedder = OllamaEmbedder::new(&config, 768).unwrap();
        assert_eq!(embedder.dims(), 768);
        assert_eq!(embedder.model_name(), "nomic-embed-text");
    }
}
