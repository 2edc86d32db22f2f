//! Pinecone data-plane client.
//!
//! Talks to an index host directly (`https://<index>-<project>.svc.<env>.pinecone.io`):
//! `POST /vectors/upsert`, `POST /vectors/delete`, `POST /query`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use docsync_core::index::{MetadataFilter, VectorIndex};
use docsync_core::models::{VectorMatch, VectorMetadata, VectorRecord};
use docsync_core::ProviderError;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::config::IndexConfig;
use crate::http;

const API_VERSION: &str = "2024-07";
const DELETE_BATCH: usize = 1000;

pub struct PineconeIndex {
    client: reqwest::Client,
    host: String,
    api_key: String,
    namespace: Option<String>,
    upsert_batch_size: usize,
}

impl PineconeIndex {
    pub fn from_config(config: &IndexConfig) -> Result<Self> {
        let host = config
            .host
            .clone()
            .context("index.host required for the pinecone backend")?;
        let api_key = std::env::var("PINECONE_API_KEY")
            .context("PINECONE_API_KEY environment variable not set")?;
        Ok(Self::new(
            &host,
            api_key,
            config.namespace.clone(),
            config.upsert_batch_size,
        )?)
    }

    pub fn new(
        host: &str,
        api_key: String,
        namespace: Option<String>,
        upsert_batch_size: usize,
    ) -> Result<Self, ProviderError> {
        let host = host.trim_end_matches('/');
        let host = if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("https://{}", host)
        };
        Ok(Self {
            client: http::client()?,
            host,
            api_key,
            namespace,
            upsert_batch_size: upsert_batch_size.max(1),
        })
    }

    async fn post(&self, path: &str, mut body: Value) -> Result<Value, ProviderError> {
        if let (Some(ns), Some(obj)) = (&self.namespace, body.as_object_mut()) {
            obj.insert("namespace".into(), Value::String(ns.clone()));
        }
        let response = self
            .client
            .post(format!("{}{}", self.host, path))
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(http::transport_error)?;
        http::json(http::check(response).await?).await
    }
}

/// Pinecone filter syntax: `{"field": {"$eq": "value"}}`, combined with `$and`.
fn filter_json(filter: &MetadataFilter) -> Value {
    let clauses: Vec<Value> = filter
        .equals
        .iter()
        .map(|(field, value)| {
            let mut clause = Map::new();
            clause.insert(field.clone(), json!({ "$eq": value }));
            Value::Object(clause)
        })
        .collect();
    match clauses.len() {
        1 => clauses.into_iter().next().unwrap_or(Value::Null),
        _ => json!({ "$and": clauses }),
    }
}

fn parse_matches(body: &Value) -> Result<Vec<VectorMatch>, ProviderError> {
    let Some(matches) = body.get("matches").and_then(Value::as_array) else {
        return Ok(Vec::new());
    };
    matches
        .iter()
        .map(|m| {
            let id = m
                .get("id")
                .and_then(Value::as_str)
                .ok_or_else(|| ProviderError::Malformed("match without id".into()))?;
            let score = m.get("score").and_then(Value::as_f64).unwrap_or(0.0) as f32;
            let metadata: VectorMetadata =
                serde_json::from_value(m.get("metadata").cloned().unwrap_or(Value::Null))
                    .map_err(|e| ProviderError::Malformed(format!("match {} metadata: {}", id, e)))?;
            Ok(VectorMatch {
                id: id.to_string(),
                score,
                metadata,
            })
        })
        .collect()
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    async fn upsert(&self, records: &[VectorRecord]) -> Result<usize, ProviderError> {
        let mut written = 0;
        for batch in records.chunks(self.upsert_batch_size) {
            let vectors: Vec<Value> = batch
                .iter()
                .map(|r| json!({ "id": r.id, "values": r.values, "metadata": r.metadata }))
                .collect();
            let body = self.post("/vectors/upsert", json!({ "vectors": vectors })).await?;
            let count = body
                .get("upsertedCount")
                .and_then(Value::as_u64)
                .map(|n| n as usize)
                .unwrap_or(batch.len());
            debug!(count, "pinecone upsert");
            written += count;
        }
        Ok(written)
    }

    async fn delete(&self, ids: &[String]) -> Result<usize, ProviderError> {
        for batch in ids.chunks(DELETE_BATCH) {
            self.post("/vectors/delete", json!({ "ids": batch })).await?;
        }
        Ok(ids.len())
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<VectorMatch>, ProviderError> {
        let mut body = json!({
            "vector": vector,
            "topK": k,
            "includeMetadata": true,
            "includeValues": false,
        });
        if let Some(filter) = filter.filter(|f| !f.is_empty()) {
            body["filter"] = filter_json(filter);
        }
        let response = self.post("/query", body).await?;
        parse_matches(&response)
    }
}
