//! Wiring: build the configured providers and the orchestrator.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::cursor::CursorStore;
use crate::embedding::create_embedder;
use crate::extract::DocumentExtractor;
use crate::graph::GraphDocumentStore;
use crate::index::create_index;
use crate::retry::RetryPolicy;
use crate::service::SyncService;
use crate::sync::{Providers, SyncOrchestrator, SyncSettings};

/// Graph store, extractor, embedder and index as configured.
pub async fn build_providers(config: &Config) -> Result<Providers> {
    let store = GraphDocumentStore::from_config(&config.source)
        .context("Failed to configure the SharePoint source")?;
    let embedder = create_embedder(&config.embedding, config.index.dims)?;
    let index = create_index(config)
        .await
        .context("Failed to open the vector index")?;
    Ok(Providers {
        store: Arc::new(store),
        extractor: Arc::new(DocumentExtractor),
        embedder,
        index,
    })
}

pub fn orchestrator(config: &Config, providers: Providers) -> SyncOrchestrator {
    SyncOrchestrator::new(
        providers,
        CursorStore::new(config.state.cursor_path()),
        config.state.manifest_path(),
        RetryPolicy::from_config(&config.retry),
        SyncSettings::from_config(config),
    )
}

pub async fn build_service(config: &Config, cancel: CancellationToken) -> Result<SyncService> {
    let providers = build_providers(config).await?;
    Ok(SyncService::new(orchestrator(config, providers), cancel))
}
