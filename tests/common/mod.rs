//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use docsync::cursor::CursorStore;
use docsync::retry::RetryPolicy;
use docsync::sync::{Providers, SyncOrchestrator, SyncSettings};
use docsync_core::chunk::content_hash;
use docsync_core::embedding::Embedder;
use docsync_core::extract::PlainTextExtractor;
use docsync_core::index::memory::InMemoryIndex;
use docsync_core::index::{MetadataFilter, VectorIndex};
use docsync_core::models::{DeltaPage, FolderRef, ListPage, VectorMatch, VectorRecord};
use docsync_core::source::memory::InMemoryDocumentStore;
use docsync_core::source::DocumentStore;
use docsync_core::ProviderError;
use tempfile::TempDir;
use tokio::sync::Semaphore;

pub const DIMS: usize = 8;

/// Deterministic embedder: each vector is derived from the SHA-256 of the text.
#[derive(Default)]
pub struct HashEmbedder {
    pub calls: AtomicUsize,
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| hash_vector(t)).collect())
    }
}

pub fn hash_vector(text: &str) -> Vec<f32> {
    let hash = content_hash(text);
    hash.as_bytes()
        .chunks(hash.len() / DIMS)
        .take(DIMS)
        .map(|chunk| chunk.iter().map(|b| *b as f32).sum::<f32>() / 1000.0)
        .collect()
}

/// Embedder that rejects any batch containing `marker`.
pub struct FailingEmbedder {
    pub inner: HashEmbedder,
    pub marker: String,
}

impl FailingEmbedder {
    pub fn new(marker: &str) -> Self {
        Self {
            inner: HashEmbedder::default(),
            marker: marker.to_string(),
        }
    }
}

#[async_trait]
impl Embedder for FailingEmbedder {
    fn model_name(&self) -> &str {
        "failing-hash"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.iter().any(|t| t.contains(&self.marker)) {
            return Err(ProviderError::Client {
                status: 400,
                message: "input rejected by embedding model".into(),
            });
        }
        self.inner.embed(texts).await
    }
}

/// Index wrapper whose upserts fail for chosen files and whose deletes can
/// be switched off.
pub struct FailingIndex {
    pub inner: Arc<InMemoryIndex>,
    pub reject_upserts_for: Mutex<HashSet<String>>,
    pub reject_deletes: AtomicBool,
}

impl FailingIndex {
    pub fn new(inner: Arc<InMemoryIndex>) -> Self {
        Self {
            inner,
            reject_upserts_for: Mutex::new(HashSet::new()),
            reject_deletes: AtomicBool::new(false),
        }
    }

    pub fn reject_upserts(&self, file_id: &str) {
        self.reject_upserts_for
            .lock()
            .unwrap()
            .insert(file_id.to_string());
    }

    pub fn reject_deletes(&self, reject: bool) {
        self.reject_deletes.store(reject, Ordering::SeqCst);
    }
}

#[async_trait]
impl VectorIndex for FailingIndex {
    async fn upsert(&self, records: &[VectorRecord]) -> Result<usize, ProviderError> {
        let rejected = self.reject_upserts_for.lock().unwrap().clone();
        if records
            .iter()
            .any(|r| rejected.contains(&r.metadata.source_file_id))
        {
            return Err(ProviderError::Server {
                status: 503,
                message: "index unavailable".into(),
            });
        }
        self.inner.upsert(records).await
    }

    async fn delete(&self, ids: &[String]) -> Result<usize, ProviderError> {
        if self.reject_deletes.load(Ordering::SeqCst) {
            return Err(ProviderError::Server {
                status: 503,
                message: "index unavailable".into(),
            });
        }
        self.inner.delete(ids).await
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<VectorMatch>, ProviderError> {
        self.inner.query(vector, k, filter).await
    }
}

/// Document store wrapper that records every change-feed link it is asked for.
pub struct RecordingStore {
    pub inner: Arc<InMemoryDocumentStore>,
    pub delta_links: Mutex<Vec<Option<String>>>,
}

impl RecordingStore {
    pub fn new(inner: Arc<InMemoryDocumentStore>) -> Self {
        Self {
            inner,
            delta_links: Mutex::new(Vec::new()),
        }
    }

    pub fn links(&self) -> Vec<Option<String>> {
        self.delta_links.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.delta_links.lock().unwrap().clear();
    }
}

#[async_trait]
impl DocumentStore for RecordingStore {
    async fn connect(&self) -> Result<(), ProviderError> {
        self.inner.connect().await
    }

    async fn root(&self) -> Result<FolderRef, ProviderError> {
        self.inner.root().await
    }

    async fn list_children(
        &self,
        folder: &FolderRef,
        page: Option<&str>,
    ) -> Result<ListPage, ProviderError> {
        self.inner.list_children(folder, page).await
    }

    async fn delta(&self, link: Option<&str>) -> Result<DeltaPage, ProviderError> {
        self.delta_links
            .lock()
            .unwrap()
            .push(link.map(str::to_string));
        self.inner.delta(link).await
    }

    async fn download(&self, file_id: &str) -> Result<Vec<u8>, ProviderError> {
        self.inner.download(file_id).await
    }
}

/// Document store whose downloads wait for a permit, so a test can hold a
/// run in progress.
pub struct GatedStore {
    pub inner: Arc<InMemoryDocumentStore>,
    pub gate: Semaphore,
}

impl GatedStore {
    pub fn new(inner: Arc<InMemoryDocumentStore>) -> Self {
        Self {
            inner,
            gate: Semaphore::new(0),
        }
    }

    pub fn open(&self) {
        self.gate.add_permits(10_000);
    }
}

#[async_trait]
impl DocumentStore for GatedStore {
    async fn connect(&self) -> Result<(), ProviderError> {
        self.inner.connect().await
    }

    async fn root(&self) -> Result<FolderRef, ProviderError> {
        self.inner.root().await
    }

    async fn list_children(
        &self,
        folder: &FolderRef,
        page: Option<&str>,
    ) -> Result<ListPage, ProviderError> {
        self.inner.list_children(folder, page).await
    }

    async fn delta(&self, link: Option<&str>) -> Result<DeltaPage, ProviderError> {
        self.inner.delta(link).await
    }

    async fn download(&self, file_id: &str) -> Result<Vec<u8>, ProviderError> {
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| ProviderError::Other(e.to_string()))?;
        permit.forget();
        self.inner.download(file_id).await
    }
}

pub struct Harness {
    pub tmp: TempDir,
    pub store: Arc<InMemoryDocumentStore>,
    pub recorder: Arc<RecordingStore>,
    pub index: Arc<InMemoryIndex>,
    pub embedder: Arc<HashEmbedder>,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(InMemoryDocumentStore::new());
        Self {
            tmp: TempDir::new().unwrap(),
            recorder: Arc::new(RecordingStore::new(store.clone())),
            store,
            index: Arc::new(InMemoryIndex::new()),
            embedder: Arc::new(HashEmbedder::default()),
        }
    }

    pub fn providers(&self) -> Providers {
        Providers {
            store: self.recorder.clone(),
            extractor: Arc::new(PlainTextExtractor),
            embedder: self.embedder.clone(),
            index: self.index.clone(),
        }
    }

    pub fn settings(&self) -> SyncSettings {
        SyncSettings {
            chunk_size: 200,
            overlap: 20,
            ..SyncSettings::default()
        }
    }

    pub fn orchestrator(&self) -> SyncOrchestrator {
        self.orchestrator_with(self.settings())
    }

    pub fn orchestrator_with(&self, settings: SyncSettings) -> SyncOrchestrator {
        self.orchestrator_from(self.providers(), settings)
    }

    pub fn orchestrator_from(&self, providers: Providers, settings: SyncSettings) -> SyncOrchestrator {
        SyncOrchestrator::new(
            providers,
            self.cursor(),
            self.tmp.path().join("manifest.json"),
            RetryPolicy::immediate(2),
            settings,
        )
    }

    pub fn cursor(&self) -> CursorStore {
        CursorStore::new(self.tmp.path().join("delta_link.json"))
    }
}

/// Text long enough to clear the default 50-character threshold.
pub fn prose(seed: &str, sentences: usize) -> String {
    (0..sentences)
        .map(|i| format!("Section {} of {} describes the delivery approach in detail. ", i, seed))
        .collect()
}

/// Poll `check` every 10 ms until it holds or five seconds pass.
pub async fn wait_for<F: FnMut() -> bool>(mut check: F) -> bool {
    for _ in 0..500 {
        if check() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    false
}
