//! Sync orchestrator: full and incremental runs.
//!
//! A run moves files from the [`DocumentStore`] through extraction,
//! chunking, and embedding into the [`VectorIndex`]:
//!
//! ```text
//! list / delta ─▶ download ─▶ extract ─▶ chunk ─▶ embed ─▶ upsert
//! ```
//!
//! Per-file failures are counted in [`SyncStats::errors`] and the run moves
//! on to the next file. Listing and change-feed failures end the run early
//! with [`SyncStats::aborted`] set and the cursor untouched. Only rejected
//! credentials and cancellation surface as a [`SyncError`].
//!
//! Vector ids are derived from `(file_id, chunk ordinal)`, so re-indexing a
//! file overwrites its vectors in place. The [`Manifest`] remembers how many
//! chunks each file owns so the vectors of deleted files, and the stale tail
//! of files that shrank, can be removed.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use docsync_core::chunk::{chunk_text, content_hash, vector_id, vector_ids};
use docsync_core::embedding::{check_batch, Embedder};
use docsync_core::extract::TextExtractor;
use docsync_core::index::VectorIndex;
use docsync_core::models::{
    DriveItem, FileRecord, FolderRef, SyncCursor, SyncKind, SyncStats, VectorMetadata, VectorRecord,
};
use docsync_core::source::DocumentStore;
use docsync_core::ProviderError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::cursor::CursorStore;
use crate::error::SyncError;
use crate::manifest::{Manifest, ManifestEntry};
use crate::retry::RetryPolicy;

/// The external collaborators a run talks to.
#[derive(Clone)]
pub struct Providers {
    pub store: Arc<dyn DocumentStore>,
    pub extractor: Arc<dyn TextExtractor>,
    pub embedder: Arc<dyn Embedder>,
    pub index: Arc<dyn VectorIndex>,
}

/// Tunables of a run, taken from `[chunking]`, `[embedding]`, `[source]`
/// and `[sync]`.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub chunk_size: usize,
    pub overlap: usize,
    /// Files with less extracted text than this are skipped.
    pub min_text_chars: usize,
    pub embed_batch_size: usize,
    pub source_label: String,
    pub knowledge_base: String,
    /// Delete the vectors of removed files and stale chunk tails.
    pub prune_deleted: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            overlap: 100,
            min_text_chars: 50,
            embed_batch_size: 64,
            source_label: "sharepoint".to_string(),
            knowledge_base: "default".to_string(),
            prune_deleted: true,
        }
    }
}

impl SyncSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            chunk_size: config.chunking.chunk_size,
            overlap: config.chunking.overlap,
            min_text_chars: config.chunking.min_text_chars,
            embed_batch_size: config.embedding.batch_size.max(1),
            source_label: config.source.label.clone(),
            knowledge_base: config.sync.knowledge_base.clone(),
            prune_deleted: config.sync.prune_deleted,
        }
    }
}

/// What happened to one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileOutcome {
    Indexed,
    Skipped,
    Failed,
}

pub struct SyncOrchestrator {
    providers: Providers,
    cursor: CursorStore,
    manifest_path: PathBuf,
    retry: RetryPolicy,
    settings: SyncSettings,
}

impl SyncOrchestrator {
    pub fn new(
        providers: Providers,
        cursor: CursorStore,
        manifest_path: impl Into<PathBuf>,
        retry: RetryPolicy,
        settings: SyncSettings,
    ) -> Self {
        Self {
            providers,
            cursor,
            manifest_path: manifest_path.into(),
            retry,
            settings,
        }
    }

    pub fn cursor_store(&self) -> &CursorStore {
        &self.cursor
    }

    pub fn providers(&self) -> &Providers {
        &self.providers
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Authenticate and resolve the configured root.
    pub async fn connect(&self) -> Result<(), ProviderError> {
        let store = &self.providers.store;
        self.retry.call("connect", || store.connect()).await
    }

    /// Every file under the configured root, breadth-first.
    ///
    /// Folders are visited in the order they are discovered; each folder's
    /// listing is followed page by page before the next folder starts.
    pub async fn list_files(&self, cancel: &CancellationToken) -> Result<Vec<FileRecord>, ListError> {
        let store = &self.providers.store;
        let root = self
            .retry
            .call("root", || store.root())
            .await
            .map_err(ListError::Provider)?;

        let mut worklist: VecDeque<FolderRef> = VecDeque::from([root.clone()]);
        let mut visited: HashSet<String> = HashSet::from([root.id.clone()]);
        let mut files = Vec::new();

        while let Some(folder) = worklist.pop_front() {
            let mut page_token: Option<String> = None;
            loop {
                if cancel.is_cancelled() {
                    return Err(ListError::Cancelled);
                }
                let page = self
                    .retry
                    .call("list_children", || {
                        store.list_children(&folder, page_token.as_deref())
                    })
                    .await
                    .map_err(|e| {
                        warn!(folder = %folder.path, error = %e, "listing failed");
                        ListError::Provider(e)
                    })?;

                for item in page.items {
                    match item {
                        DriveItem::Folder(sub) => {
                            if visited.insert(sub.id.clone()) {
                                worklist.push_back(sub);
                            }
                        }
                        DriveItem::File(file) if !file.deleted => files.push(file),
                        DriveItem::File(_) => {}
                    }
                }

                match page.next_page {
                    Some(next) => page_token = Some(next),
                    None => break,
                }
            }
            debug!(folder = %folder.path, total = files.len(), "listed folder");
        }

        Ok(files)
    }

    /// Re-index every file under the root.
    ///
    /// A change-feed cursor for the current end of the feed is captured
    /// before any file is touched and persisted once every file has been
    /// handled, so changes made while the run is in progress are replayed
    /// by the next incremental run.
    pub async fn full_sync(&self, cancel: &CancellationToken) -> Result<SyncStats, SyncError> {
        let mut stats = SyncStats::new(SyncKind::Full);
        info!("full sync started");

        if let Err(e) = self.connect().await {
            return self.abort_on(e, "connect", stats);
        }

        let baseline = match self.capture_cursor().await {
            Ok(link) => Some(link),
            Err(ProviderError::Auth(msg)) => return Err(SyncError::Auth(msg)),
            Err(e) => {
                warn!(error = %e, "baseline cursor unavailable; will retry after processing");
                None
            }
        };

        let files = match self.list_files(cancel).await {
            Ok(files) => files,
            Err(ListError::Cancelled) => return Err(SyncError::Cancelled),
            Err(ListError::Provider(e)) => return self.abort_on(e, "listing", stats),
        };
        info!(files = files.len(), "listing complete");

        let mut manifest = Manifest::load(&self.manifest_path);
        let mut seen: HashSet<String> = HashSet::with_capacity(files.len());

        for file in &files {
            if cancel.is_cancelled() {
                self.save_manifest(&manifest, &mut stats);
                return Err(SyncError::Cancelled);
            }
            seen.insert(file.id.clone());
            let outcome = match self.process_file(file, &mut manifest, &mut stats).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.save_manifest(&manifest, &mut stats);
                    return Err(e);
                }
            };
            if outcome == FileOutcome::Indexed {
                stats.files_processed += 1;
            }
        }

        if self.settings.prune_deleted {
            self.sweep_orphans(&seen, &mut manifest, &mut stats).await;
        }

        let manifest_saved = self.save_manifest(&manifest, &mut stats);

        let baseline = match baseline {
            Some(link) => link,
            None => match self.capture_cursor().await {
                Ok(link) => link,
                Err(ProviderError::Auth(msg)) => return Err(SyncError::Auth(msg)),
                Err(e) => {
                    error!(error = %e, "could not obtain a change-feed cursor; no cursor saved");
                    stats.errors += 1;
                    None
                }
            },
        };

        match baseline {
            Some(link) if manifest_saved => self.save_cursor(&link, &mut stats),
            Some(_) => warn!("manifest not saved; leaving cursor unchanged"),
            None => warn!("change feed ended without a cursor; no cursor saved"),
        }

        stats.finish();
        log_stats(&stats);
        Ok(stats)
    }

    /// Apply what changed since the persisted cursor.
    ///
    /// Without a cursor the feed is read from the beginning, which replays
    /// the current state of every file. A feed that ends without a new
    /// cursor leaves the stored one in place.
    pub async fn incremental_sync(&self, cancel: &CancellationToken) -> Result<SyncStats, SyncError> {
        let mut stats = SyncStats::new(SyncKind::Incremental);

        if let Err(e) = self.connect().await {
            return self.abort_on(e, "connect", stats);
        }

        let start = self.cursor.load();
        match &start {
            Some(cursor) => info!(captured_at = %cursor.captured_at, "incremental sync started"),
            None => info!("incremental sync started without a cursor; reading the full change feed"),
        }

        let store = &self.providers.store;
        let mut link = start.map(|c| c.token);
        let mut changes: Vec<DriveItem> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();
        let new_cursor = loop {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            let page = match self.retry.call("delta", || store.delta(link.as_deref())).await {
                Ok(page) => page,
                Err(e) => return self.abort_on(e, "change feed", stats),
            };
            for item in page.items {
                // The feed may report an item more than once; keep the
                // latest state at its first position.
                let id = match &item {
                    DriveItem::File(f) => f.id.clone(),
                    DriveItem::Folder(_) => continue,
                };
                match positions.get(&id) {
                    Some(&pos) => changes[pos] = item,
                    None => {
                        positions.insert(id, changes.len());
                        changes.push(item);
                    }
                }
            }
            match (page.next_link, page.delta_link) {
                (Some(next), _) => link = Some(next),
                (None, delta) => break delta,
            }
        };
        info!(changes = changes.len(), "change feed read");

        let mut manifest = Manifest::load(&self.manifest_path);

        for item in &changes {
            if cancel.is_cancelled() {
                self.save_manifest(&manifest, &mut stats);
                return Err(SyncError::Cancelled);
            }
            let DriveItem::File(file) = item else {
                continue;
            };
            if file.deleted {
                self.remove_file(&file.id, &file.name, &mut manifest, &mut stats)
                    .await;
                continue;
            }
            let outcome = match self.process_file(file, &mut manifest, &mut stats).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.save_manifest(&manifest, &mut stats);
                    return Err(e);
                }
            };
            if outcome == FileOutcome::Indexed {
                stats.files_processed += 1;
                stats.files_updated += 1;
            }
        }

        let manifest_saved = self.save_manifest(&manifest, &mut stats);

        match new_cursor {
            Some(link) if manifest_saved => self.save_cursor(&link, &mut stats),
            Some(_) => warn!("manifest not saved; leaving cursor unchanged"),
            None => warn!("change feed ended without a cursor; keeping the previous one"),
        }

        stats.finish();
        log_stats(&stats);
        Ok(stats)
    }

    async fn capture_cursor(&self) -> Result<Option<String>, ProviderError> {
        let store = &self.providers.store;
        self.retry.call("latest_cursor", || store.latest_cursor()).await
    }

    /// Rejected credentials fail the run; anything else ends it with
    /// `aborted` set and stats returned.
    fn abort_on(
        &self,
        err: ProviderError,
        stage: &str,
        mut stats: SyncStats,
    ) -> Result<SyncStats, SyncError> {
        if let ProviderError::Auth(msg) = err {
            error!(stage, error = %msg, "authentication failed; run aborted");
            return Err(SyncError::Auth(msg));
        }
        error!(stage, error = %err, "run aborted");
        stats.errors += 1;
        stats.aborted = Some(format!("{} failed: {}", stage, err));
        stats.finish();
        Ok(stats)
    }

    /// Download, extract, chunk, embed and upsert one file.
    ///
    /// Only an authentication failure is returned as an error; everything
    /// else, including a file the caller may not read, is counted in
    /// `stats` and reported as the outcome.
    async fn process_file(
        &self,
        file: &FileRecord,
        manifest: &mut Manifest,
        stats: &mut SyncStats,
    ) -> Result<FileOutcome, SyncError> {
        let store = &self.providers.store;
        let bytes = match self.retry.call("download", || store.download(&file.id)).await {
            Ok(bytes) if bytes.is_empty() => {
                warn!(file = %file.name, file_id = %file.id, "downloaded file is empty");
                stats.errors += 1;
                return Ok(FileOutcome::Failed);
            }
            Ok(bytes) => bytes,
            Err(ProviderError::Auth(msg)) => return Err(SyncError::Auth(msg)),
            Err(e) => {
                warn!(file = %file.name, file_id = %file.id, error = %e, "download failed");
                stats.errors += 1;
                return Ok(FileOutcome::Failed);
            }
        };

        let extractor = self.providers.extractor.clone();
        let name = file.name.clone();
        let text = match tokio::task::spawn_blocking(move || extractor.extract(&bytes, &name)).await {
            Ok(text) => text,
            Err(e) => {
                warn!(file = %file.name, error = %e, "extraction task failed");
                stats.errors += 1;
                return Ok(FileOutcome::Failed);
            }
        };

        if text.trim().chars().count() < self.settings.min_text_chars {
            debug!(file = %file.name, chars = text.trim().chars().count(), "too little text; skipped");
            stats.files_skipped += 1;
            if self.settings.prune_deleted && manifest.get(&file.id).is_some() {
                self.remove_file_vectors(&file.id, manifest, stats).await;
            }
            return Ok(FileOutcome::Skipped);
        }

        let chunks = chunk_text(&file.id, &text, self.settings.chunk_size, self.settings.overlap);
        if chunks.is_empty() {
            stats.files_skipped += 1;
            return Ok(FileOutcome::Skipped);
        }

        let embedder = &self.providers.embedder;
        let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.settings.embed_batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let result = self
                .retry
                .call("embed", || embedder.embed(&texts))
                .await
                .and_then(|out| check_batch(texts.len(), &out, embedder.dims()).map(|_| out));
            match result {
                Ok(out) => vectors.extend(out),
                Err(e) => {
                    warn!(file = %file.name, file_id = %file.id, error = %e, "embedding failed");
                    stats.errors += 1;
                    return Ok(FileOutcome::Failed);
                }
            }
        }

        let last_modified = file
            .last_modified
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
            .unwrap_or_default();
        let records: Vec<VectorRecord> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, values)| VectorRecord {
                id: vector_id(&file.id, chunk.ordinal),
                values,
                metadata: VectorMetadata {
                    source: self.settings.source_label.clone(),
                    knowledge_base: self.settings.knowledge_base.clone(),
                    source_file_id: file.id.clone(),
                    filename: file.name.clone(),
                    path: file.path.clone(),
                    web_url: file.web_url.clone(),
                    last_modified: last_modified.clone(),
                    content_type: file.content_type.clone(),
                    chunk_index: chunk.ordinal,
                    text: chunk.text.clone(),
                },
            })
            .collect();

        let index = &self.providers.index;
        let written = match self.retry.call("upsert", || index.upsert(&records)).await {
            Ok(n) => n,
            Err(e) => {
                warn!(file = %file.name, file_id = %file.id, error = %e, "upsert failed");
                stats.errors += 1;
                return Ok(FileOutcome::Failed);
            }
        };

        let new_chunks = chunks.len() as u32;
        stats.chunks_created += u64::from(new_chunks);
        stats.vectors_uploaded += written as u64;

        // Ids at or past the new chunk count belong to an older, longer
        // version of the file.
        let mut owned = new_chunks;
        let previous = manifest.get(&file.id).map(|e| e.chunks).unwrap_or(0);
        if self.settings.prune_deleted && previous > new_chunks {
            let stale = vector_ids(&file.id, new_chunks..previous);
            match self.retry.call("delete", || index.delete(&stale)).await {
                Ok(n) => stats.vectors_deleted += n as u64,
                Err(e) => {
                    warn!(file = %file.name, error = %e, "could not delete stale chunks");
                    stats.errors += 1;
                    owned = previous;
                }
            }
        }

        manifest.record(
            &file.id,
            ManifestEntry {
                chunks: owned,
                content_hash: content_hash(&text),
                filename: file.name.clone(),
                indexed_at: Utc::now(),
            },
        );
        info!(file = %file.name, file_id = %file.id, chunks = new_chunks, "indexed");
        Ok(FileOutcome::Indexed)
    }

    /// Handle a tombstone from the change feed.
    async fn remove_file(
        &self,
        file_id: &str,
        name: &str,
        manifest: &mut Manifest,
        stats: &mut SyncStats,
    ) {
        stats.files_deleted += 1;
        if !self.settings.prune_deleted {
            info!(file = %name, file_id, "file deleted; vectors left in place");
            return;
        }
        if self.remove_file_vectors(file_id, manifest, stats).await {
            info!(file = %name, file_id, "file deleted; vectors removed");
        }
    }

    /// Delete every vector `file_id` owns and drop its manifest entry.
    /// Returns false if the index rejected the delete.
    async fn remove_file_vectors(
        &self,
        file_id: &str,
        manifest: &mut Manifest,
        stats: &mut SyncStats,
    ) -> bool {
        let Some(entry) = manifest.get(file_id) else {
            return true;
        };
        let ids = vector_ids(file_id, 0..entry.chunks);
        let index = &self.providers.index;
        match self.retry.call("delete", || index.delete(&ids)).await {
            Ok(n) => {
                stats.vectors_deleted += n as u64;
                manifest.remove(file_id);
                true
            }
            Err(e) => {
                warn!(file_id, error = %e, "could not delete vectors");
                stats.errors += 1;
                false
            }
        }
    }

    /// Remove vectors of manifest files that no longer appear in the listing.
    async fn sweep_orphans(
        &self,
        seen: &HashSet<String>,
        manifest: &mut Manifest,
        stats: &mut SyncStats,
    ) {
        let orphans: Vec<(String, String)> = manifest
            .file_ids()
            .filter(|id| !seen.contains(*id))
            .filter_map(|id| manifest.get(id).map(|e| (id.clone(), e.filename.clone())))
            .collect();
        for (file_id, name) in orphans {
            self.remove_file(&file_id, &name, manifest, stats).await;
        }
    }

    fn save_manifest(&self, manifest: &Manifest, stats: &mut SyncStats) -> bool {
        match manifest.save() {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "failed to save manifest");
                stats.errors += 1;
                false
            }
        }
    }

    fn save_cursor(&self, link: &str, stats: &mut SyncStats) {
        match self.cursor.save(&SyncCursor::new(link)) {
            Ok(()) => stats.cursor_saved = true,
            Err(e) => {
                error!(error = %e, "failed to save cursor; next run resumes from the previous one");
                stats.errors += 1;
            }
        }
    }
}

/// Why [`SyncOrchestrator::list_files`] stopped.
#[derive(Debug, thiserror::Error)]
pub enum ListError {
    #[error(transparent)]
    Provider(ProviderError),
    #[error("listing cancelled")]
    Cancelled,
}

fn log_stats(stats: &SyncStats) {
    info!(
        kind = %stats.kind,
        processed = stats.files_processed,
        updated = stats.files_updated,
        deleted = stats.files_deleted,
        skipped = stats.files_skipped,
        chunks = stats.chunks_created,
        vectors = stats.vectors_uploaded,
        vectors_deleted = stats.vectors_deleted,
        errors = stats.errors,
        cursor_saved = stats.cursor_saved,
        "sync finished"
    );
}
