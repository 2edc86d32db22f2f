//! End-to-end sync runs over the in-memory document store and index.

mod common;

use std::sync::Arc;

use common::{prose, FailingEmbedder, FailingIndex, Harness};
use docsync::error::SyncError;
use docsync::manifest::Manifest;
use docsync::sync::{Providers, SyncSettings};
use docsync_core::index::{MetadataFilter, VectorIndex};
use docsync_core::source::memory::Mutation;
use docsync_core::ProviderError;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn full_sync_indexes_every_file_with_enough_text() {
    let h = Harness::new();
    let bids = h.store.add_folder(h.store.root_id(), "Bids");
    let y2026 = h.store.add_folder(&bids.id, "2026");
    let a = h.store.add_file(h.store.root_id(), "capability.txt", prose("capability", 6));
    let b = h.store.add_file(&bids.id, "tender.txt", prose("tender", 12));
    let c = h.store.add_file(&y2026.id, "pricing.txt", prose("pricing", 3));
    let tiny = h.store.add_file(&y2026.id, "note.txt", "too short");

    let stats = h.orchestrator().full_sync(&CancellationToken::new()).await.unwrap();

    assert_eq!(stats.files_processed, 3);
    assert_eq!(stats.files_skipped, 1);
    assert_eq!(stats.errors, 0);
    assert!(stats.cursor_saved);
    for file in [&a, &b, &c] {
        let records = h.index.records_for_file(&file.id);
        assert!(!records.is_empty(), "{} has no vectors", file.name);
        assert_eq!(records[0].metadata.filename, file.name);
        assert_eq!(records[0].metadata.knowledge_base, "default");
    }
    assert!(h.index.records_for_file(&tiny.id).is_empty());
    assert_eq!(stats.vectors_uploaded, stats.chunks_created);
    assert_eq!(h.index.len() as u64, stats.chunks_created);
}

#[tokio::test]
async fn incremental_sync_resumes_from_the_saved_cursor() {
    let h = Harness::new();
    let file = h.store.add_file(h.store.root_id(), "a.txt", prose("a", 4));
    let sync = h.orchestrator();
    let cancel = CancellationToken::new();

    sync.full_sync(&cancel).await.unwrap();
    let saved = h.cursor().load().expect("full sync saves a cursor");

    h.recorder.clear();
    h.store.update_file(&file.id, prose("a revised", 5));
    let stats = sync.incremental_sync(&cancel).await.unwrap();

    assert_eq!(h.recorder.links().first(), Some(&Some(saved.token.clone())));
    assert_eq!(stats.files_updated, 1);
    assert_eq!(stats.files_processed, 1);
    assert!(stats.cursor_saved);
    assert_ne!(h.cursor().load().unwrap().token, saved.token);
}

#[tokio::test]
async fn failed_download_does_not_stop_the_run() {
    let h = Harness::new();
    let files: Vec<_> = (0..5)
        .map(|i| h.store.add_file(h.store.root_id(), &format!("doc{}.txt", i), prose(&i.to_string(), 3)))
        .collect();
    h.store.fail_download(&files[2].id);

    let stats = h.orchestrator().full_sync(&CancellationToken::new()).await.unwrap();

    assert_eq!(stats.files_processed, 4);
    assert!(stats.errors >= 1);
    assert!(stats.aborted.is_none());
    assert!(h.index.records_for_file(&files[2].id).is_empty());
    assert!(!h.index.records_for_file(&files[4].id).is_empty());
}

#[tokio::test]
async fn access_denied_on_one_file_is_a_per_file_error() {
    let h = Harness::new();
    let a = h.store.add_file(h.store.root_id(), "a.txt", prose("a", 3));
    let b = h.store.add_file(h.store.root_id(), "b.txt", prose("b", 3));
    let c = h.store.add_file(h.store.root_id(), "c.txt", prose("c", 3));
    h.store
        .fail_download_with(&b.id, ProviderError::from_status(403, "accessDenied"));
    let sync = h.orchestrator();
    let cancel = CancellationToken::new();

    let stats = sync.full_sync(&cancel).await.unwrap();

    assert_eq!(stats.files_processed, 2);
    assert_eq!(stats.errors, 1);
    assert!(stats.aborted.is_none());
    assert!(stats.cursor_saved);
    assert!(!h.index.records_for_file(&a.id).is_empty());
    assert!(h.index.records_for_file(&b.id).is_empty());
    assert!(!h.index.records_for_file(&c.id).is_empty());

    h.store.update_file(&b.id, prose("b2", 3));
    h.store.update_file(&c.id, prose("c2", 3));
    let stats = sync.incremental_sync(&cancel).await.unwrap();
    assert_eq!(stats.files_updated, 1);
    assert_eq!(stats.errors, 1);
    assert!(stats.cursor_saved);
}

#[tokio::test]
async fn run_failing_mid_way_keeps_the_manifest_of_indexed_files() {
    let h = Harness::new();
    let a = h.store.add_file(h.store.root_id(), "a.txt", prose("a", 3));
    let b = h.store.add_file(h.store.root_id(), "b.txt", prose("b", 3));
    h.store.add_file(h.store.root_id(), "c.txt", prose("c", 3));
    h.store
        .fail_download_with(&b.id, ProviderError::Auth("token revoked".into()));

    let result = h.orchestrator().full_sync(&CancellationToken::new()).await;

    assert!(matches!(result, Err(SyncError::Auth(_))));
    assert!(!h.index.records_for_file(&a.id).is_empty());
    let manifest = Manifest::load(h.tmp.path().join("manifest.json"));
    assert_eq!(
        manifest.get(&a.id).map(|e| e.chunks as usize),
        Some(h.index.records_for_file(&a.id).len())
    );
    assert!(h.cursor().load().is_none());
}

#[tokio::test]
async fn failed_upsert_does_not_stop_the_run() {
    let h = Harness::new();
    let a = h.store.add_file(h.store.root_id(), "a.txt", prose("a", 3));
    let b = h.store.add_file(h.store.root_id(), "b.txt", prose("b", 3));
    let c = h.store.add_file(h.store.root_id(), "c.txt", prose("c", 3));
    let index = Arc::new(FailingIndex::new(h.index.clone()));
    index.reject_upserts(&b.id);
    let providers = Providers {
        index: index.clone(),
        ..h.providers()
    };

    let stats = h
        .orchestrator_from(providers, h.settings())
        .full_sync(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(stats.files_processed, 2);
    assert_eq!(stats.errors, 1);
    assert!(stats.cursor_saved);
    assert!(h.index.records_for_file(&b.id).is_empty());
    assert!(!h.index.records_for_file(&c.id).is_empty());
    let manifest = Manifest::load(h.tmp.path().join("manifest.json"));
    assert!(manifest.get(&a.id).is_some());
    assert!(manifest.get(&b.id).is_none());
    assert!(manifest.get(&c.id).is_some());
}

#[tokio::test]
async fn failed_embedding_does_not_stop_the_run() {
    let h = Harness::new();
    let a = h.store.add_file(h.store.root_id(), "a.txt", prose("a", 3));
    let b = h.store.add_file(
        h.store.root_id(),
        "b.txt",
        format!("{} UNEMBEDDABLE", prose("b", 1)),
    );
    let c = h.store.add_file(h.store.root_id(), "c.txt", prose("c", 3));
    let providers = Providers {
        embedder: Arc::new(FailingEmbedder::new("UNEMBEDDABLE")),
        ..h.providers()
    };

    let stats = h
        .orchestrator_from(providers, h.settings())
        .full_sync(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(stats.files_processed, 2);
    assert_eq!(stats.errors, 1);
    assert!(!h.index.records_for_file(&a.id).is_empty());
    assert!(h.index.records_for_file(&b.id).is_empty());
    assert!(!h.index.records_for_file(&c.id).is_empty());
    let manifest = Manifest::load(h.tmp.path().join("manifest.json"));
    assert!(manifest.get(&b.id).is_none());
}

#[tokio::test]
async fn failed_stale_tail_delete_keeps_the_old_chunk_count() {
    let h = Harness::new();
    let a = h.store.add_file(h.store.root_id(), "a.txt", prose("a", 30));
    let index = Arc::new(FailingIndex::new(h.index.clone()));
    let providers = Providers {
        index: index.clone(),
        ..h.providers()
    };
    let sync = h.orchestrator_from(providers, h.settings());
    let cancel = CancellationToken::new();
    let manifest_path = h.tmp.path().join("manifest.json");

    sync.full_sync(&cancel).await.unwrap();
    let long = h.index.records_for_file(&a.id).len();
    assert!(long > 2);
    assert_eq!(
        Manifest::load(&manifest_path).get(&a.id).unwrap().chunks as usize,
        long
    );

    h.store.update_file(&a.id, prose("a", 2));
    index.reject_deletes(true);
    let stats = sync.full_sync(&cancel).await.unwrap();

    assert_eq!(stats.errors, 1);
    assert_eq!(stats.files_processed, 1);
    assert_eq!(h.index.records_for_file(&a.id).len(), long);
    assert_eq!(
        Manifest::load(&manifest_path).get(&a.id).unwrap().chunks as usize,
        long
    );

    index.reject_deletes(false);
    let stats = sync.full_sync(&cancel).await.unwrap();

    assert_eq!(stats.errors, 0);
    let short = h.index.records_for_file(&a.id).len();
    assert!(short < long);
    assert_eq!(stats.vectors_deleted as usize, long - short);
    assert_eq!(
        Manifest::load(&manifest_path).get(&a.id).unwrap().chunks as usize,
        short
    );
}

#[tokio::test]
async fn repeated_full_syncs_overwrite_in_place() {
    let h = Harness::new();
    h.store.add_file(h.store.root_id(), "a.txt", prose("a", 8));
    h.store.add_file(h.store.root_id(), "b.txt", prose("b", 2));
    let sync = h.orchestrator();
    let cancel = CancellationToken::new();

    sync.full_sync(&cancel).await.unwrap();
    let first: Vec<_> = h.index.ids().into_iter().map(|id| h.index.get(&id).unwrap()).collect();

    sync.full_sync(&cancel).await.unwrap();
    let second: Vec<_> = h.index.ids().into_iter().map(|id| h.index.get(&id).unwrap()).collect();

    assert_eq!(first.len(), second.len());
    for (x, y) in first.iter().zip(&second) {
        assert_eq!(x.id, y.id);
        assert_eq!(x.metadata.text, y.metadata.text);
        assert_eq!(x.values, y.values);
    }
}

#[tokio::test]
async fn deleted_files_keep_their_vectors_when_pruning_is_off() {
    let h = Harness::new();
    let file = h.store.add_file(h.store.root_id(), "old.txt", prose("old", 4));
    let sync = h.orchestrator_with(SyncSettings {
        prune_deleted: false,
        ..h.settings()
    });
    let cancel = CancellationToken::new();
    sync.full_sync(&cancel).await.unwrap();
    let before = h.index.records_for_file(&file.id).len();

    h.store.delete_file(&file.id);
    let stats = sync.incremental_sync(&cancel).await.unwrap();

    assert_eq!(stats.files_deleted, 1);
    assert_eq!(stats.vectors_deleted, 0);
    assert_eq!(h.index.records_for_file(&file.id).len(), before);
    let hits = h
        .index
        .query(&common::hash_vector("x"), 10, Some(&MetadataFilter::source_file(&file.id)))
        .await
        .unwrap();
    assert_eq!(hits.len(), before);
}

#[tokio::test]
async fn deleted_files_lose_their_vectors_when_pruning_is_on() {
    let h = Harness::new();
    let gone = h.store.add_file(h.store.root_id(), "gone.txt", prose("gone", 6));
    let kept = h.store.add_file(h.store.root_id(), "kept.txt", prose("kept", 2));
    let sync = h.orchestrator();
    let cancel = CancellationToken::new();
    sync.full_sync(&cancel).await.unwrap();
    let owned = h.index.records_for_file(&gone.id).len() as u64;

    h.store.delete_file(&gone.id);
    let stats = sync.incremental_sync(&cancel).await.unwrap();

    assert_eq!(stats.files_deleted, 1);
    assert_eq!(stats.vectors_deleted, owned);
    assert!(h.index.records_for_file(&gone.id).is_empty());
    assert!(!h.index.records_for_file(&kept.id).is_empty());

    let manifest = Manifest::load(h.tmp.path().join("manifest.json"));
    assert!(manifest.get(&gone.id).is_none());
    assert!(manifest.get(&kept.id).is_some());
}

#[tokio::test]
async fn full_sync_sweeps_files_missing_from_the_listing() {
    let h = Harness::new();
    let gone = h.store.add_file(h.store.root_id(), "gone.txt", prose("gone", 3));
    h.store.add_file(h.store.root_id(), "kept.txt", prose("kept", 3));
    let sync = h.orchestrator();
    let cancel = CancellationToken::new();
    sync.full_sync(&cancel).await.unwrap();

    h.store.delete_file(&gone.id);
    let stats = sync.full_sync(&cancel).await.unwrap();

    assert_eq!(stats.files_processed, 1);
    assert_eq!(stats.files_deleted, 1);
    assert!(h.index.records_for_file(&gone.id).is_empty());
}

#[tokio::test]
async fn short_file_is_skipped_not_counted_as_error() {
    let h = Harness::new();
    h.store.add_file(h.store.root_id(), "a.pdf", "x".repeat(600));
    h.store.add_file(h.store.root_id(), "b.pdf", "0123456789");

    let stats = h.orchestrator().full_sync(&CancellationToken::new()).await.unwrap();

    assert_eq!(stats.files_processed, 1);
    assert!(stats.chunks_created >= 1);
    assert_eq!(stats.vectors_uploaded, stats.chunks_created);
    assert_eq!(stats.errors, 0);
    assert_eq!(stats.files_skipped, 1);
}

#[tokio::test]
async fn expired_cursor_leaves_the_stored_cursor_alone() {
    let h = Harness::new();
    h.store.add_file(h.store.root_id(), "a.txt", prose("a", 3));
    let sync = h.orchestrator();
    let cancel = CancellationToken::new();
    sync.full_sync(&cancel).await.unwrap();
    let saved = h.cursor().load().unwrap();

    h.store.expire_cursors();
    let stats = sync.incremental_sync(&cancel).await.unwrap();

    assert!(stats.errors >= 1);
    assert!(stats.aborted.is_some());
    assert!(!stats.cursor_saved);
    assert_eq!(h.cursor().load().unwrap(), saved);
}

#[tokio::test]
async fn edits_during_a_full_sync_are_replayed_next_time() {
    let h = Harness::new();
    let first = h.store.add_file(h.store.root_id(), "first.txt", prose("first", 3));
    let second = h.store.add_file(h.store.root_id(), "second.txt", prose("second", 3));
    h.store.defer_on_download(
        &first.id,
        Mutation::Update {
            file_id: second.id.clone(),
            content: prose("second, edited mid-run", 4).into_bytes(),
        },
    );
    let sync = h.orchestrator();
    let cancel = CancellationToken::new();

    sync.full_sync(&cancel).await.unwrap();
    let stats = sync.incremental_sync(&cancel).await.unwrap();

    assert_eq!(stats.files_updated, 1);
    let records = h.index.records_for_file(&second.id);
    assert!(records[0].metadata.text.contains("edited mid-run"));
}

#[tokio::test]
async fn incremental_without_cursor_reads_the_whole_feed() {
    let h = Harness::new();
    h.store.add_file(h.store.root_id(), "a.txt", prose("a", 3));
    h.store.add_file(h.store.root_id(), "b.txt", prose("b", 3));

    let stats = h
        .orchestrator()
        .incremental_sync(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(h.recorder.links().first(), Some(&None));
    assert_eq!(stats.files_processed, 2);
    assert!(stats.cursor_saved);
    assert!(h.cursor().load().is_some());
}

#[tokio::test]
async fn feed_without_terminal_cursor_does_not_advance() {
    let h = Harness::new();
    let file = h.store.add_file(h.store.root_id(), "a.txt", prose("a", 3));
    let sync = h.orchestrator();
    let cancel = CancellationToken::new();
    sync.full_sync(&cancel).await.unwrap();
    let saved = h.cursor().load().unwrap();

    h.store.update_file(&file.id, prose("a changed", 3));
    h.store.truncate_feed(true);
    let stats = sync.incremental_sync(&cancel).await.unwrap();

    assert_eq!(stats.files_updated, 1);
    assert!(!stats.cursor_saved);
    assert_eq!(h.cursor().load().unwrap(), saved);
}

#[tokio::test]
async fn listing_failure_aborts_without_a_cursor() {
    let h = Harness::new();
    h.store.add_file(h.store.root_id(), "a.txt", prose("a", 3));
    h.store.fail_listing(Some(ProviderError::Server {
        status: 503,
        message: "unavailable".into(),
    }));

    let stats = h.orchestrator().full_sync(&CancellationToken::new()).await.unwrap();

    assert_eq!(stats.errors, 1);
    assert!(stats.aborted.as_deref().unwrap().contains("listing"));
    assert_eq!(stats.files_processed, 0);
    assert!(h.cursor().load().is_none());
    assert!(h.index.is_empty());
}

#[tokio::test]
async fn rejected_credentials_fail_the_run() {
    let h = Harness::new();
    h.store.add_file(h.store.root_id(), "a.txt", prose("a", 3));
    h.store.reject_credentials(Some("AADSTS7000215: invalid client secret"));

    let result = h.orchestrator().full_sync(&CancellationToken::new()).await;

    assert!(matches!(result, Err(SyncError::Auth(_))));
    assert_eq!(h.store.download_count(), 0);
    assert!(h.cursor().load().is_none());
}

#[tokio::test]
async fn paging_is_followed_for_listings_and_the_feed() {
    let h = Harness::new();
    h.store.set_page_size(2);
    let sub = h.store.add_folder(h.store.root_id(), "Sub");
    for i in 0..5 {
        h.store.add_file(h.store.root_id(), &format!("r{}.txt", i), prose("r", 2));
        h.store.add_file(&sub.id, &format!("s{}.txt", i), prose("s", 2));
    }
    let sync = h.orchestrator();
    let cancel = CancellationToken::new();

    let stats = sync.full_sync(&cancel).await.unwrap();
    assert_eq!(stats.files_processed, 10);

    h.cursor().clear().unwrap();
    let stats = sync.incremental_sync(&cancel).await.unwrap();
    assert_eq!(stats.files_processed, 10);
    assert!(h.recorder.links().len() > 2);
}
