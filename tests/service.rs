//! Single-flight guard and status reporting.

mod common;

use std::sync::Arc;

use common::{prose, wait_for, GatedStore, Harness};
use docsync::error::SyncError;
use docsync::service::{RunState, SyncService};
use docsync_core::models::SyncKind;
use docsync_core::source::DocumentStore;
use tokio_util::sync::CancellationToken;

fn gated_service(h: &Harness) -> (SyncService, Arc<GatedStore>) {
    let gated = Arc::new(GatedStore::new(h.store.clone()));
    let providers = docsync::sync::Providers {
        store: gated.clone() as Arc<dyn DocumentStore>,
        ..h.providers()
    };
    let orchestrator = h.orchestrator_from(providers, h.settings());
    (SyncService::new(orchestrator, CancellationToken::new()), gated)
}

#[tokio::test]
async fn only_one_run_at_a_time() {
    let h = Harness::new();
    h.store.add_file(h.store.root_id(), "a.txt", prose("a", 3));
    let (service, gated) = gated_service(&h);

    let run_id = service.start_full_sync().await.unwrap();
    assert!(!run_id.is_empty());
    assert!(matches!(
        service.start_incremental_sync().await,
        Err(SyncError::AlreadyRunning)
    ));

    let status = service.status().await;
    assert_eq!(status.state, RunState::Running);
    assert_eq!(status.running.as_ref().unwrap().run_id, run_id);

    gated.open();
    assert!(wait_for(|| !service.is_running()).await);

    let status = service.status().await;
    assert_eq!(status.state, RunState::Idle);
    assert!(status.connected);
    assert!(status.has_cursor);
    let last = status.last_run.unwrap();
    assert_eq!(last.run_id, run_id);
    assert_eq!(last.kind, SyncKind::Full);
    assert_eq!(last.stats.unwrap().files_processed, 1);
}

#[tokio::test]
async fn waiting_runs_queue_behind_the_guard() {
    let h = Harness::new();
    h.store.add_file(h.store.root_id(), "a.txt", prose("a", 3));
    let (service, gated) = gated_service(&h);

    service.start_full_sync().await.unwrap();
    let waiter = {
        let service = service.clone();
        tokio::spawn(async move { service.run_incremental_sync().await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(!waiter.is_finished());

    gated.open();
    let stats = waiter.await.unwrap().unwrap();
    assert_eq!(stats.kind, SyncKind::Incremental);
    assert_eq!(stats.errors, 0);
}

#[tokio::test]
async fn bad_credentials_are_reported_to_the_caller() {
    let h = Harness::new();
    h.store.reject_credentials(Some("invalid_client"));
    let service = SyncService::new(h.orchestrator(), CancellationToken::new());

    let err = service.start_full_sync().await.unwrap_err();
    assert!(matches!(err, SyncError::Auth(_)));
    assert_eq!(err.code(), "auth_failed");

    let status = service.status().await;
    assert!(!status.connected);
    assert_eq!(status.state, RunState::NeverRun);
    assert!(!service.is_running());
}
