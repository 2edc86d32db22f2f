//! HTTP control surface against a live listener.

mod common;

use std::sync::Arc;

use common::{prose, wait_for, GatedStore, Harness};
use docsync::server::router;
use docsync::service::SyncService;
use docsync_core::source::DocumentStore;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

async fn serve(service: SyncService) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(service)).await.unwrap();
    });
    format!("http://{}", addr)
}

fn gated(h: &Harness) -> (SyncService, Arc<GatedStore>) {
    let gated = Arc::new(GatedStore::new(h.store.clone()));
    let providers = docsync::sync::Providers {
        store: gated.clone() as Arc<dyn DocumentStore>,
        ..h.providers()
    };
    let service = SyncService::new(
        h.orchestrator_from(providers, h.settings()),
        CancellationToken::new(),
    );
    (service, gated)
}

#[tokio::test]
async fn health_reports_version() {
    let h = Harness::new();
    let base = serve(SyncService::new(h.orchestrator(), CancellationToken::new())).await;

    let body: Value = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn trigger_conflict_and_status() {
    let h = Harness::new();
    let file = h.store.add_file(h.store.root_id(), "proposal.txt", prose("proposal", 4));
    let (service, gate) = gated(&h);
    let base = serve(service.clone()).await;
    let client = reqwest::Client::new();

    let resp = client.post(format!("{}/sync/full", base)).send().await.unwrap();
    assert_eq!(resp.status(), 202);
    let started: Value = resp.json().await.unwrap();
    assert_eq!(started["status"], "started");
    let run_id = started["run_id"].as_str().unwrap().to_string();

    let resp = client
        .post(format!("{}/sync/incremental", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
    let err: Value = resp.json().await.unwrap();
    assert_eq!(err["error"]["code"], "already_running");

    let status: Value = client
        .get(format!("{}/sync/status", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["state"], "running");
    assert_eq!(status["running"]["run_id"], run_id.as_str());

    gate.open();
    assert!(wait_for(|| !service.is_running()).await);

    let status: Value = client
        .get(format!("{}/sync/status", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["state"], "idle");
    assert_eq!(status["connected"], true);
    assert_eq!(status["has_cursor"], true);
    assert_eq!(status["last_run"]["stats"]["files_processed"], 1);

    let results: Value = client
        .post(format!("{}/search", base))
        .json(&json!({ "query": "delivery approach", "k": 3, "file_id": file.id }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let results = results["results"].as_array().unwrap();
    assert!(!results.is_empty());
    assert!(results
        .iter()
        .all(|r| r["metadata"]["source_file_id"] == file.id.as_str()));
}

#[tokio::test]
async fn errors_use_the_error_envelope() {
    let h = Harness::new();
    h.store.reject_credentials(Some("invalid_client"));
    let base = serve(SyncService::new(h.orchestrator(), CancellationToken::new())).await;
    let client = reqwest::Client::new();

    let resp = client.post(format!("{}/sync/full", base)).send().await.unwrap();
    assert_eq!(resp.status(), 502);
    let err: Value = resp.json().await.unwrap();
    assert_eq!(err["error"]["code"], "auth_failed");

    let resp = client
        .post(format!("{}/search", base))
        .json(&json!({ "query": "   " }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let err: Value = resp.json().await.unwrap();
    assert_eq!(err["error"]["code"], "bad_request");
}
