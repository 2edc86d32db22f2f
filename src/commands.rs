//! CLI command implementations. Results go to stdout as `key: value`
//! lines; logs go to stderr.

use anyhow::{bail, Result};
use docsync_core::models::SyncStats;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::app;
use crate::config::Config;
use crate::cursor::CursorStore;
use crate::scheduler::Scheduler;
use crate::search;
use crate::server;

pub async fn run_sync(config: &Config, full: bool) -> Result<()> {
    let cancel = CancellationToken::new();
    let service = app::build_service(config, cancel.clone()).await?;

    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let stats = if full {
        service.run_full_sync().await?
    } else {
        service.run_incremental_sync().await?
    };
    print_stats(&stats);
    if let Some(reason) = &stats.aborted {
        bail!("sync aborted: {}", reason);
    }
    Ok(())
}

pub fn print_stats(stats: &SyncStats) {
    println!("kind: {}", stats.kind);
    println!("files_processed: {}", stats.files_processed);
    println!("files_updated: {}", stats.files_updated);
    println!("files_deleted: {}", stats.files_deleted);
    println!("files_skipped: {}", stats.files_skipped);
    println!("chunks_created: {}", stats.chunks_created);
    println!("vectors_uploaded: {}", stats.vectors_uploaded);
    println!("vectors_deleted: {}", stats.vectors_deleted);
    println!("errors: {}", stats.errors);
    println!("cursor_saved: {}", stats.cursor_saved);
    if let Some(finished) = stats.finished_at {
        let secs = (finished - stats.started_at).num_milliseconds() as f64 / 1000.0;
        println!("duration_secs: {:.1}", secs);
    }
}

pub async fn run_list(config: &Config) -> Result<()> {
    let providers = app::build_providers(config).await?;
    let orchestrator = app::orchestrator(config, providers);
    orchestrator.connect().await?;
    let files = orchestrator.list_files(&CancellationToken::new()).await?;

    println!("{:<12} {:<40} PATH", "SIZE", "ID");
    for file in &files {
        println!("{:<12} {:<40} {}", file.size, file.id, file.path);
    }
    println!("total: {}", files.len());
    Ok(())
}

pub async fn run_status(config: &Config) -> Result<()> {
    let service = app::build_service(config, CancellationToken::new()).await?;
    let status = service.status().await;
    println!("connected: {}", status.connected);
    if let Some(err) = &status.connection_error {
        println!("connection_error: {}", err);
    }
    println!("has_cursor: {}", status.has_cursor);
    if let Some(at) = status.cursor_captured_at {
        println!("cursor_captured_at: {}", at.to_rfc3339());
    }
    Ok(())
}

pub fn run_cursor_show(config: &Config) -> Result<()> {
    let store = CursorStore::new(config.state.cursor_path());
    println!("path: {}", store.path().display());
    match store.load() {
        Some(cursor) => {
            println!("has_cursor: true");
            println!("captured_at: {}", cursor.captured_at.to_rfc3339());
            println!("delta_link: {}", cursor.token);
        }
        None => println!("has_cursor: false"),
    }
    Ok(())
}

pub fn run_cursor_reset(config: &Config) -> Result<()> {
    let store = CursorStore::new(config.state.cursor_path());
    let removed = store.clear()?;
    println!("removed: {}", removed);
    if removed {
        info!("cursor cleared; the next scheduled run will be a full sync");
    }
    Ok(())
}

pub async fn run_search(config: &Config, query: &str, k: usize, file_id: Option<&str>) -> Result<()> {
    let providers = app::build_providers(config).await?;
    let retry = crate::retry::RetryPolicy::from_config(&config.retry);
    let matches = search::search(&providers, &retry, query, k, file_id).await?;

    if matches.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (rank, m) in matches.iter().enumerate() {
        println!(
            "{}. [{:.3}] {} (chunk {})",
            rank + 1,
            m.score,
            m.metadata.filename,
            m.metadata.chunk_index
        );
        if !m.metadata.web_url.is_empty() {
            println!("    url: {}", m.metadata.web_url);
        }
        let snippet: String = m.metadata.text.chars().take(200).collect();
        println!("    {}", snippet.replace('\n', " "));
    }
    Ok(())
}

/// Control surface plus, when enabled, the background scheduler. Both stop
/// on Ctrl-C.
pub async fn run_serve(config: &Config) -> Result<()> {
    let shutdown = CancellationToken::new();
    let service = app::build_service(config, shutdown.clone()).await?;

    let scheduler = if config.scheduler.enabled {
        let scheduler = Scheduler::from_config(service.clone(), &config.scheduler);
        let token = shutdown.clone();
        Some(tokio::spawn(async move { scheduler.run(token).await }))
    } else {
        info!("scheduler disabled; syncs run only when triggered");
        None
    };

    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutting down");
            signal.cancel();
        }
    });

    server::run_server(&config.server.bind, service, shutdown.clone()).await?;
    shutdown.cancel();
    if let Some(handle) = scheduler {
        let _ = handle.await;
    }
    Ok(())
}
