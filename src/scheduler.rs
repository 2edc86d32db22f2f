//! Background sync loop.
//!
//! On startup the scheduler runs a full sync if no cursor exists yet, then
//! sleeps for the configured interval and syncs again, forever. Every tick
//! re-reads the cursor, so a full sync that failed to persist one is
//! retried at the next tick instead of being followed by incremental runs.
//!
//! Runs go through [`SyncService`], so a tick that lands while a manual run
//! is in progress waits for it to finish. Cancellation interrupts the sleep
//! immediately; a run in progress stops at the next file boundary when the
//! service shares the scheduler's token.

use std::time::Duration;

use docsync_core::models::SyncKind;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::SchedulerConfig;
use crate::error::SyncError;
use crate::service::SyncService;

pub struct Scheduler {
    service: SyncService,
    interval: Duration,
    initial_full_sync: bool,
}

impl Scheduler {
    pub fn new(service: SyncService, interval: Duration, initial_full_sync: bool) -> Self {
        Self {
            service,
            interval,
            initial_full_sync,
        }
    }

    pub fn from_config(service: SyncService, config: &SchedulerConfig) -> Self {
        Self::new(service, config.interval(), config.initial_full_sync)
    }

    /// Loop until `cancel` fires. Returns the number of runs attempted.
    pub async fn run(&self, cancel: CancellationToken) -> u64 {
        info!(interval_secs = self.interval.as_secs(), "scheduler started");
        let mut runs = 0u64;

        if !self.service.has_cursor() && self.initial_full_sync {
            self.tick(SyncKind::Full).await;
            runs += 1;
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }

            let kind = if self.service.has_cursor() || !self.initial_full_sync {
                SyncKind::Incremental
            } else {
                SyncKind::Full
            };
            self.tick(kind).await;
            runs += 1;

            if cancel.is_cancelled() {
                break;
            }
        }

        info!(runs, "scheduler stopped");
        runs
    }

    async fn tick(&self, kind: SyncKind) {
        let result = match kind {
            SyncKind::Full => self.service.run_full_sync().await,
            SyncKind::Incremental => self.service.run_incremental_sync().await,
        };
        match result {
            Ok(stats) if stats.aborted.is_some() => warn!(
                kind = %kind,
                reason = stats.aborted.as_deref().unwrap_or_default(),
                "scheduled sync aborted; retrying at the next tick"
            ),
            Ok(stats) => info!(
                kind = %kind,
                processed = stats.files_processed,
                deleted = stats.files_deleted,
                errors = stats.errors,
                "scheduled sync finished"
            ),
            Err(SyncError::Cancelled) => info!(kind = %kind, "scheduled sync cancelled"),
            Err(e) => error!(kind = %kind, error = %e, "scheduled sync failed; retrying at the next tick"),
        }
    }
}
