//! Single-flight sync service.
//!
//! [`SyncService`] wraps the [`SyncOrchestrator`] with a run guard so that
//! manual triggers, the scheduler, and the CLI never run two syncs at once.
//!
//! - `start_*` return immediately: they fail with
//!   [`SyncError::AlreadyRunning`] if a run holds the guard, check the
//!   credentials, then spawn the run and hand back its id.
//! - `run_*` wait for the guard and run in the caller's task.
//!
//! The service also remembers the current and last run for [`status`].
//!
//! [`status`]: SyncService::status

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use docsync_core::models::{SyncKind, SyncStats};
use docsync_core::ProviderError;
use serde::Serialize;
use tokio::sync::{Mutex as RunGuard, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

use crate::error::SyncError;
use crate::sync::SyncOrchestrator;

pub type RunId = String;

#[derive(Debug, Clone, Serialize)]
pub struct RunInfo {
    pub run_id: RunId,
    pub kind: SyncKind,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LastRun {
    pub run_id: RunId,
    pub kind: SyncKind,
    pub finished_at: DateTime<Utc>,
    /// Present when the run produced stats.
    pub stats: Option<SyncStats>,
    /// Present when the run failed before producing stats.
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    NeverRun,
    Running,
    Idle,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_error: Option<String>,
    pub has_cursor: bool,
    pub cursor_captured_at: Option<DateTime<Utc>>,
    pub state: RunState,
    pub running: Option<RunInfo>,
    pub last_run: Option<LastRun>,
}

#[derive(Default)]
struct Activity {
    running: Option<RunInfo>,
    last_run: Option<LastRun>,
}

#[derive(Clone)]
pub struct SyncService {
    orchestrator: Arc<SyncOrchestrator>,
    guard: Arc<RunGuard<()>>,
    activity: Arc<Mutex<Activity>>,
    cancel: CancellationToken,
}

impl SyncService {
    /// `cancel` stops runs started by this service between files.
    pub fn new(orchestrator: SyncOrchestrator, cancel: CancellationToken) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            guard: Arc::new(RunGuard::new(())),
            activity: Arc::new(Mutex::new(Activity::default())),
            cancel,
        }
    }

    pub fn orchestrator(&self) -> &SyncOrchestrator {
        &self.orchestrator
    }

    pub fn has_cursor(&self) -> bool {
        self.orchestrator.cursor_store().load().is_some()
    }

    pub fn is_running(&self) -> bool {
        self.guard.try_lock().is_err()
    }

    pub async fn start_full_sync(&self) -> Result<RunId, SyncError> {
        self.start(SyncKind::Full).await
    }

    pub async fn start_incremental_sync(&self) -> Result<RunId, SyncError> {
        self.start(SyncKind::Incremental).await
    }

    pub async fn run_full_sync(&self) -> Result<SyncStats, SyncError> {
        self.run(SyncKind::Full).await
    }

    pub async fn run_incremental_sync(&self) -> Result<SyncStats, SyncError> {
        self.run(SyncKind::Incremental).await
    }

    async fn start(&self, kind: SyncKind) -> Result<RunId, SyncError> {
        let permit = self
            .guard
            .clone()
            .try_lock_owned()
            .map_err(|_| SyncError::AlreadyRunning)?;

        // Bad credentials are reported to the caller; other connection
        // problems are left to the run, which records them as aborted.
        match self.orchestrator.connect().await {
            Ok(()) => {}
            Err(ProviderError::Auth(msg)) => {
                warn!(kind = %kind, error = %msg, "sync not started: authentication failed");
                return Err(SyncError::Auth(msg));
            }
            Err(e) => warn!(kind = %kind, error = %e, "preflight connection check failed"),
        }

        let run_id = Uuid::new_v4().to_string();
        self.begin(&run_id, kind);
        let this = self.clone();
        let id = run_id.clone();
        tokio::spawn(async move {
            let _ = this.execute(permit, id, kind).await;
        });
        Ok(run_id)
    }

    async fn run(&self, kind: SyncKind) -> Result<SyncStats, SyncError> {
        let permit = self.guard.clone().lock_owned().await;
        let run_id = Uuid::new_v4().to_string();
        self.begin(&run_id, kind);
        self.execute(permit, run_id, kind).await
    }

    fn begin(&self, run_id: &str, kind: SyncKind) {
        self.activity().running = Some(RunInfo {
            run_id: run_id.to_string(),
            kind,
            started_at: Utc::now(),
        });
    }

    async fn execute(
        &self,
        _permit: OwnedMutexGuard<()>,
        run_id: RunId,
        kind: SyncKind,
    ) -> Result<SyncStats, SyncError> {
        let span = tracing::info_span!("sync", run_id = %run_id, kind = %kind);
        let result = async {
            match kind {
                SyncKind::Full => self.orchestrator.full_sync(&self.cancel).await,
                SyncKind::Incremental => self.orchestrator.incremental_sync(&self.cancel).await,
            }
        }
        .instrument(span)
        .await;

        let last_run = match &result {
            Ok(stats) => LastRun {
                run_id: run_id.clone(),
                kind,
                finished_at: Utc::now(),
                stats: Some(stats.clone()),
                error: None,
            },
            Err(e) => {
                error!(run_id = %run_id, kind = %kind, error = %e, "sync run failed");
                LastRun {
                    run_id: run_id.clone(),
                    kind,
                    finished_at: Utc::now(),
                    stats: None,
                    error: Some(e.to_string()),
                }
            }
        };

        let mut activity = self.activity();
        activity.running = None;
        activity.last_run = Some(last_run);
        drop(activity);

        if result.is_ok() {
            info!(run_id = %run_id, kind = %kind, "sync run complete");
        }
        result
    }

    /// Connection check, cursor presence, and current/last run.
    pub async fn status(&self) -> SyncStatus {
        let store = &self.orchestrator.providers().store;
        let timeout = self.orchestrator.retry_policy().call_timeout;
        let connection = match tokio::time::timeout(timeout, store.connect()).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(timeout)),
        };
        let cursor = self.orchestrator.cursor_store().load();

        let activity = self.activity();
        let state = match (&activity.running, &activity.last_run) {
            (Some(_), _) => RunState::Running,
            (None, Some(_)) => RunState::Idle,
            (None, None) => RunState::NeverRun,
        };
        SyncStatus {
            connected: connection.is_ok(),
            connection_error: connection.err().map(|e| e.to_string()),
            has_cursor: cursor.is_some(),
            cursor_captured_at: cursor.map(|c| c.captured_at),
            state,
            running: activity.running.clone(),
            last_run: activity.last_run.clone(),
        }
    }

    fn activity(&self) -> std::sync::MutexGuard<'_, Activity> {
        self.activity.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
