//! Auto-summary scheduler.
//!
//! Sweeps every user with an active `AUTO_SUMMARY` setting on a fixed
//! interval and runs the pipeline for those whose last summary is older
//! than their cadence. Users are processed concurrently and in isolation:
//! an error or panic in one user's run is recorded against that user and
//! never affects the sweep.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use digest_core::{
    defaults, AiConfig, AutoSummarySetting, Error, ErrorCode, Result, SummaryRequest, TimeRange,
};

use crate::pipeline::SummaryService;

/// Configuration for the auto-summary scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Seconds between sweeps.
    pub interval_secs: u64,
    /// Maximum users processed at once.
    pub max_concurrent_users: usize,
    /// Whether the background loop runs at all.
    pub enabled: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: defaults::SCHEDULER_INTERVAL_SECS,
            max_concurrent_users: defaults::SCHEDULER_MAX_CONCURRENT,
            enabled: true,
        }
    }
}

impl SchedulerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `AUTO_SUMMARY_ENABLED` | `true` | Enable/disable the background sweep |
    /// | `AUTO_SUMMARY_INTERVAL_SECS` | `3600` | Seconds between sweeps |
    /// | `AUTO_SUMMARY_MAX_CONCURRENT` | `4` | Users processed concurrently |
    pub fn from_env() -> Self {
        let enabled = std::env::var("AUTO_SUMMARY_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let interval_secs = std::env::var("AUTO_SUMMARY_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(defaults::SCHEDULER_INTERVAL_SECS);

        let max_concurrent_users = std::env::var("AUTO_SUMMARY_MAX_CONCURRENT")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults::SCHEDULER_MAX_CONCURRENT)
            .max(1);

        Self {
            interval_secs,
            max_concurrent_users,
            enabled,
        }
    }

    pub fn with_interval(mut self, secs: u64) -> Self {
        self.interval_secs = secs;
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent_users = max;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Aggregate outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, utoipa::ToSchema)]
pub struct SweepReport {
    /// Users with an active setting.
    pub considered: usize,
    /// Users not yet due, or with nothing to summarize.
    pub skipped: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Event emitted by the scheduler.
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    SchedulerStarted,
    SchedulerStopped,
    SweepStarted,
    UserSkipped { user_id: Uuid, reason: String },
    UserSucceeded { user_id: Uuid, note_id: Uuid },
    UserFailed { user_id: Uuid, error: String },
    SweepCompleted(SweepReport),
}

/// Handle for controlling a running scheduler.
pub struct SchedulerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<SchedulerEvent>,
    cancel: CancellationToken,
}

impl SchedulerHandle {
    /// Stop the loop and cancel any in-flight provider calls.
    pub async fn shutdown(&self) -> Result<()> {
        self.cancel.cancel();
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send shutdown signal".into()))?;
        Ok(())
    }

    pub fn events(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.event_rx.resubscribe()
    }
}

#[derive(Debug)]
enum UserOutcome {
    Skipped(String),
    Succeeded(Uuid),
    Failed(String),
}

/// Periodic per-user summary runner.
#[derive(Clone)]
pub struct AutoSummaryScheduler {
    service: Arc<SummaryService>,
    config: SchedulerConfig,
    event_tx: broadcast::Sender<SchedulerEvent>,
}

impl AutoSummaryScheduler {
    pub fn new(service: Arc<SummaryService>, config: SchedulerConfig) -> Self {
        let (event_tx, _) = broadcast::channel(defaults::SCHEDULER_EVENT_CAPACITY);
        Self {
            service,
            config,
            event_tx,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn events(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.event_tx.subscribe()
    }

    /// Start the background loop and return a handle for control.
    pub fn start(self) -> SchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();
        let cancel = CancellationToken::new();
        let loop_cancel = cancel.clone();

        tokio::spawn(async move {
            self.run(&mut shutdown_rx, loop_cancel).await;
        });

        SchedulerHandle {
            shutdown_tx,
            event_rx,
            cancel,
        }
    }

    #[instrument(skip(self, shutdown_rx, cancel))]
    async fn run(&self, shutdown_rx: &mut mpsc::Receiver<()>, cancel: CancellationToken) {
        if !self.config.enabled {
            info!("Auto-summary scheduler is disabled, not starting");
            return;
        }

        info!(
            interval_secs = self.config.interval_secs,
            max_concurrent = self.config.max_concurrent_users,
            "Auto-summary scheduler started"
        );
        let _ = self.event_tx.send(SchedulerEvent::SchedulerStarted);

        let interval = Duration::from_secs(self.config.interval_secs.max(1));
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Auto-summary scheduler received shutdown signal");
                    break;
                }
                _ = sleep(interval) => {}
            }

            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Auto-summary scheduler received shutdown signal during sweep");
                    cancel.cancel();
                    break;
                }
                _ = self.run_once(&cancel) => {}
            }
        }

        let _ = self.event_tx.send(SchedulerEvent::SchedulerStopped);
        info!("Auto-summary scheduler stopped");
    }

    /// Run a single sweep over all users with an active setting.
    pub async fn run_once(&self, cancel: &CancellationToken) -> SweepReport {
        let start = Instant::now();
        let _ = self.event_tx.send(SchedulerEvent::SweepStarted);
        let mut report = SweepReport::default();

        let config = match self.service.ai_config().await {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    subsystem = "jobs",
                    component = "scheduler",
                    error = %e,
                    "AI configuration unavailable, skipping auto-summary sweep"
                );
                let _ = self.event_tx.send(SchedulerEvent::SweepCompleted(report));
                return report;
            }
        };

        let users = match self.active_users().await {
            Ok(users) => users,
            Err(e) => {
                error!(
                    subsystem = "jobs",
                    component = "scheduler",
                    error = %e,
                    "Failed to list auto-summary settings"
                );
                let _ = self.event_tx.send(SchedulerEvent::SweepCompleted(report));
                return report;
            }
        };
        report.considered = users.len();

        let max_concurrent = self.config.max_concurrent_users.max(1);
        let mut tasks = JoinSet::new();
        for (user_id, setting) in users {
            if tasks.len() >= max_concurrent {
                self.collect_one(&mut tasks, &mut report).await;
            }
            let this = self.clone();
            let config = config.clone();
            let cancel = cancel.child_token();
            tasks.spawn(async move {
                let outcome = this.process_user(user_id, setting, &config, &cancel).await;
                (user_id, outcome)
            });
        }
        while !tasks.is_empty() {
            self.collect_one(&mut tasks, &mut report).await;
        }

        info!(
            subsystem = "jobs",
            component = "scheduler",
            considered = report.considered,
            skipped = report.skipped,
            succeeded = report.succeeded,
            failed = report.failed,
            duration_ms = start.elapsed().as_millis() as u64,
            "Auto-summary sweep completed"
        );
        let _ = self.event_tx.send(SchedulerEvent::SweepCompleted(report));
        report
    }

    async fn collect_one(
        &self,
        tasks: &mut JoinSet<(Uuid, UserOutcome)>,
        report: &mut SweepReport,
    ) {
        let Some(joined) = tasks.join_next().await else {
            return;
        };
        let (user_id, outcome) = match joined {
            Ok(pair) => pair,
            Err(e) => {
                error!(error = ?e, "Auto-summary task panicked");
                report.failed += 1;
                return;
            }
        };
        let event = match outcome {
            UserOutcome::Skipped(reason) => {
                report.skipped += 1;
                SchedulerEvent::UserSkipped { user_id, reason }
            }
            UserOutcome::Succeeded(note_id) => {
                report.succeeded += 1;
                SchedulerEvent::UserSucceeded { user_id, note_id }
            }
            UserOutcome::Failed(error) => {
                report.failed += 1;
                SchedulerEvent::UserFailed { user_id, error }
            }
        };
        let _ = self.event_tx.send(event);
    }

    async fn active_users(&self) -> Result<Vec<(Uuid, AutoSummarySetting)>> {
        let rows = self
            .service
            .settings()
            .list_user_settings(defaults::AUTO_SUMMARY_KEY)
            .await?;
        let mut users = Vec::with_capacity(rows.len());
        for row in rows {
            match serde_json::from_value::<AutoSummarySetting>(row.value) {
                Ok(setting) if setting.is_active() => users.push((row.user_id, setting)),
                Ok(_) => {}
                Err(e) => warn!(
                    subsystem = "jobs",
                    component = "scheduler",
                    user_id = %row.user_id,
                    error = %e,
                    "Ignoring unreadable auto-summary setting"
                ),
            }
        }
        Ok(users)
    }

    /// Run one user, containing errors and panics, and persist the outcome.
    async fn process_user(
        &self,
        user_id: Uuid,
        setting: AutoSummarySetting,
        config: &AiConfig,
        cancel: &CancellationToken,
    ) -> UserOutcome {
        let run = AssertUnwindSafe(self.run_user(user_id, &setting, config, cancel))
            .catch_unwind()
            .await;

        let outcome = match run {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) if e.code() == ErrorCode::NotFound => {
                UserOutcome::Skipped("no notes to summarize".to_string())
            }
            Ok(Err(e)) if e.code() == ErrorCode::Cancelled => {
                UserOutcome::Skipped("sweep cancelled".to_string())
            }
            Ok(Err(e)) => UserOutcome::Failed(e.to_string()),
            Err(_) => UserOutcome::Failed("auto-summary run panicked".to_string()),
        };

        match &outcome {
            UserOutcome::Skipped(reason) => {
                debug!(
                    subsystem = "jobs",
                    component = "scheduler",
                    user_id = %user_id,
                    reason = %reason,
                    "Auto-summary skipped"
                );
            }
            UserOutcome::Succeeded(note_id) => {
                let now = self.service.now();
                self.persist(user_id, |stored| {
                    stored.failure_count = 0;
                    stored.last_run_at = Some(now);
                })
                .await;
                info!(
                    subsystem = "jobs",
                    component = "scheduler",
                    user_id = %user_id,
                    note_id = %note_id,
                    "Auto-summary succeeded"
                );
            }
            UserOutcome::Failed(error) => {
                let failure_count = self
                    .persist(user_id, |stored| {
                        stored.failure_count = stored.failure_count.saturating_add(1);
                    })
                    .await
                    .map(|stored| stored.failure_count);
                warn!(
                    subsystem = "jobs",
                    component = "scheduler",
                    user_id = %user_id,
                    failure_count = ?failure_count,
                    error = %error,
                    "Auto-summary failed"
                );
            }
        }
        outcome
    }

    async fn run_user(
        &self,
        user_id: Uuid,
        setting: &AutoSummarySetting,
        config: &AiConfig,
        cancel: &CancellationToken,
    ) -> Result<UserOutcome> {
        let due_after = chrono::Duration::days(i64::from(setting.frequency_days));
        if let Some(last) = self.service.latest_summary_at(user_id).await? {
            let elapsed = self.service.now() - last;
            if elapsed < due_after {
                return Ok(UserOutcome::Skipped(format!(
                    "last summary {}h ago, cadence {}d",
                    elapsed.num_hours(),
                    setting.frequency_days
                )));
            }
        }

        let request = SummaryRequest::for_range(TimeRange::covering(setting.frequency_days));
        let generated = self
            .service
            .run_unthrottled(user_id, &request, config, cancel)
            .await?;
        Ok(UserOutcome::Succeeded(generated.note.id))
    }

    /// Apply `update` to the user's stored setting and write it back.
    ///
    /// The setting is re-read so edits made while the run was in flight
    /// survive; only the bookkeeping fields are touched. A setting removed
    /// meanwhile is left removed.
    async fn persist<F>(&self, user_id: Uuid, update: F) -> Option<AutoSummarySetting>
    where
        F: FnOnce(&mut AutoSummarySetting),
    {
        let settings = self.service.settings();
        let result: Result<Option<AutoSummarySetting>> = async {
            let Some(value) = settings
                .get_user_setting(user_id, defaults::AUTO_SUMMARY_KEY)
                .await?
                .filter(|v| !v.is_null())
            else {
                return Ok(None);
            };
            let mut stored: AutoSummarySetting = serde_json::from_value(value)?;
            update(&mut stored);
            settings
                .put_user_setting(
                    user_id,
                    defaults::AUTO_SUMMARY_KEY,
                    &serde_json::to_value(&stored)?,
                )
                .await?;
            Ok(Some(stored))
        }
        .await;

        match result {
            Ok(stored) => stored,
            Err(e) => {
                error!(
                    subsystem = "jobs",
                    component = "scheduler",
                    user_id = %user_id,
                    error = %e,
                    "Failed to persist auto-summary state"
                );
                None
            }
        }
    }
}
