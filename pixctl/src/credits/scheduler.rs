//! Daily batch reset. Sweeps every account whose window has elapsed so that
//! users who never make a request still get their allotment back.

use super::{policy, service::CreditService};
use crate::{
    config::SchedulerConfig,
    errors::{Error, Result},
    types::UserId,
};
use chrono::{DateTime, Days, NaiveTime, Utc};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Outcome of one batch run
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResetSummary {
    pub total_candidates: usize,
    pub reset_count: usize,
    /// Candidates a concurrent lazy reset had already handled
    pub skipped_count: usize,
    pub error_count: usize,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct JobStatus {
    pub running: bool,
    pub scheduled: bool,
    pub next_execution: Option<DateTime<Utc>>,
    pub last_run: Option<BatchResetSummary>,
}

/// Clears the running flag when a run ends, however it ends
struct RunGuard {
    running: Arc<AtomicBool>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

/// First instant strictly after `now` at the UTC time of day `run_at`
pub fn next_run_after(now: DateTime<Utc>, run_at: NaiveTime) -> DateTime<Utc> {
    let today = now.date_naive().and_time(run_at).and_utc();
    if today > now {
        today
    } else {
        now.date_naive()
            .checked_add_days(Days::new(1))
            .map(|tomorrow| tomorrow.and_time(run_at).and_utc())
            .unwrap_or(today)
    }
}

/// Single-instance batch reset job. At most one run is in flight per process.
pub struct ResetScheduler {
    service: CreditService,
    settings: SchedulerConfig,
    running: Arc<AtomicBool>,
    daemon_active: AtomicBool,
    last_run: RwLock<Option<BatchResetSummary>>,
}

impl ResetScheduler {
    pub fn new(service: CreditService, settings: SchedulerConfig) -> Self {
        Self {
            service,
            settings,
            running: Arc::new(AtomicBool::new(false)),
            daemon_active: AtomicBool::new(false),
            last_run: RwLock::new(None),
        }
    }

    fn try_start(&self) -> Option<RunGuard> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard {
                running: self.running.clone(),
            })
    }

    /// Timer-triggered run. Overlapping with a run in progress is a logged no-op.
    pub async fn run_scheduled(&self) -> Option<BatchResetSummary> {
        let Some(_guard) = self.try_start() else {
            info!("Credit reset job is already running, skipping scheduled run");
            return None;
        };

        match self.run_batch().await {
            Ok(summary) => Some(summary),
            Err(e) => {
                error!("Scheduled credit reset failed: {}", e);
                None
            }
        }
    }

    /// Admin-triggered run. Fails with `JobAlreadyRunning` if a run is in progress.
    ///
    /// The sweep runs on its own task and completes even if the caller stops
    /// waiting for it.
    pub async fn run_manual(self: &Arc<Self>) -> Result<BatchResetSummary> {
        let Some(guard) = self.try_start() else {
            return Err(Error::JobAlreadyRunning);
        };
        info!("Manual credit reset triggered");

        let scheduler = self.clone();
        let run = tokio::spawn(async move {
            let _guard = guard;
            scheduler.run_batch().await
        });
        run.await.map_err(|e| Error::Internal {
            operation: format!("run the credit reset job ({e})"),
        })?
    }

    #[instrument(skip(self))]
    async fn run_batch(&self) -> Result<BatchResetSummary> {
        let started = Instant::now();
        let timestamp = self.service.now();
        let candidates = self
            .service
            .store()
            .list_reset_candidates(policy::reset_cutoff(timestamp))
            .await?;

        info!("Starting credit reset for {} candidate accounts", candidates.len());

        let mut summary = BatchResetSummary {
            total_candidates: candidates.len(),
            reset_count: 0,
            skipped_count: 0,
            error_count: 0,
            timestamp,
            duration_ms: 0,
        };

        for user_id in candidates {
            match self.reset_one(user_id).await {
                Ok(true) => summary.reset_count += 1,
                Ok(false) => summary.skipped_count += 1,
                Err(message) => {
                    warn!("Failed to reset credits for user {}: {}", user_id, message);
                    summary.error_count += 1;
                }
            }
        }

        summary.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            total = summary.total_candidates,
            reset = summary.reset_count,
            skipped = summary.skipped_count,
            errors = summary.error_count,
            duration_ms = summary.duration_ms,
            "Credit reset completed"
        );

        *self.last_run.write().await = Some(summary.clone());
        Ok(summary)
    }

    /// `Ok(true)` when a reset was applied, `Ok(false)` when it was no longer due
    async fn reset_one(&self, user_id: UserId) -> std::result::Result<bool, String> {
        match tokio::time::timeout(self.settings.per_user_timeout, self.service.reset_credits(user_id)).await {
            Ok(Ok(outcome)) => Ok(outcome.was_applied()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("timed out after {:?}", self.settings.per_user_timeout)),
        }
    }

    pub async fn status(&self) -> JobStatus {
        let scheduled = self.daemon_active.load(Ordering::Acquire);
        JobStatus {
            running: self.running.load(Ordering::Acquire),
            scheduled,
            next_execution: scheduled.then(|| next_run_after(self.service.now(), self.settings.run_at)),
            last_run: self.last_run.read().await.clone(),
        }
    }

    /// Fire `run_scheduled` every day at the configured UTC time until `shutdown` is cancelled.
    pub async fn run_daemon(self: Arc<Self>, shutdown: CancellationToken) {
        self.daemon_active.store(true, Ordering::Release);
        info!("Credit reset scheduler started, runs daily at {} UTC", self.settings.run_at);

        loop {
            let now = self.service.now();
            let next = next_run_after(now, self.settings.run_at);
            let wait = (next - now).to_std().unwrap_or_default();
            debug!("Next credit reset at {}", next);

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(wait) => {
                    self.run_scheduled().await;
                }
            }
        }

        self.daemon_active.store(false, Ordering::Release);
        info!("Credit reset scheduler stopped");
    }
}
