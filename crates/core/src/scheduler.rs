//! Periodic reconciliation with failure-streak escalation.
//!
//! [`ReloadScheduler::start`] reconciles once on the caller's task, then
//! spawns a background loop that reconciles every
//! [`SchedulerConfig::interval`]. Background failures are recorded, never
//! propagated. When failures continue for at least
//! [`SchedulerConfig::grace_period`], a [`FatalError`] is latched; consumers
//! observe it through [`ReloadScheduler::check_fatal`].

use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::engine::ExecutionEngine;
use crate::error::{FatalError, HostError};
use crate::host::Host;
use crate::reload::{ReloadResult, SchedulerConfig};

/// Snapshot of the scheduler's bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct ReloadStatus {
    /// Last reconciliation attempt that succeeded.
    pub last_checked_at: Option<DateTime<Utc>>,
    /// Last successful reconciliation that changed the unit set.
    pub last_changed_at: Option<DateTime<Utc>>,
    pub last_result: Option<ReloadResult>,
    pub last_error_at: Option<DateTime<Utc>>,
    /// Display text of the most recent failure.
    pub last_error: Option<String>,
    /// Start of the current unbroken failure streak; cleared on success.
    pub first_error_at: Option<DateTime<Utc>>,
}

/// Shared between the scheduler handle and its background loop.
struct SchedulerState {
    grace_period: Duration,
    status: Mutex<ReloadStatus>,
    /// Monotonic twin of `first_error_at`, used for streak arithmetic.
    streak_started: Mutex<Option<Instant>>,
    fatal: OnceLock<FatalError>,
}

impl SchedulerState {
    fn new(grace_period: Duration) -> Self {
        Self {
            grace_period,
            status: Mutex::new(ReloadStatus::default()),
            streak_started: Mutex::new(None),
            fatal: OnceLock::new(),
        }
    }

    fn record_success(&self, result: &ReloadResult) {
        let mut status = lock(&self.status);
        status.last_checked_at = Some(result.occurred_at);
        if result.changed {
            status.last_changed_at = Some(result.occurred_at);
        }
        status.last_result = Some(result.clone());
        status.first_error_at = None;
        *lock(&self.streak_started) = None;
    }

    fn record_failure(&self, err: &HostError, now: Instant, now_utc: DateTime<Utc>) {
        let detail = err.to_string();
        {
            let mut status = lock(&self.status);
            status.last_error_at = Some(now_utc);
            status.last_error = Some(detail.clone());
            status.first_error_at.get_or_insert(now_utc);
        }
        let started = *lock(&self.streak_started).get_or_insert(now);
        tracing::error!(error = %detail, "Scheduled reload failed");

        if self.grace_period.is_zero() || self.fatal.get().is_some() {
            return;
        }
        let streak = now.saturating_duration_since(started);
        if streak >= self.grace_period {
            let fatal = FatalError {
                streak,
                grace: self.grace_period,
                last_error: detail,
            };
            tracing::error!(
                streak_ms = streak.as_millis() as u64,
                grace_ms = self.grace_period.as_millis() as u64,
                "Grace period exceeded; latching fatal error",
            );
            let _ = self.fatal.set(fatal);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Drives periodic reconciliation of one [`Host`].
///
/// Closing the scheduler stops the timer but leaves the host alive; release
/// the host separately afterwards.
pub struct ReloadScheduler<E: ExecutionEngine> {
    host: Arc<Host<E>>,
    config: SchedulerConfig,
    state: Arc<SchedulerState>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<E: ExecutionEngine> ReloadScheduler<E> {
    pub fn new(host: Arc<Host<E>>, config: SchedulerConfig) -> Self {
        Self {
            host,
            state: Arc::new(SchedulerState::new(config.grace_period)),
            config,
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// Reconcile once on the calling task, then arm the periodic timer.
    ///
    /// A failing first reconciliation is recorded and returned, and the
    /// timer is not armed. Calling `start` again re-runs the synchronous
    /// reconciliation without arming a second timer.
    pub async fn start(&self) -> Result<ReloadResult, HostError> {
        let result = match self.host.reconcile().await {
            Ok(result) => {
                self.state.record_success(&result);
                result
            }
            Err(err) => {
                self.state.record_failure(&err, Instant::now(), Utc::now());
                return Err(err);
            }
        };

        let mut task = lock(&self.task);
        if task.is_some() || self.cancel.is_cancelled() {
            return Ok(result);
        }
        if self.config.interval.is_zero() {
            tracing::warn!("Reload interval is zero; periodic reconciliation disabled");
            return Ok(result);
        }

        let host = Arc::clone(&self.host);
        let state = Arc::clone(&self.state);
        let cancel = self.cancel.clone();
        let interval = self.config.interval;
        *task = Some(tokio::spawn(async move {
            run_loop(host, state, interval, cancel).await;
        }));

        tracing::info!(
            interval_ms = self.config.interval.as_millis() as u64,
            grace_ms = self.config.grace_period.as_millis() as u64,
            "Reload scheduler started",
        );
        Ok(result)
    }

    /// Return the latched fatal error, if the grace period was exceeded.
    pub fn check_fatal(&self) -> Result<(), FatalError> {
        match self.state.fatal.get() {
            Some(fatal) => Err(fatal.clone()),
            None => Ok(()),
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.state.fatal.get().is_some()
    }

    pub fn status(&self) -> ReloadStatus {
        lock(&self.state.status).clone()
    }

    pub fn host(&self) -> &Arc<Host<E>> {
        &self.host
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Stop the periodic timer and wait for an in-flight tick to finish.
    ///
    /// Does not release the host.
    pub async fn close(&self) {
        self.cancel.cancel();
        let handle = lock(&self.task).take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl<E: ExecutionEngine> Drop for ReloadScheduler<E> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Background loop: one reconciliation per tick until cancelled.
async fn run_loop<E: ExecutionEngine>(
    host: Arc<Host<E>>,
    state: Arc<SchedulerState>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Reload scheduler stopping");
                break;
            }
            _ = ticker.tick() => {
                match host.reconcile().await {
                    Ok(result) => state.record_success(&result),
                    Err(err) => state.record_failure(&err, Instant::now(), Utc::now()),
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
