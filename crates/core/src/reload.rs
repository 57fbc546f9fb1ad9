//! Reconciliation outcome and scheduler configuration types.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default interval between background reconciliations (5 minutes).
pub const DEFAULT_RELOAD_INTERVAL: Duration = Duration::from_secs(300);

/// Outcome of one successful [`Host::reconcile`](crate::host::Host::reconcile).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReloadResult {
    /// Whether the live unit set changed (add, remove, or content replace).
    pub changed: bool,
    /// When the reconciliation completed.
    pub occurred_at: DateTime<Utc>,
    /// Freshness of the loaded data as reported by the source, if known.
    pub data_age: Option<DateTime<Utc>>,
    /// Host generation after the reconciliation.
    pub generation: u64,
}

/// Timing configuration for a [`ReloadScheduler`](crate::scheduler::ReloadScheduler).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Period of background reconciliations.
    pub interval: Duration,
    /// Continuous-failure duration after which a fatal error is latched.
    /// [`Duration::ZERO`] disables escalation.
    pub grace_period: Duration,
}

impl SchedulerConfig {
    /// Configuration without a grace period: failures are recorded but never fatal.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            grace_period: Duration::ZERO,
        }
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Whether failure streaks can escalate to a fatal error.
    pub fn escalates(&self) -> bool {
        !self.grace_period.is_zero()
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_RELOAD_INTERVAL)
    }
}
