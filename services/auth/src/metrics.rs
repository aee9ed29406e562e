//! Operational counters for credential operations and notification delivery

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counters shared by every request handler
#[derive(Debug, Default)]
pub struct Metrics {
    user_creations: AtomicU64,
    password_resets: AtomicU64,
    password_changes: AtomicU64,
    tokens_generated: AtomicU64,
    tokens_used: AtomicU64,
    tokens_expired: AtomicU64,
    tokens_invalidated: AtomicU64,
    notifications_sent: AtomicU64,
    notifications_failed: AtomicU64,
}

/// Point-in-time copy of the counters plus derived delivery rates
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub user_creations: u64,
    pub password_resets: u64,
    pub password_changes: u64,
    pub tokens_generated: u64,
    pub tokens_used: u64,
    pub tokens_expired: u64,
    pub tokens_invalidated: u64,
    pub notifications_sent: u64,
    pub notifications_failed: u64,
    pub notification_success_rate: f64,
    pub notification_failure_rate: f64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_user_creation(&self) {
        bump(&self.user_creations);
    }

    pub fn record_password_reset(&self) {
        bump(&self.password_resets);
    }

    pub fn record_password_change(&self) {
        bump(&self.password_changes);
    }

    pub fn record_token_generated(&self) {
        bump(&self.tokens_generated);
    }

    pub fn record_token_used(&self) {
        bump(&self.tokens_used);
    }

    pub fn record_token_expired(&self) {
        bump(&self.tokens_expired);
    }

    pub fn record_token_invalidated(&self) {
        bump(&self.tokens_invalidated);
    }

    pub fn record_notification_sent(&self) {
        bump(&self.notifications_sent);
    }

    pub fn record_notification_failed(&self) {
        bump(&self.notifications_failed);
    }

    /// Rates are computed from the same loads as the counts they are
    /// reported with. With no deliveries yet the success rate is 1.0.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);

        let sent = load(&self.notifications_sent);
        let failed = load(&self.notifications_failed);
        let total = sent + failed;
        let (success_rate, failure_rate) = if total == 0 {
            (1.0, 0.0)
        } else {
            let success = sent as f64 / total as f64;
            (success, 1.0 - success)
        };

        MetricsSnapshot {
            user_creations: load(&self.user_creations),
            password_resets: load(&self.password_resets),
            password_changes: load(&self.password_changes),
            tokens_generated: load(&self.tokens_generated),
            tokens_used: load(&self.tokens_used),
            tokens_expired: load(&self.tokens_expired),
            tokens_invalidated: load(&self.tokens_invalidated),
            notifications_sent: sent,
            notifications_failed: failed,
            notification_success_rate: success_rate,
            notification_failure_rate: failure_rate,
        }
    }
}
