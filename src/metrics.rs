// ═══════════════════════════════════════════════════════════════
// METRICS COLLECTOR - How many potholes, how many duplicates
// ═══════════════════════════════════════════════════════════════
//
// Atomic counters, one per pipeline outcome. Relaxed ordering everywhere:
// these are for humans looking at a dashboard, not for synchronization.
// Served as JSON on /metrics next to the classifier breaker state.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::circuit_breaker::CircuitBreakerSnapshot;

#[derive(Debug, Serialize, Clone)]
pub struct MetricsSnapshot {
    pub submissions: u64,
    pub issues_created: u64,
    pub issues_merged: u64,
    pub auto_upvotes: u64,
    pub spam_rejections: u64,
    pub no_authority_rejections: u64,
    pub validation_rejections: u64,
    pub persistence_failures: u64,
    pub classifier_fallbacks: u64,
    pub spam_check_degraded: u64,
    pub notifications_dispatched: u64,
    pub uptime_seconds: u64,
    pub classifier_breaker: CircuitBreakerSnapshot,
    pub status: String,
}

pub struct IntakeMetrics {
    submissions: AtomicU64,
    created: AtomicU64,
    merged: AtomicU64,
    auto_upvotes: AtomicU64,
    spam_rejections: AtomicU64,
    no_authority: AtomicU64,
    validation_rejections: AtomicU64,
    persistence_failures: AtomicU64,
    classifier_fallbacks: AtomicU64,
    spam_check_degraded: AtomicU64,
    notifications: AtomicU64,
    start_time: Instant,
}

impl Default for IntakeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl IntakeMetrics {
    pub fn new() -> Self {
        Self {
            submissions: AtomicU64::new(0),
            created: AtomicU64::new(0),
            merged: AtomicU64::new(0),
            auto_upvotes: AtomicU64::new(0),
            spam_rejections: AtomicU64::new(0),
            no_authority: AtomicU64::new(0),
            validation_rejections: AtomicU64::new(0),
            persistence_failures: AtomicU64::new(0),
            classifier_fallbacks: AtomicU64::new(0),
            spam_check_degraded: AtomicU64::new(0),
            notifications: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn increment_submissions(&self) {
        self.submissions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_created(&self) {
        self.created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_merged(&self, auto_upvoted: bool) {
        self.merged.fetch_add(1, Ordering::Relaxed);
        if auto_upvoted {
            self.auto_upvotes.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn increment_spam_rejections(&self) {
        self.spam_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_no_authority(&self) {
        self.no_authority.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_validation_rejections(&self) {
        self.validation_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_persistence_failures(&self) {
        self.persistence_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_classifier_fallbacks(&self, count: u64) {
        self.classifier_fallbacks.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_spam_check_degraded(&self) {
        self.spam_check_degraded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_notifications(&self) {
        self.notifications.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, classifier_breaker: CircuitBreakerSnapshot) -> MetricsSnapshot {
        MetricsSnapshot {
            submissions: self.submissions.load(Ordering::Relaxed),
            issues_created: self.created.load(Ordering::Relaxed),
            issues_merged: self.merged.load(Ordering::Relaxed),
            auto_upvotes: self.auto_upvotes.load(Ordering::Relaxed),
            spam_rejections: self.spam_rejections.load(Ordering::Relaxed),
            no_authority_rejections: self.no_authority.load(Ordering::Relaxed),
            validation_rejections: self.validation_rejections.load(Ordering::Relaxed),
            persistence_failures: self.persistence_failures.load(Ordering::Relaxed),
            classifier_fallbacks: self.classifier_fallbacks.load(Ordering::Relaxed),
            spam_check_degraded: self.spam_check_degraded.load(Ordering::Relaxed),
            notifications_dispatched: self.notifications.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            classifier_breaker,
            status: "operational".to_string(),
        }
    }
}
