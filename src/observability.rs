//! Coordinator counters

use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics handle for recording coordinator counters
#[derive(Debug, Default)]
pub struct Metrics {
    uploads_submitted: AtomicU64,
    uploads_coalesced: AtomicU64,
    uploads_failed: AtomicU64,
    uploads_cancelled: AtomicU64,
    deletions_requested: AtomicU64,
    deletions_completed: AtomicU64,
    deletions_failed: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upload_submitted(&self) {
        self.uploads_submitted.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "uploads_submitted", "Metric incremented");
    }

    pub fn upload_coalesced(&self) {
        self.uploads_coalesced.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "uploads_coalesced", "Metric incremented");
    }

    pub fn upload_failed(&self) {
        self.uploads_failed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "uploads_failed", "Metric incremented");
    }

    pub fn upload_cancelled(&self) {
        self.uploads_cancelled.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "uploads_cancelled", "Metric incremented");
    }

    pub fn deletion_requested(&self) {
        self.deletions_requested.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "deletions_requested", "Metric incremented");
    }

    pub fn deletion_completed(&self) {
        self.deletions_completed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "deletions_completed", "Metric incremented");
    }

    pub fn deletion_failed(&self) {
        self.deletions_failed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "deletions_failed", "Metric incremented");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uploads_submitted: self.uploads_submitted.load(Ordering::Relaxed),
            uploads_coalesced: self.uploads_coalesced.load(Ordering::Relaxed),
            uploads_failed: self.uploads_failed.load(Ordering::Relaxed),
            uploads_cancelled: self.uploads_cancelled.load(Ordering::Relaxed),
            deletions_requested: self.deletions_requested.load(Ordering::Relaxed),
            deletions_completed: self.deletions_completed.load(Ordering::Relaxed),
            deletions_failed: self.deletions_failed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub uploads_submitted: u64,
    pub uploads_coalesced: u64,
    pub uploads_failed: u64,
    pub uploads_cancelled: u64,
    pub deletions_requested: u64,
    pub deletions_completed: u64,
    pub deletions_failed: u64,
}
