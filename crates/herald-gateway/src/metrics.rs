use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;

/// Process-wide counters. Lock-free; safe to bump from any task.
#[derive(Debug, Default)]
pub struct Metrics {
    active: AtomicUsize,
    total: AtomicU64,
    events: AtomicU64,
    bytes: AtomicU64,
    errors: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub connections: usize,
    pub total_connections: u64,
    pub events: u64,
    pub bytes: u64,
    pub errors: u64,
}

impl Metrics {
    /// Reserve one connection slot. Returns the new count, or the current
    /// count when already at `max`.
    pub fn try_acquire_slot(&self, max: usize) -> Result<usize, usize> {
        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            })
            .map(|prev| prev + 1)
    }

    pub fn release_slot(&self) {
        let _ = self
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub fn record_connection(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_event(&self) {
        self.events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bytes(&self, n: usize) {
        self.bytes.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections: self.active(),
            total_connections: self.total.load(Ordering::Relaxed),
            events: self.events.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}
