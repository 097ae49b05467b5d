use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Live counters of queue service activity
#[derive(Debug, Default)]
pub struct LiveMetrics {
    queues_registered: AtomicU64,
    queues_deregistered: AtomicU64,
    beans_submitted: AtomicU64,
    queues_killed: AtomicU64,
    commands_sent: AtomicU64,
}

impl LiveMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_registered(&self) {
        self.queues_registered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_deregistered(&self) {
        self.queues_deregistered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_submitted(&self) {
        self.beans_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_killed(&self) {
        self.queues_killed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_commands(&self) {
        self.commands_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Active queues currently registered, as far as these counters know
    pub fn live_active_queues(&self) -> u64 {
        let snapshot = self.snapshot();
        snapshot
            .queues_registered
            .saturating_sub(snapshot.queues_deregistered)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queues_registered: self.queues_registered.load(Ordering::Relaxed),
            queues_deregistered: self.queues_deregistered.load(Ordering::Relaxed),
            beans_submitted: self.beans_submitted.load(Ordering::Relaxed),
            queues_killed: self.queues_killed.load(Ordering::Relaxed),
            commands_sent: self.commands_sent.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`LiveMetrics`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub queues_registered: u64,
    pub queues_deregistered: u64,
    pub beans_submitted: u64,
    pub queues_killed: u64,
    pub commands_sent: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = LiveMetrics::new();
        metrics.increment_registered();
        metrics.increment_registered();
        metrics.increment_deregistered();
        metrics.increment_submitted();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.queues_registered, 2);
        assert_eq!(snapshot.beans_submitted, 1);
        assert_eq!(metrics.live_active_queues(), 1);
    }
}
