// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Discovery counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Counters updated by the discovery coordinator.
#[derive(Debug)]
pub struct DiscoveryStats {
    /// Lookup rounds started.
    pub rounds: AtomicU64,

    /// Lookup sends completed, faulted ones included.
    pub lookups_sent: AtomicU64,

    /// Lookup sends that faulted.
    pub send_failures: AtomicU64,

    /// Replies accepted as the first locator.
    pub replies_accepted: AtomicU64,

    /// Replies merged into the known locator (new replica endpoints).
    pub replies_merged: AtomicU64,

    /// Replies rejected (instance, identity or protocol mismatch).
    pub replies_rejected: AtomicU64,

    /// Cached locators invalidated after a forwarding failure.
    pub invalidations: AtomicU64,

    /// Coordinator creation time.
    pub created: Instant,
}

impl DiscoveryStats {
    pub fn new() -> Self {
        Self {
            rounds: AtomicU64::new(0),
            lookups_sent: AtomicU64::new(0),
            send_failures: AtomicU64::new(0),
            replies_accepted: AtomicU64::new(0),
            replies_merged: AtomicU64::new(0),
            replies_rejected: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
            created: Instant::now(),
        }
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of current counters.
    pub fn snapshot(&self) -> DiscoveryStatsSnapshot {
        DiscoveryStatsSnapshot {
            rounds: self.rounds.load(Ordering::Relaxed),
            lookups_sent: self.lookups_sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            replies_accepted: self.replies_accepted.load(Ordering::Relaxed),
            replies_merged: self.replies_merged.load(Ordering::Relaxed),
            replies_rejected: self.replies_rejected.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            uptime_secs: self.created.elapsed().as_secs(),
        }
    }
}

impl Default for DiscoveryStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`DiscoveryStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryStatsSnapshot {
    pub rounds: u64,
    pub lookups_sent: u64,
    pub send_failures: u64,
    pub replies_accepted: u64,
    pub replies_merged: u64,
    pub replies_rejected: u64,
    pub invalidations: u64,
    pub uptime_secs: u64,
}

impl DiscoveryStatsSnapshot {
    /// Fraction of lookup sends that faulted.
    pub fn send_failure_ratio(&self) -> f64 {
        if self.lookups_sent == 0 {
            0.0
        } else {
            self.send_failures as f64 / self.lookups_sent as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot() {
        let stats = DiscoveryStats::new();
        DiscoveryStats::incr(&stats.lookups_sent);
        DiscoveryStats::incr(&stats.lookups_sent);
        DiscoveryStats::incr(&stats.send_failures);

        let snap = stats.snapshot();
        assert_eq!(snap.lookups_sent, 2);
        assert_eq!(snap.send_failures, 1);
        assert!((snap.send_failure_ratio() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_ratio_without_sends() {
        assert_eq!(DiscoveryStatsSnapshot::default().send_failure_ratio(), 0.0);
    }
}
