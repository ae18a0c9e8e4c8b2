//! Server request counters.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters updated by connection tasks.
#[derive(Debug, Default)]
pub struct ServerStats {
    connections: AtomicU64,
    active_connections: AtomicU64,
    adds: AtomicU64,
    adds_rejected: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    warm_hits: AtomicU64,
    warm_misses: AtomicU64,
}

impl ServerStats {
    pub(crate) fn connection_opened(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn record_add(&self, added: bool) {
        let counter = if added { &self.adds } else { &self.adds_rejected };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_get(&self, found: bool) {
        let counter = if found { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_warm(&self, present: bool) {
        let counter = if present {
            &self.warm_hits
        } else {
            &self.warm_misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Captures the counters together with storage figures.
    pub fn snapshot(&self, entry_count: u64, size_bytes: u64) -> StatsSnapshot {
        StatsSnapshot {
            connections: self.connections.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            adds: self.adds.load(Ordering::Relaxed),
            adds_rejected: self.adds_rejected.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            warm_hits: self.warm_hits.load(Ordering::Relaxed),
            warm_misses: self.warm_misses.load(Ordering::Relaxed),
            entry_count,
            size_bytes,
        }
    }
}

/// Point-in-time copy of [`ServerStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub connections: u64,
    pub active_connections: u64,
    pub adds: u64,
    pub adds_rejected: u64,
    pub hits: u64,
    pub misses: u64,
    pub warm_hits: u64,
    pub warm_misses: u64,
    pub entry_count: u64,
    pub size_bytes: u64,
}

impl StatsSnapshot {
    /// Fraction of GET requests that found a value.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} entries ({}), {} connections ({} active), adds {} (rejected {}), \
             gets {} hit / {} miss ({:.1}%), warm {} hit / {} miss",
            self.entry_count,
            crate::config::format_size(self.size_bytes),
            self.connections,
            self.active_connections,
            self.adds,
            self.adds_rejected,
            self.hits,
            self.misses,
            self.hit_rate() * 100.0,
            self.warm_hits,
            self.warm_misses,
        )
    }
}
