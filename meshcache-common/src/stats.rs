//! # Handle Statistics
//!
//! Per-handle counters, gated by an enable flag. Mirrors the
//! accumulator-pattern used for server metrics elsewhere in this
//! lineage: plain `AtomicU64` fields updated with `Ordering::Relaxed`
//! because counters only need eventual consistency with each other, not
//! cross-field ordering.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::update_result::UpdateResult;

/// Point-in-time snapshot of a handle's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub add_calls: u64,
    pub put_calls: u64,
    pub get_calls: u64,
    pub hits: u64,
    pub misses: u64,
    pub remove_calls: u64,
    pub clear_calls: u64,
    pub items: u64,
}

/// Thread-safe counters for a single handle.
///
/// All mutating methods are no-ops and all reads return `0` when
/// `enabled` is false, per §4.6.
pub struct Stats {
    enabled: AtomicBool,
    add_calls: AtomicU64,
    put_calls: AtomicU64,
    get_calls: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    remove_calls: AtomicU64,
    clear_calls: AtomicU64,
    items: AtomicU64,
}

impl Stats {
    pub fn new(enabled: bool) -> Self {
        Stats {
            enabled: AtomicBool::new(enabled),
            add_calls: AtomicU64::new(0),
            put_calls: AtomicU64::new(0),
            get_calls: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            remove_calls: AtomicU64::new(0),
            clear_calls: AtomicU64::new(0),
            items: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn on_add(&self) {
        if self.is_enabled() {
            self.add_calls.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn on_put(&self) {
        if self.is_enabled() {
            self.put_calls.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn on_get_hit(&self) {
        if self.is_enabled() {
            self.get_calls.fetch_add(1, Ordering::Relaxed);
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn on_get_miss(&self) {
        if self.is_enabled() {
            self.get_calls.fetch_add(1, Ordering::Relaxed);
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn on_remove(&self) {
        if self.is_enabled() {
            self.remove_calls.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn on_clear(&self) {
        if self.is_enabled() {
            self.clear_calls.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn item_inserted(&self) {
        if self.is_enabled() {
            self.items.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn item_removed(&self) {
        if self.is_enabled() {
            self.items.fetch_sub(1, Ordering::Relaxed);
        }
    }

    pub fn reset_items(&self) {
        if self.is_enabled() {
            self.items.store(0, Ordering::Relaxed);
        }
    }

    /// Updates are modelled as one logical put plus `tries` internal
    /// gets (§4.6, §9 open question): `tries` is added to both
    /// `get_calls` and `hits`, and `put_calls` is incremented once. This
    /// convention is preserved exactly as documented even though it
    /// looks like double counting, to keep hit-ratio reporting
    /// consistent with callers that predate this crate.
    pub fn on_update<K, V>(&self, result: &UpdateResult<K, V>) {
        if !self.is_enabled() {
            return;
        }
        let tries = u64::from(result.tries());
        self.get_calls.fetch_add(tries, Ordering::Relaxed);
        self.hits.fetch_add(tries, Ordering::Relaxed);
        self.put_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of all counters, or a zeroed snapshot when
    /// disabled.
    pub fn snapshot(&self) -> StatsSnapshot {
        if !self.is_enabled() {
            return StatsSnapshot::default();
        }
        StatsSnapshot {
            add_calls: self.add_calls.load(Ordering::Relaxed),
            put_calls: self.put_calls.load(Ordering::Relaxed),
            get_calls: self.get_calls.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            remove_calls: self.remove_calls.load(Ordering::Relaxed),
            clear_calls: self.clear_calls.load(Ordering::Relaxed),
            items: self.items.load(Ordering::Relaxed),
        }
    }
}

impl Default for Stats {
    fn default() -> Self {
        Stats::new(false)
    }
}
