//! # Public Event Surface
//!
//! Purpose: Define the events a `Manager` publishes to its subscribers
//! (§6) — both locally-caused events and those replayed from a remote
//! backplane notification.

use meshcache_handle::RemoveReason;

/// Whether an event was caused by a direct API call on this node, or by
/// a backplane notification relayed from another node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Local,
    Remote,
}

/// An event published on the manager's event bus.
#[derive(Debug, Clone)]
pub enum ManagerEvent<K, V> {
    Add { key: K, origin: Origin },
    Clear { origin: Origin },
    Get { key: K, origin: Origin },
    Put { key: K, origin: Origin },
    Remove { key: K, origin: Origin },
    Update { key: K, origin: Origin },
    /// Fired when a handle removed an item on its own initiative
    /// (expiration, eviction, external delete). `level` is the handle's
    /// index in the manager's list plus one.
    RemoveByHandle {
        key: K,
        reason: RemoveReason,
        level: usize,
        value: Option<V>,
    },
}
