//! # Backplane Contract
//!
//! Purpose: Define the cross-node notification channel a manager uses to
//! fan out invalidations (§4.4) plus a reference in-process implementation
//! for multi-manager tests and small single-process deployments.
//!
//! ## Design Principles
//!
//! 1. **Best-Effort, At-Most-Once**: the backplane makes no delivery
//!    guarantee beyond "probably got there"; a manager that needs strict
//!    consistency shouldn't rely on this contract alone.
//! 2. **No User Code Under Locks**: delivery happens on whatever thread the
//!    transport hands the event to; implementations keep their own
//!    critical sections to queue bookkeeping, never manager callbacks.
//! 3. **Broadcast, Not Point-to-Point**: every subscriber sees every event;
//!    there's no addressing or routing concept here, matching the
//!    coordinator's single-logical-cache model.

use meshcache_common::CacheResult;
use tokio::sync::broadcast;

/// The kind of local write that produced a `Changed` notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeAction {
    Add,
    Put,
    Update,
}

/// An event delivered to backplane subscribers.
#[derive(Debug, Clone)]
pub enum BackplaneEvent<K> {
    Changed { key: K, action: ChangeAction },
    Removed { key: K },
    Cleared,
}

/// Cross-node notification channel (§4.4). Delivery is best-effort,
/// at-most-once per local call, and unordered across keys.
pub trait Backplane<K>: Send + Sync
where
    K: Clone + Send + Sync,
{
    fn notify_change(&self, key: K, action: ChangeAction) -> CacheResult<()>;
    fn notify_remove(&self, key: K) -> CacheResult<()>;
    fn notify_clear(&self) -> CacheResult<()>;

    /// Subscribes to this backplane's event stream. Each call returns an
    /// independent receiver; a manager subscribes exactly once at
    /// construction.
    fn subscribe(&self) -> broadcast::Receiver<BackplaneEvent<K>>;

    /// Releases any resources this backplane holds. A `Manager`'s Dispose
    /// (§5) calls this once, after every handle has been disposed.
    /// Defaults to a no-op since the base contract holds no resource
    /// beyond the channel itself, which is released when its last `Arc`
    /// reference drops.
    fn dispose(&self) -> CacheResult<()> {
        Ok(())
    }
}

/// Default channel capacity; a lagging subscriber drops the oldest
/// buffered events rather than blocking publishers, which is the
/// at-most-once contract in practice.
const DEFAULT_CAPACITY: usize = 1024;

/// Reference `Backplane` built on `tokio::sync::broadcast`, suitable for
/// same-process multi-manager tests and small single-process
/// multi-"node" simulations.
pub struct ChannelBackplane<K> {
    sender: broadcast::Sender<BackplaneEvent<K>>,
}

impl<K> ChannelBackplane<K>
where
    K: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        ChannelBackplane { sender }
    }

    fn publish(&self, event: BackplaneEvent<K>) {
        // `send` only errors when there are no subscribers; that's a
        // normal state for a backplane nobody has wired a manager to yet,
        // not a failure worth surfacing.
        if self.sender.send(event).is_err() {
            tracing::trace!("backplane publish had no subscribers");
        }
    }
}

impl<K> Default for ChannelBackplane<K>
where
    K: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> Backplane<K> for ChannelBackplane<K>
where
    K: Clone + Send + Sync + 'static,
{
    fn notify_change(&self, key: K, action: ChangeAction) -> CacheResult<()> {
        self.publish(BackplaneEvent::Changed { key, action });
        Ok(())
    }

    fn notify_remove(&self, key: K) -> CacheResult<()> {
        self.publish(BackplaneEvent::Removed { key });
        Ok(())
    }

    fn notify_clear(&self) -> CacheResult<()> {
        self.publish(BackplaneEvent::Cleared);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<BackplaneEvent<K>> {
        self.sender.subscribe()
    }
}
