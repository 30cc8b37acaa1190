//! # Handle Contract
//!
//! Purpose: Define the single-layer store contract every cache tier
//! implements, plus the expiration-resolution rule every implementer
//! must apply before storing an item (§4.2).
//!
//! ## Design Principles
//!
//! 1. **One Interface, Many Backends**: A handle is a capability bundle,
//!    not a base class; third-party backends (Redis, Memcached, a
//!    distributed store) implement the same trait the in-memory
//!    reference handle does.
//! 2. **Expiration Resolution Lives Once**: `resolve_expiration` is a
//!    free function so every handle gets the same defaulting rule
//!    instead of reimplementing it.
//! 3. **Events Over Callbacks Into the Caller's Lock**: cache-specific
//!    removes are delivered through a listener list the handle owns;
//!    callers never get a raw function pointer to unsubscribe by
//!    identity, they drop the whole handle to stop listening.

use std::hash::Hash;
use std::sync::Arc;

use meshcache_common::{CacheError, CacheItem, CacheResult, ExpirationMode, HandleConfiguration, UpdateResult};

/// Why the handle itself decided to drop an item, as distinct from a
/// user-invoked `remove`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveReason {
    /// The item's expiration deadline passed.
    Expired,
    /// The backend evicted the item under memory/capacity pressure.
    Evicted,
    /// An external actor (another process sharing the backend) deleted
    /// the key out from under this handle.
    ExternalDelete,
}

/// Event fired when a handle removes an item on its own initiative.
///
/// `level` starts at `0` when a handle fires this internally; the
/// manager overwrites it with the handle's index + 1 when it re-emits
/// the event as `OnRemoveByHandle` (§4.2, §4.5.8).
#[derive(Debug, Clone)]
pub struct CacheSpecificRemoveEvent<K, V> {
    pub key: K,
    pub reason: RemoveReason,
    pub value: Option<V>,
    pub level: usize,
}

/// A subscriber to a handle's cache-specific-remove event.
pub type RemoveListener<K, V> = Arc<dyn Fn(CacheSpecificRemoveEvent<K, V>) + Send + Sync>;

/// A factory applied to the current value during `update`; returning
/// `None` aborts the update with `FactoryReturnedNull`.
pub type UpdateFactory<'a, V> = dyn Fn(&V) -> Option<V> + 'a;

/// Single-layer store contract (§4.2).
pub trait Handle<K, V>: Send + Sync
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    fn config(&self) -> &HandleConfiguration;

    /// Distributed handles already observed their own writes on their
    /// backend; the manager's backplane sync predicate (§4.5.9) uses
    /// this to avoid re-invalidating a source that doesn't need it.
    fn is_distributed_cache(&self) -> bool {
        false
    }

    fn add(&self, item: CacheItem<K, V>) -> CacheResult<bool>;
    fn get(&self, key: &K) -> CacheResult<Option<CacheItem<K, V>>>;
    fn put(&self, item: CacheItem<K, V>) -> CacheResult<()>;
    fn remove(&self, key: &K) -> CacheResult<bool>;
    fn clear(&self) -> CacheResult<()>;
    fn exists(&self, key: &K) -> CacheResult<bool>;
    fn count(&self) -> CacheResult<usize>;

    /// Reads the current value, applies `factory`, and writes the result
    /// back. `max_retries` is accepted so distributed handles can
    /// implement optimistic retry; the in-memory reference handle
    /// serialises instead and always converges on the first attempt.
    fn update(
        &self,
        key: &K,
        factory: &UpdateFactory<'_, V>,
        max_retries: u32,
    ) -> CacheResult<UpdateResult<K, V>>;

    /// Registers a listener for this handle's cache-specific-remove
    /// event. The manager calls this once per handle at construction
    /// time, closing over the handle's index.
    fn on_cache_specific_remove(&self, listener: RemoveListener<K, V>);

    fn stats(&self) -> &meshcache_common::Stats;

    /// Releases this handle's resources: cancels its eviction scanner (if
    /// one is running) and releases its update-serialization mutex before
    /// returning (§5). Idempotent. Every other method on a disposed
    /// handle returns `CacheError::Disposed` unconditionally, without
    /// attempting the operation.
    fn dispose(&self) -> CacheResult<()>;
}

/// Applies the expiration-resolution rule of §4.2 before a handle stores
/// an item:
///
/// - If the item opts out of defaults (`uses_expiration_defaults` is
///   false and its mode isn't `Default`), its own mode/timeout wins
///   unchanged.
/// - Otherwise, if the handle has a configured default mode other than
///   `Default`, that default wins and the item is marked as using
///   defaults.
/// - Otherwise the item falls back to `None`/zero.
///
/// Returns `InvariantViolation` if the resolved mode is non-`None`/
/// `Default` with a zero timeout.
pub fn resolve_expiration<K, V>(
    item: &CacheItem<K, V>,
    config: &HandleConfiguration,
) -> CacheResult<CacheItem<K, V>>
where
    K: Clone,
    V: Clone,
{
    let opts_out = !item.uses_expiration_defaults() && item.expiration_mode() != ExpirationMode::Default;

    let resolved = if opts_out {
        item.with_expiration(item.expiration_mode(), item.expiration_timeout(), item.uses_expiration_defaults())?
    } else if config.expiration_mode != ExpirationMode::Default {
        item.with_expiration(config.expiration_mode, config.expiration_timeout, true)?
    } else {
        item.with_no_expiration()
    };

    let mode = resolved.expiration_mode();
    if mode != ExpirationMode::None && mode != ExpirationMode::Default && resolved.expiration_timeout().is_zero() {
        return Err(CacheError::invariant_violation(
            "resolved expiration mode requires a non-zero timeout",
        ));
    }

    Ok(resolved)
}
