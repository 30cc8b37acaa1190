//! # Manager Orchestration Core
//!
//! Purpose: Coordinate an ordered list of handles (fast-to-slow) behind a
//! single key/value interface, enforcing promotion-on-hit, eviction
//! propagation, backplane fan-in/fan-out, and retry-bounded update
//! semantics (§4.5, §4.6, §6).
//!
//! ## Design Principles
//!
//! 1. **Back Handle Is Authoritative**: `add` and `update` only ever touch
//!    index N-1; everything else is eviction to force re-promotion.
//! 2. **Put Fans Out, Get Walks**: `put` writes every handle in order and
//!    is not all-or-nothing; `get` stops at the first hit and promotes
//!    backwards (toward index 0).
//! 3. **Events After Effects**: local events fire only after every
//!    per-handle write and the backplane notification complete; remote
//!    events fire only after the local sync eviction/clear completes.
//! 4. **Weak Self-Reference**: the handle-remove and backplane listeners
//!    close over a `Weak<Inner>` rather than `Arc<Inner>` so the manager
//!    can be dropped without a reference cycle keeping it alive.

use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};

use tokio::sync::broadcast;

use meshcache_backplane::{Backplane, BackplaneEvent, ChangeAction};
use meshcache_common::{CacheError, CacheItem, CacheResult, ExpirationMode, ManagerConfiguration, UpdateMode, UpdateResult};
use meshcache_handle::{CacheSpecificRemoveEvent, Handle};

use crate::events::{ManagerEvent, Origin};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

struct Inner<K, V> {
    handles: Vec<Box<dyn Handle<K, V>>>,
    backplane: Option<Arc<dyn Backplane<K>>>,
    config: ManagerConfiguration,
    events: broadcast::Sender<ManagerEvent<K, V>>,
    disposed: AtomicBool,
}

impl<K, V> Inner<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn emit(&self, event: ManagerEvent<K, V>) {
        let _ = self.events.send(event);
    }

    fn back_index(&self) -> usize {
        self.handles.len() - 1
    }

    /// Returns `CacheError::Disposed` once `dispose` has been called.
    /// Raised unconditionally and never retried (§7).
    fn check_disposed(&self) -> CacheResult<()> {
        if self.disposed.load(Ordering::Acquire) {
            Err(CacheError::Disposed)
        } else {
            Ok(())
        }
    }

    /// Removes `key` from every handle except `except_index`. Aborts on
    /// the first handle error, matching the fan-out error policy used for
    /// `put` (§7).
    fn evict_except(&self, except_index: usize, key: &K) -> CacheResult<()> {
        for (index, handle) in self.handles.iter().enumerate() {
            if index == except_index {
                continue;
            }
            if let Err(err) = handle.remove(key) {
                tracing::error!(%err, index, "evict failed on handle, aborting remaining fan-out");
                return Err(err);
            }
        }
        Ok(())
    }

    fn should_sync(handle: &dyn Handle<K, V>, include_source: bool) -> bool {
        let is_source = handle.config().is_backplane_source;
        !is_source || (include_source && !handle.is_distributed_cache())
    }

    /// Listener registered on every handle's cache-specific-remove event
    /// at construction (§4.5.8). `index` is the firing handle's position.
    fn on_cache_specific_remove(&self, index: usize, event: CacheSpecificRemoveEvent<K, V>) {
        if matches!(self.config.update_mode, UpdateMode::Up | UpdateMode::Full) {
            for (j, handle) in self.handles.iter().enumerate() {
                if j < index {
                    if let Err(err) = handle.remove(&event.key) {
                        tracing::warn!(%err, "failed to evict key from upstream handle after cache-specific remove");
                    }
                }
            }
        }

        self.emit(ManagerEvent::RemoveByHandle {
            key: event.key,
            reason: event.reason,
            level: index + 1,
            value: event.value,
        });
    }

    /// Handler for a backplane-delivered event (§4.5.9). Never propagates
    /// an error; handle failures during sync are logged and swallowed so
    /// one bad local handle can't wedge the delivery thread.
    fn on_backplane_event(&self, event: BackplaneEvent<K>) {
        match event {
            BackplaneEvent::Changed { key, action } => {
                for handle in self.handles.iter().filter(|h| Self::should_sync(h.as_ref(), false)) {
                    if let Err(err) = handle.remove(&key) {
                        tracing::warn!(%err, "failed to sync remote change");
                    }
                }
                self.emit(match action {
                    ChangeAction::Add => ManagerEvent::Add { key, origin: Origin::Remote },
                    ChangeAction::Put => ManagerEvent::Put { key, origin: Origin::Remote },
                    ChangeAction::Update => ManagerEvent::Update { key, origin: Origin::Remote },
                });
            }
            BackplaneEvent::Removed { key } => {
                for handle in self.handles.iter().filter(|h| Self::should_sync(h.as_ref(), true)) {
                    if let Err(err) = handle.remove(&key) {
                        tracing::warn!(%err, "failed to sync remote remove");
                    }
                }
                self.emit(ManagerEvent::Remove { key, origin: Origin::Remote });
            }
            BackplaneEvent::Cleared => {
                for handle in self.handles.iter().filter(|h| Self::should_sync(h.as_ref(), true)) {
                    if let Err(err) = handle.clear() {
                        tracing::warn!(%err, "failed to sync remote clear");
                    }
                }
                self.emit(ManagerEvent::Clear { origin: Origin::Remote });
            }
        }
    }
}

/// Orchestrates an ordered list of handles behind one key/value interface.
pub struct Manager<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Clone for Manager<K, V> {
    fn clone(&self) -> Self {
        Manager {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> Manager<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Builds a manager over `handles` (index 0 = front/fastest, last =
    /// back/authoritative). Rejects an empty handle list, a handle with an
    /// empty name, or more than one handle declaring itself a backplane
    /// source.
    ///
    /// Constructing with `backplane = Some(..)` spawns a background task
    /// to drain its event stream, so this must be called from within a
    /// Tokio runtime in that case.
    pub fn new(
        config: ManagerConfiguration,
        handles: Vec<Box<dyn Handle<K, V>>>,
        backplane: Option<Arc<dyn Backplane<K>>>,
    ) -> CacheResult<Self> {
        if handles.is_empty() {
            return Err(CacheError::invariant_violation("manager requires at least one handle"));
        }

        if handles.iter().any(|h| h.config().name.is_empty()) {
            return Err(CacheError::invalid_argument("handle name must be non-empty"));
        }

        let backplane_sources = handles.iter().filter(|h| h.config().is_backplane_source).count();
        if backplane_sources > 1 {
            return Err(CacheError::invariant_violation(
                "at most one handle may declare itself a backplane source",
            ));
        }

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let inner = Arc::new(Inner {
            handles,
            backplane,
            config,
            events,
            disposed: AtomicBool::new(false),
        });

        for (index, handle) in inner.handles.iter().enumerate() {
            let weak: Weak<Inner<K, V>> = Arc::downgrade(&inner);
            handle.on_cache_specific_remove(Arc::new(move |event| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_cache_specific_remove(index, event);
                }
            }));
        }

        if let Some(backplane) = inner.backplane.clone() {
            let mut receiver = backplane.subscribe();
            let weak: Weak<Inner<K, V>> = Arc::downgrade(&inner);
            tokio::spawn(async move {
                loop {
                    match receiver.recv().await {
                        Ok(event) => {
                            let Some(inner) = weak.upgrade() else { break };
                            inner.on_backplane_event(event);
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "backplane receiver lagged, some events dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            });
        }

        Ok(Manager { inner })
    }

    /// Subscribes to this manager's event bus.
    pub fn subscribe(&self) -> broadcast::Receiver<ManagerEvent<K, V>> {
        self.inner.events.subscribe()
    }

    pub fn config(&self) -> &ManagerConfiguration {
        &self.inner.config
    }

    pub fn handle_count(&self) -> usize {
        self.inner.handles.len()
    }

    pub fn stats(&self, handle_index: usize) -> Option<&meshcache_common::Stats> {
        self.inner.handles.get(handle_index).map(|h| h.stats())
    }

    // ---- §4.5.1 Add ----

    /// Adds `key`/`value` if absent. Writes to the back handle only; on
    /// success evicts `key` from every other handle (they may hold a
    /// stale version) and notifies the backplane. Returns `false` without
    /// notification if the back handle already holds the key.
    pub fn add(&self, key: K, value: V) -> CacheResult<bool> {
        self.add_item(CacheItem::new(key, value))
    }

    pub fn add_item(&self, item: CacheItem<K, V>) -> CacheResult<bool> {
        self.inner.check_disposed()?;
        let back_index = self.inner.back_index();
        let key = item.key().clone();

        if !self.inner.handles[back_index].add(item)? {
            return Ok(false);
        }

        self.inner.evict_except(back_index, &key)?;
        if let Some(backplane) = &self.inner.backplane {
            if let Err(err) = backplane.notify_change(key.clone(), ChangeAction::Add) {
                tracing::warn!(%err, "backplane notify_change failed for add");
            }
        }
        self.inner.emit(ManagerEvent::Add { key, origin: Origin::Local });
        Ok(true)
    }

    // ---- §4.5.2 Put ----

    /// Writes `key`/`value` to every handle in order. Never fails to
    /// write the back handle's worth of truth, but a handle error aborts
    /// the remaining fan-out (put is not all-or-nothing, §7).
    pub fn put(&self, key: K, value: V) -> CacheResult<()> {
        self.put_item(CacheItem::new(key, value))
    }

    pub fn put_item(&self, item: CacheItem<K, V>) -> CacheResult<()> {
        self.inner.check_disposed()?;
        let key = item.key().clone();
        for (index, handle) in self.inner.handles.iter().enumerate() {
            if let Err(err) = handle.put(item.clone()) {
                tracing::error!(%err, index, "put failed on handle, aborting remaining fan-out");
                return Err(err);
            }
        }

        if let Some(backplane) = &self.inner.backplane {
            if let Err(err) = backplane.notify_change(key.clone(), ChangeAction::Put) {
                tracing::warn!(%err, "backplane notify_change failed for put");
            }
        }
        self.inner.emit(ManagerEvent::Put { key, origin: Origin::Local });
        Ok(())
    }

    // ---- §4.5.3 Get ----

    /// Convenience accessor: returns `NotFound` when the key is absent on
    /// every handle.
    pub fn get(&self, key: &K) -> CacheResult<V> {
        self.get_cache_item(key)?.map(CacheItem::into_value).ok_or(CacheError::NotFound)
    }

    /// Walks handles front to back. On a hit at index `i`, promotes the
    /// item into every handle with index < i before returning it.
    pub fn get_cache_item(&self, key: &K) -> CacheResult<Option<CacheItem<K, V>>> {
        self.inner.check_disposed()?;
        for (index, handle) in self.inner.handles.iter().enumerate() {
            match handle.get(key) {
                Ok(Some(item)) => {
                    for upstream in self.inner.handles.iter().take(index) {
                        if let Err(err) = upstream.put(item.clone()) {
                            tracing::warn!(%err, "promotion put failed on upstream handle");
                        }
                    }
                    self.inner.emit(ManagerEvent::Get {
                        key: key.clone(),
                        origin: Origin::Local,
                    });
                    return Ok(Some(item));
                }
                Ok(None) => continue,
                // Disposed is raised unconditionally, never swallowed as a
                // miss (§7); every other handle error during Get is logged
                // and treated as a miss so the walk continues.
                Err(err @ CacheError::Disposed) => return Err(err),
                Err(err) => {
                    tracing::warn!(%err, index, "get failed on handle, treating as miss");
                    continue;
                }
            }
        }
        Ok(None)
    }

    pub fn exists(&self, key: &K) -> CacheResult<bool> {
        Ok(self.get_cache_item(key)?.is_some())
    }

    // ---- §4.5.4 Remove ----

    /// Removes `key` from every handle. Notifies the backplane and fires
    /// `OnRemove` once if any handle actually held the key.
    pub fn remove(&self, key: &K) -> CacheResult<bool> {
        self.inner.check_disposed()?;
        let mut any_removed = false;
        for handle in self.inner.handles.iter() {
            if handle.remove(key)? {
                any_removed = true;
            }
        }

        if any_removed {
            if let Some(backplane) = &self.inner.backplane {
                if let Err(err) = backplane.notify_remove(key.clone()) {
                    tracing::warn!(%err, "backplane notify_remove failed");
                }
            }
            self.inner.emit(ManagerEvent::Remove {
                key: key.clone(),
                origin: Origin::Local,
            });
        }
        Ok(any_removed)
    }

    pub fn clear(&self) -> CacheResult<()> {
        self.inner.check_disposed()?;
        for handle in self.inner.handles.iter() {
            handle.clear()?;
        }
        if let Some(backplane) = &self.inner.backplane {
            if let Err(err) = backplane.notify_clear() {
                tracing::warn!(%err, "backplane notify_clear failed");
            }
        }
        self.inner.emit(ManagerEvent::Clear { origin: Origin::Local });
        Ok(())
    }

    // ---- §4.5.5 Update / AddOrUpdate / TryUpdate ----

    fn perform_update(
        &self,
        key: &K,
        factory: &dyn Fn(&V) -> Option<V>,
        max_retries: u32,
    ) -> CacheResult<UpdateResult<K, V>> {
        self.inner.check_disposed()?;
        let back_index = self.inner.back_index();
        let result = self.inner.handles[back_index].update(key, factory, max_retries)?;

        match &result {
            UpdateResult::Success { .. } => {
                self.inner.evict_except(back_index, key)?;
                if let Some(backplane) = &self.inner.backplane {
                    if let Err(err) = backplane.notify_change(key.clone(), ChangeAction::Update) {
                        tracing::warn!(%err, "backplane notify_change failed for update");
                    }
                }
                self.inner.emit(ManagerEvent::Update {
                    key: key.clone(),
                    origin: Origin::Local,
                });
            }
            UpdateResult::FactoryReturnedNull => {
                tracing::warn!("update factory returned null, nothing written");
            }
            UpdateResult::ItemDidNotExist | UpdateResult::TooManyRetries { .. } => {
                self.inner.evict_except(back_index, key)?;
            }
        }

        Ok(result)
    }

    /// Updates `key` via `factory`, using the manager's configured
    /// `max_retries`. Fails with `InvariantViolation` if the factory
    /// returned null, the item didn't exist, or the back handle exhausted
    /// its retries.
    pub fn update<F>(&self, key: &K, factory: F) -> CacheResult<V>
    where
        F: Fn(&V) -> Option<V>,
    {
        self.update_with_retries(key, factory, self.inner.config.max_retries)
    }

    pub fn update_with_retries<F>(&self, key: &K, factory: F, max_retries: u32) -> CacheResult<V>
    where
        F: Fn(&V) -> Option<V>,
    {
        match self.perform_update(key, &factory, max_retries)? {
            UpdateResult::Success { item, .. } => Ok(item.into_value()),
            UpdateResult::FactoryReturnedNull | UpdateResult::ItemDidNotExist => Err(
                CacheError::invariant_violation("update failed: item missing or factory returned null"),
            ),
            UpdateResult::TooManyRetries { tries } => {
                Err(CacheError::invariant_violation(format!("update exceeded {tries} retries")))
            }
        }
    }

    /// Same as `update`, but returns `Ok(None)` instead of failing.
    pub fn try_update<F>(&self, key: &K, factory: F) -> CacheResult<Option<V>>
    where
        F: Fn(&V) -> Option<V>,
    {
        self.try_update_with_retries(key, factory, self.inner.config.max_retries)
    }

    pub fn try_update_with_retries<F>(&self, key: &K, factory: F, max_retries: u32) -> CacheResult<Option<V>>
    where
        F: Fn(&V) -> Option<V>,
    {
        match self.perform_update(key, &factory, max_retries)? {
            UpdateResult::Success { item, .. } => Ok(Some(item.into_value())),
            _ => Ok(None),
        }
    }

    /// Attempts `add(key, add_value)`; on failure, attempts `try_update`.
    /// Repeats up to `max_retries` times, failing with
    /// `InvariantViolation` on exhaustion. Not atomic across nodes: two
    /// concurrent racers may both succeed `add`, or both proceed to
    /// `update` (§4.5.5).
    pub fn add_or_update<F>(&self, key: &K, add_value: V, factory: F) -> CacheResult<V>
    where
        F: Fn(&V) -> Option<V>,
    {
        self.add_or_update_with_retries(key, add_value, factory, self.inner.config.max_retries)
    }

    pub fn add_or_update_with_retries<F>(
        &self,
        key: &K,
        add_value: V,
        factory: F,
        max_retries: u32,
    ) -> CacheResult<V>
    where
        F: Fn(&V) -> Option<V>,
    {
        for _ in 0..=max_retries {
            if self.add(key.clone(), add_value.clone())? {
                return Ok(add_value);
            }
            if let UpdateResult::Success { item, .. } = self.perform_update(key, &factory, max_retries)? {
                return Ok(item.into_value());
            }
        }
        Err(CacheError::invariant_violation("add_or_update exhausted retries"))
    }

    // ---- §4.5.6 GetOrAdd / TryGetOrAdd ----

    pub fn get_or_add(&self, key: &K, value: V) -> CacheResult<V> {
        self.get_or_add_with(key, move || value, self.inner.config.max_retries)
    }

    pub fn get_or_add_with<F>(&self, key: &K, factory: F, max_retries: u32) -> CacheResult<V>
    where
        F: FnOnce() -> V,
    {
        match self.try_get_or_add_with(key, factory, max_retries)? {
            Some(value) => Ok(value),
            None => Err(CacheError::invariant_violation("get_or_add exhausted retries")),
        }
    }

    /// Reads `key`; on a hit, returns it. On a miss, calls `factory` **at
    /// most once** across the whole retry loop (the candidate is
    /// constructed once and reused), then attempts `add` up to
    /// `max_retries` times, re-reading between attempts in case another
    /// writer beat us to it.
    pub fn try_get_or_add_with<F>(&self, key: &K, factory: F, max_retries: u32) -> CacheResult<Option<V>>
    where
        F: FnOnce() -> V,
    {
        if let Some(item) = self.get_cache_item(key)? {
            return Ok(Some(item.into_value()));
        }

        let candidate = CacheItem::new(key.clone(), factory());

        for _ in 0..=max_retries {
            if self.add_item(candidate.clone())? {
                return Ok(Some(candidate.into_value()));
            }
            if let Some(existing) = self.get_cache_item(key)? {
                return Ok(Some(existing.into_value()));
            }
        }
        Ok(None)
    }

    // ---- §4.5.7 Expire / RemoveExpiration ----

    fn read_for_expire(&self, key: &K) -> CacheResult<CacheItem<K, V>> {
        self.get_cache_item(key)?.ok_or(CacheError::NotFound)
    }

    pub fn expire(&self, key: &K, mode: ExpirationMode, timeout: Duration) -> CacheResult<()> {
        let item = self.read_for_expire(key)?;
        self.put_item(item.with_expiration(mode, timeout, false)?)
    }

    pub fn expire_absolute(&self, key: &K, timeout: Duration) -> CacheResult<()> {
        let item = self.read_for_expire(key)?;
        self.put_item(item.with_absolute_expiration(timeout)?)
    }

    pub fn expire_absolute_at(&self, key: &K, at: SystemTime) -> CacheResult<()> {
        let item = self.read_for_expire(key)?;
        self.put_item(item.with_absolute_expiration_at(at)?)
    }

    pub fn expire_sliding(&self, key: &K, timeout: Duration) -> CacheResult<()> {
        let item = self.read_for_expire(key)?;
        self.put_item(item.with_sliding_expiration(timeout)?)
    }

    pub fn remove_expiration(&self, key: &K) -> CacheResult<()> {
        let item = self.read_for_expire(key)?;
        self.put_item(item.with_no_expiration())
    }

    // ---- §5 Dispose ----

    /// Disposes every handle, then the backplane (if any), in that fixed
    /// order, and marks the manager disposed so every subsequent public
    /// operation returns `CacheError::Disposed` unconditionally (§7).
    /// Idempotent: disposing an already-disposed manager is a no-op.
    ///
    /// A handle or the backplane erroring while disposing is logged, not
    /// propagated, so one bad resource can't leak every resource behind
    /// it in the fixed dispose order.
    pub fn dispose(&self) -> CacheResult<()> {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        for (index, handle) in self.inner.handles.iter().enumerate() {
            if let Err(err) = handle.dispose() {
                tracing::error!(%err, index, "handle dispose failed, continuing to dispose the rest");
            }
        }

        if let Some(backplane) = &self.inner.backplane {
            if let Err(err) = backplane.dispose() {
                tracing::error!(%err, "backplane dispose failed");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshcache_handle::InMemoryHandle;
    use meshcache_common::HandleConfiguration;

    fn two_tier() -> Manager<String, String> {
        let front = InMemoryHandle::with_shard_count(HandleConfiguration::new("front"), 2);
        let back = InMemoryHandle::with_shard_count(HandleConfiguration::new("back"), 2);
        Manager::new(
            ManagerConfiguration::new("m"),
            vec![Box::new(front), Box::new(back)],
            None,
        )
        .unwrap()
    }

    #[test]
    fn rejects_empty_handle_list() {
        let result: CacheResult<Manager<String, String>> =
            Manager::new(ManagerConfiguration::new("m"), Vec::new(), None);
        assert!(matches!(result, Err(CacheError::InvariantViolation(_))));
    }

    #[test]
    fn rejects_handle_with_empty_name() {
        let bad = InMemoryHandle::with_shard_count(HandleConfiguration::new(""), 2);
        let result: CacheResult<Manager<String, String>> =
            Manager::new(ManagerConfiguration::new("m"), vec![Box::new(bad)], None);
        assert!(matches!(result, Err(CacheError::InvalidArgument(_))));
    }

    #[test]
    fn rejects_multiple_backplane_sources() {
        let a = InMemoryHandle::with_shard_count(HandleConfiguration::new("a").as_backplane_source(), 2);
        let b = InMemoryHandle::with_shard_count(HandleConfiguration::new("b").as_backplane_source(), 2);
        let result: CacheResult<Manager<String, String>> = Manager::new(
            ManagerConfiguration::new("m"),
            vec![Box::new(a), Box::new(b)],
            None,
        );
        assert!(matches!(result, Err(CacheError::InvariantViolation(_))));
    }

    #[test]
    fn add_writes_back_handle_only_until_promoted() {
        let m = two_tier();
        assert!(m.add("k".to_string(), "v".to_string()).unwrap());
        assert_eq!(m.stats(0).unwrap().snapshot().items, 0);
        assert_eq!(m.stats(1).unwrap().snapshot().items, 0); // stats disabled by default

        assert_eq!(m.get(&"k".to_string()).unwrap(), "v");
    }

    #[test]
    fn add_is_compare_and_swap_on_back_handle() {
        let m = two_tier();
        assert!(m.add("k".to_string(), "v1".to_string()).unwrap());
        assert!(!m.add("k".to_string(), "v2".to_string()).unwrap());
        assert_eq!(m.get(&"k".to_string()).unwrap(), "v1");
    }

    #[test]
    fn get_promotes_into_upstream_handles() {
        let m = two_tier();
        m.add("k".to_string(), "v".to_string()).unwrap();
        assert_eq!(m.get(&"k".to_string()).unwrap(), "v");
        // A second get should now hit the promoted front handle.
        assert_eq!(m.get(&"k".to_string()).unwrap(), "v");
    }

    #[test]
    fn get_on_missing_key_returns_not_found() {
        let m = two_tier();
        assert!(matches!(m.get(&"missing".to_string()), Err(CacheError::NotFound)));
    }

    #[test]
    fn put_writes_every_handle() {
        let m = two_tier();
        m.put("k".to_string(), "v".to_string()).unwrap();
        assert_eq!(m.get(&"k".to_string()).unwrap(), "v");
    }

    #[test]
    fn remove_clears_key_from_every_handle() {
        let m = two_tier();
        m.put("k".to_string(), "v".to_string()).unwrap();
        assert!(m.remove(&"k".to_string()).unwrap());
        assert!(matches!(m.get(&"k".to_string()), Err(CacheError::NotFound)));
    }

    #[test]
    fn update_applies_factory_on_back_handle() {
        let m = two_tier();
        m.add("k".to_string(), "1".to_string()).unwrap();
        let result = m.update(&"k".to_string(), |v| Some(format!("{v}1"))).unwrap();
        assert_eq!(result, "11");
    }

    #[test]
    fn update_on_missing_key_fails() {
        let m = two_tier();
        assert!(m.update(&"missing".to_string(), |v: &String| Some(v.clone())).is_err());
    }

    #[test]
    fn try_update_on_missing_key_returns_none() {
        let m = two_tier();
        assert_eq!(m.try_update(&"missing".to_string(), |v: &String| Some(v.clone())).unwrap(), None);
    }

    #[test]
    fn add_or_update_adds_then_updates() {
        let m: Manager<String, i32> = {
            let front = InMemoryHandle::with_shard_count(HandleConfiguration::new("front"), 2);
            let back = InMemoryHandle::with_shard_count(HandleConfiguration::new("back"), 2);
            Manager::new(ManagerConfiguration::new("m"), vec![Box::new(front), Box::new(back)], None).unwrap()
        };

        let first = m.add_or_update(&"k".to_string(), 0, |v| Some(v + 1)).unwrap();
        assert_eq!(first, 0);
        let second = m.add_or_update(&"k".to_string(), 0, |v| Some(v + 1)).unwrap();
        assert_eq!(second, 1);
    }

    #[test]
    fn get_or_add_returns_existing_without_calling_factory_again() {
        let m = two_tier();
        m.add("k".to_string(), "first".to_string()).unwrap();
        let value = m.get_or_add(&"k".to_string(), "second".to_string()).unwrap();
        assert_eq!(value, "first");
    }

    #[test]
    fn get_or_add_adds_when_missing() {
        let m = two_tier();
        let value = m.get_or_add(&"k".to_string(), "v".to_string()).unwrap();
        assert_eq!(value, "v");
    }

    #[test]
    fn expire_replaces_expiration_fields() {
        let m = two_tier();
        m.add("k".to_string(), "v".to_string()).unwrap();
        m.expire_sliding(&"k".to_string(), Duration::from_secs(30)).unwrap();
        let item = m.get_cache_item(&"k".to_string()).unwrap().unwrap();
        assert_eq!(item.expiration_mode(), ExpirationMode::Sliding);
    }

    #[test]
    fn remove_expiration_clears_expiry() {
        let m = two_tier();
        let item = CacheItem::new("k".to_string(), "v".to_string())
            .with_sliding_expiration(Duration::from_secs(30))
            .unwrap();
        m.add_item(item).unwrap();
        m.remove_expiration(&"k".to_string()).unwrap();
        let item = m.get_cache_item(&"k".to_string()).unwrap().unwrap();
        assert_eq!(item.expiration_mode(), ExpirationMode::None);
    }

    #[test]
    fn disposed_manager_rejects_further_operations() {
        let m = two_tier();
        m.add("k".to_string(), "v".to_string()).unwrap();
        m.dispose().unwrap();

        assert!(matches!(m.get(&"k".to_string()), Err(CacheError::Disposed)));
        assert!(matches!(m.add("k2".to_string(), "v2".to_string()), Err(CacheError::Disposed)));
        assert!(matches!(m.put("k2".to_string(), "v2".to_string()), Err(CacheError::Disposed)));
        assert!(matches!(m.remove(&"k".to_string()), Err(CacheError::Disposed)));
        assert!(matches!(m.clear(), Err(CacheError::Disposed)));
        assert!(matches!(
            m.update(&"k".to_string(), |v: &String| Some(v.clone())),
            Err(CacheError::Disposed)
        ));
    }

    #[test]
    fn dispose_is_idempotent() {
        let m = two_tier();
        m.dispose().unwrap();
        m.dispose().unwrap();
    }

    #[tokio::test]
    async fn subscribers_observe_local_add_event() {
        let m = two_tier();
        let mut rx = m.subscribe();
        m.add("k".to_string(), "v".to_string()).unwrap();
        match rx.recv().await.unwrap() {
            ManagerEvent::Add { key, origin } => {
                assert_eq!(key, "k");
                assert_eq!(origin, Origin::Local);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
