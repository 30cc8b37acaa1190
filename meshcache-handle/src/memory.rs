//! # In-Memory Reference Handle
//!
//! Provide the in-memory backend with sharded locking and an
//! active-scan expiration sweeper. This is the reference handle the
//! coordinator ships with; it evicts only on expiry (no LRU/LFU — that
//! policy is left to capacity-bounded backends outside this crate's
//! scope).
//!
//! ## Design Principles
//!
//! 1. **Sharded Locks**: Per-shard `RwLock`s reduce contention under
//!    concurrent access, same as the sharded map design this handle is
//!    built on.
//! 2. **TTL Fast Path**: Expiration is checked on access so a stale read
//!    never escapes a single `get`.
//! 3. **Single Scanner Thread**: One background worker per handle,
//!    guarded by an atomic "running" flag so overlapping manual and
//!    scheduled sweeps never race each other.
//! 4. **Per-Handle Update Lock**: `update` is serialised process-wide
//!    for this handle to avoid lost updates; shard locks alone aren't
//!    enough because the read and the write are two separate critical
//!    sections around the caller's factory.
//!
//! ## Structure Overview
//!
//! ```text
//! InMemoryHandle
//!   └── shards: Vec<Shard>
//!         └── Shard
//!               └── inner: RwLock<HashMap<K, CacheItem<K, V>>>
//!   ├── update_lock: Mutex<()>
//!   ├── running: AtomicBool        (scanner overlap guard)
//!   └── listeners: RwLock<Vec<RemoveListener<K, V>>>
//! ```

use std::hash::{BuildHasher, Hash, Hasher};
use std::panic;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ahash::RandomState;
use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};

use meshcache_common::{CacheError, CacheItem, CacheResult, HandleConfiguration, Stats, UpdateResult};

use crate::handle::{resolve_expiration, CacheSpecificRemoveEvent, Handle, RemoveListener, RemoveReason, UpdateFactory};

/// Default shards = CPU count * multiplier, trading memory for reduced
/// lock contention.
const DEFAULT_SHARD_MULTIPLIER: usize = 4;

/// Fixed scanner period; the first tick is jittered to avoid a
/// thundering herd when many handles are constructed at once.
const SCAN_INTERVAL: Duration = Duration::from_millis(5000);
const JITTER_MIN_MS: u64 = 1000;
const JITTER_SPAN_MS: u64 = 4000;

struct Shard<K, V> {
    inner: RwLock<HashMap<K, CacheItem<K, V>, RandomState>>,
}

/// Sharded in-memory implementation of `Handle`.
pub struct InMemoryHandle<K, V> {
    shards: Vec<Shard<K, V>>,
    shard_mask: usize,
    hash_state: RandomState,
    config: HandleConfiguration,
    stats: Stats,
    update_lock: Mutex<()>,
    running: AtomicBool,
    listeners: RwLock<Vec<RemoveListener<K, V>>>,
    disposed: AtomicBool,
    scanner_stop: Mutex<Option<Arc<AtomicBool>>>,
}

/// Handle for the background expiration sweeper. Dropping it without
/// calling `stop` leaks the thread; always stop it on shutdown.
pub struct ExpirationHandle {
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ExpirationHandle {
    /// Signals the sweeper to stop and waits for it to finish.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

fn normalize_shard_count(count: usize) -> usize {
    count.max(1).next_power_of_two()
}

/// A lightweight, dependency-free jitter for the scanner's first tick:
/// the low bits of the current time are enough to avoid every handle
/// constructed in the same instant scanning in lockstep; it doesn't
/// need cryptographic randomness.
fn jittered_first_delay() -> Duration {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .subsec_nanos() as u64;
    Duration::from_millis(JITTER_MIN_MS + nanos % JITTER_SPAN_MS)
}

impl<K, V> InMemoryHandle<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Creates a handle with a default shard count based on available
    /// parallelism.
    pub fn new(config: HandleConfiguration) -> Self {
        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::with_shard_count(config, threads.saturating_mul(DEFAULT_SHARD_MULTIPLIER))
    }

    /// Creates a handle with a caller-chosen shard count, normalized to
    /// the next power of two for fast masking.
    pub fn with_shard_count(config: HandleConfiguration, shards: usize) -> Self {
        let shard_count = normalize_shard_count(shards);
        let hash_state = RandomState::new();
        let shards = (0..shard_count)
            .map(|_| Shard {
                inner: RwLock::new(HashMap::with_hasher(hash_state.clone())),
            })
            .collect();

        let stats = Stats::new(config.statistics_active());

        InMemoryHandle {
            shards,
            shard_mask: shard_count - 1,
            hash_state,
            config,
            stats,
            update_lock: Mutex::new(()),
            running: AtomicBool::new(false),
            listeners: RwLock::new(Vec::new()),
            disposed: AtomicBool::new(false),
            scanner_stop: Mutex::new(None),
        }
    }

    /// Returns `CacheError::Disposed` once `dispose` has been called.
    /// Every `Handle` method except `dispose` itself starts with this
    /// check so a disposed handle raises unconditionally rather than
    /// touching its shards (§7).
    fn check_disposed(&self) -> CacheResult<()> {
        if self.disposed.load(Ordering::Acquire) {
            Err(CacheError::Disposed)
        } else {
            Ok(())
        }
    }

    fn shard_index(&self, key: &K) -> usize {
        let mut hasher = self.hash_state.build_hasher();
        key.hash(&mut hasher);
        (hasher.finish() as usize) & self.shard_mask
    }

    fn shard_for(&self, key: &K) -> &Shard<K, V> {
        &self.shards[self.shard_index(key)]
    }

    fn fire_remove(&self, key: K, reason: RemoveReason, value: Option<V>) {
        for listener in self.listeners.read().iter() {
            listener(CacheSpecificRemoveEvent {
                key: key.clone(),
                reason,
                value: value.clone(),
                level: 0,
            });
        }
    }

    /// Removes every expired entry across all shards as of now. Returns
    /// the number of entries evicted. Intended for periodic background
    /// use, but safe to call directly (e.g. from tests).
    pub fn purge_expired(&self) -> usize {
        let now = SystemTime::now();
        let mut total = 0usize;

        for shard in &self.shards {
            let evicted: Vec<(K, V)> = {
                let mut inner = shard.inner.write();
                let expired_keys: Vec<K> = inner
                    .iter()
                    .filter(|(_, item)| item.is_expired_at(now))
                    .map(|(k, _)| k.clone())
                    .collect();

                expired_keys
                    .into_iter()
                    .filter_map(|k| inner.remove(&k).map(|item| (k, item.into_value())))
                    .collect()
            };

            for (key, value) in evicted {
                self.stats.item_removed();
                total += 1;
                self.fire_remove(key, RemoveReason::Expired, Some(value));
            }
        }

        total
    }

    /// Starts the background sweeper. The scanner's "running" flag
    /// prevents an overlapping manual `purge_expired` call and a
    /// scheduled tick from scanning concurrently.
    pub fn start_expirer(self: &Arc<Self>) -> ExpirationHandle {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_thread = Arc::clone(&stop);
        *self.scanner_stop.lock() = Some(Arc::clone(&stop));
        let handle = Arc::clone(self);

        let join = thread::spawn(move || {
            thread::sleep(jittered_first_delay());
            loop {
                if stop_thread.load(Ordering::Acquire) {
                    break;
                }

                if handle
                    .running
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    let outcome =
                        panic::catch_unwind(panic::AssertUnwindSafe(|| handle.purge_expired()));
                    if outcome.is_err() {
                        tracing::error!("eviction scanner iteration panicked");
                    }
                    handle.running.store(false, Ordering::Release);
                }

                thread::sleep(SCAN_INTERVAL);
            }
        });

        ExpirationHandle {
            stop,
            join: Some(join),
        }
    }
}

impl<K, V> Handle<K, V> for InMemoryHandle<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn config(&self) -> &HandleConfiguration {
        &self.config
    }

    fn add(&self, item: CacheItem<K, V>) -> CacheResult<bool> {
        self.check_disposed()?;
        let resolved = resolve_expiration(&item, &self.config)?;
        let now = SystemTime::now();
        let shard = self.shard_for(resolved.key());
        let mut inner = shard.inner.write();

        let existed = inner.contains_key(resolved.key());
        if existed {
            let is_expired = inner
                .get(resolved.key())
                .map(|current| current.is_expired_at(now))
                .unwrap_or(false);
            if !is_expired {
                return Ok(false);
            }
        }

        inner.insert(resolved.key().clone(), resolved);
        drop(inner);

        self.stats.on_add();
        if !existed {
            self.stats.item_inserted();
        }
        Ok(true)
    }

    fn get(&self, key: &K) -> CacheResult<Option<CacheItem<K, V>>> {
        self.check_disposed()?;
        let now = SystemTime::now();
        let shard = self.shard_for(key);
        let mut inner = shard.inner.write();

        match inner.get(key) {
            None => {
                drop(inner);
                self.stats.on_get_miss();
                Ok(None)
            }
            Some(current) if current.is_expired_at(now) => {
                let removed = inner.remove(key);
                drop(inner);
                self.stats.on_get_miss();
                if let Some(removed) = removed {
                    self.stats.item_removed();
                    self.fire_remove(key.clone(), RemoveReason::Expired, Some(removed.into_value()));
                }
                Ok(None)
            }
            Some(current) => {
                let mut touched = current.clone();
                touched.touch();
                inner.insert(key.clone(), touched.clone());
                drop(inner);
                self.stats.on_get_hit();
                Ok(Some(touched))
            }
        }
    }

    fn put(&self, item: CacheItem<K, V>) -> CacheResult<()> {
        self.check_disposed()?;
        let resolved = resolve_expiration(&item, &self.config)?;
        let shard = self.shard_for(resolved.key());
        let mut inner = shard.inner.write();
        let existed = inner.contains_key(resolved.key());
        inner.insert(resolved.key().clone(), resolved);
        drop(inner);

        self.stats.on_put();
        if !existed {
            self.stats.item_inserted();
        }
        Ok(())
    }

    fn remove(&self, key: &K) -> CacheResult<bool> {
        self.check_disposed()?;
        let shard = self.shard_for(key);
        let mut inner = shard.inner.write();
        let removed = inner.remove(key);
        drop(inner);

        self.stats.on_remove();
        if removed.is_some() {
            self.stats.item_removed();
        }
        Ok(removed.is_some())
    }

    fn clear(&self) -> CacheResult<()> {
        self.check_disposed()?;
        for shard in &self.shards {
            shard.inner.write().clear();
        }
        self.stats.on_clear();
        self.stats.reset_items();
        Ok(())
    }

    fn exists(&self, key: &K) -> CacheResult<bool> {
        self.check_disposed()?;
        let now = SystemTime::now();
        let shard = self.shard_for(key);
        let inner = shard.inner.read();
        Ok(inner.get(key).map(|item| !item.is_expired_at(now)).unwrap_or(false))
    }

    fn count(&self) -> CacheResult<usize> {
        self.check_disposed()?;
        Ok(self.shards.iter().map(|shard| shard.inner.read().len()).sum())
    }

    fn update(
        &self,
        key: &K,
        factory: &UpdateFactory<'_, V>,
        _max_retries: u32,
    ) -> CacheResult<UpdateResult<K, V>> {
        self.check_disposed()?;
        // Serialises the whole read-modify-write across every key in this
        // handle; the shard locks alone can't prevent a lost update
        // because the read and the write are separated by the caller's
        // factory call.
        let _guard = self.update_lock.lock();
        let now = SystemTime::now();

        let current = {
            let shard = self.shard_for(key);
            let mut inner = shard.inner.write();
            match inner.get(key) {
                None => return Ok(UpdateResult::ItemDidNotExist),
                Some(item) if item.is_expired_at(now) => {
                    let removed = inner.remove(key);
                    drop(inner);
                    if let Some(removed) = removed {
                        self.stats.item_removed();
                        self.fire_remove(key.clone(), RemoveReason::Expired, Some(removed.into_value()));
                    }
                    return Ok(UpdateResult::ItemDidNotExist);
                }
                Some(item) => item.clone(),
            }
        };

        // Call the caller's factory without holding the shard lock so it
        // can't deadlock by re-entering this handle.
        let new_value = match factory(current.value()) {
            None => return Ok(UpdateResult::FactoryReturnedNull),
            Some(value) => value,
        };

        let mut new_item = current.with_value(new_value);
        new_item.touch();

        let shard = self.shard_for(key);
        shard.inner.write().insert(key.clone(), new_item.clone());

        let result = UpdateResult::Success {
            item: new_item,
            tries: 1,
        };
        self.stats.on_update(&result);
        Ok(result)
    }

    fn on_cache_specific_remove(&self, listener: RemoveListener<K, V>) {
        self.listeners.write().push(listener);
    }

    fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Cancels the scanner started by `start_expirer` (if any) and takes
    /// the update lock to ensure no in-flight `update` call is still
    /// running, then marks the handle disposed. Idempotent: disposing an
    /// already-disposed handle is a no-op.
    fn dispose(&self) -> CacheResult<()> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        if let Some(stop) = self.scanner_stop.lock().take() {
            stop.store(true, Ordering::Release);
        }

        drop(self.update_lock.lock());
        Ok(())
    }
}
