//! End-to-end scenarios covering the manager's cross-handle behavior:
//! promotion, scanner-driven expiration, sliding touch, backplane
//! remote remove, AddOrUpdate races, and TooManyRetries recovery.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use meshcache_backplane::ChannelBackplane;
use meshcache_common::{CacheItem, CacheResult, HandleConfiguration, ManagerConfiguration, UpdateResult};
use meshcache_handle::{Handle, InMemoryHandle, RemoveListener, RemoveReason};
use meshcache_manager::{Manager, ManagerEvent, Origin};

fn two_tier_manager() -> Manager<String, String> {
    let front = InMemoryHandle::with_shard_count(HandleConfiguration::new("front"), 2);
    let back = InMemoryHandle::with_shard_count(HandleConfiguration::new("back"), 2);
    Manager::new(ManagerConfiguration::new("m"), vec![Box::new(front), Box::new(back)], None).unwrap()
}

#[tokio::test]
async fn two_tier_promotion() {
    let m = two_tier_manager();
    let mut events = m.subscribe();

    assert!(m.add("k".to_string(), "v".to_string()).unwrap());
    assert!(matches!(events.recv().await.unwrap(), ManagerEvent::Add { .. }));

    // Second get promotes the item into the front handle.
    assert_eq!(m.get(&"k".to_string()).unwrap(), "v");
    assert_eq!(m.get_cache_item(&"k".to_string()).unwrap().unwrap().value(), "v");
}

#[tokio::test]
async fn absolute_expiration_via_scanner_fires_remove_by_handle() {
    let back: Arc<InMemoryHandle<String, String>> =
        Arc::new(InMemoryHandle::with_shard_count(HandleConfiguration::new("back"), 2));
    let front = InMemoryHandle::with_shard_count(HandleConfiguration::new("front"), 2);

    let back_dyn: Box<dyn Handle<String, String>> = Box::new(CloneableHandle(Arc::clone(&back)));
    let m = Manager::new(
        ManagerConfiguration::new("m"),
        vec![Box::new(front), back_dyn],
        None,
    )
    .unwrap();

    let mut events = m.subscribe();

    let item = CacheItem::new("k".to_string(), "v".to_string())
        .with_absolute_expiration(Duration::from_millis(50))
        .unwrap();
    m.add_item(item).unwrap();

    std::thread::sleep(Duration::from_millis(60));
    assert_eq!(back.purge_expired(), 1);

    match events.recv().await.unwrap() {
        ManagerEvent::RemoveByHandle { key, reason, level, .. } => {
            assert_eq!(key, "k");
            assert_eq!(reason, RemoveReason::Expired);
            assert_eq!(level, 2);
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

/// Thin wrapper letting us hold an `Arc<InMemoryHandle<_,_>>` both inside
/// the manager (as `Box<dyn Handle<_,_>>`) and in the test for a direct
/// `purge_expired()` call, without `InMemoryHandle` itself needing to be
/// `Clone`.
struct CloneableHandle<K, V>(Arc<InMemoryHandle<K, V>>);

impl<K, V> Handle<K, V> for CloneableHandle<K, V>
where
    K: std::hash::Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn config(&self) -> &HandleConfiguration {
        self.0.config()
    }
    fn add(&self, item: CacheItem<K, V>) -> CacheResult<bool> {
        self.0.add(item)
    }
    fn get(&self, key: &K) -> CacheResult<Option<CacheItem<K, V>>> {
        self.0.get(key)
    }
    fn put(&self, item: CacheItem<K, V>) -> CacheResult<()> {
        self.0.put(item)
    }
    fn remove(&self, key: &K) -> CacheResult<bool> {
        self.0.remove(key)
    }
    fn clear(&self) -> CacheResult<()> {
        self.0.clear()
    }
    fn exists(&self, key: &K) -> CacheResult<bool> {
        self.0.exists(key)
    }
    fn count(&self) -> CacheResult<usize> {
        self.0.count()
    }
    fn update(
        &self,
        key: &K,
        factory: &meshcache_handle::UpdateFactory<'_, V>,
        max_retries: u32,
    ) -> CacheResult<UpdateResult<K, V>> {
        self.0.update(key, factory, max_retries)
    }
    fn on_cache_specific_remove(&self, listener: RemoveListener<K, V>) {
        self.0.on_cache_specific_remove(listener)
    }
    fn stats(&self) -> &meshcache_common::Stats {
        self.0.stats()
    }
    fn dispose(&self) -> CacheResult<()> {
        self.0.dispose()
    }
}

#[test]
fn sliding_touch_resets_deadline() {
    let handle = InMemoryHandle::with_shard_count(HandleConfiguration::new("h"), 2);
    let m = Manager::new(ManagerConfiguration::new("m"), vec![Box::new(handle)], None).unwrap();

    let item = CacheItem::new("k".to_string(), "v".to_string())
        .with_sliding_expiration(Duration::from_millis(80))
        .unwrap();
    m.add_item(item).unwrap();

    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(m.get(&"k".to_string()).unwrap(), "v");

    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(m.get(&"k".to_string()).unwrap(), "v");
}

#[tokio::test]
async fn backplane_remote_remove_evicts_and_fires_remote_event() {
    let backplane = Arc::new(ChannelBackplane::<String>::new());

    let handle1 = InMemoryHandle::with_shard_count(HandleConfiguration::new("h1"), 2);
    let m1 = Manager::new(
        ManagerConfiguration::new("m1"),
        vec![Box::new(handle1)],
        Some(backplane.clone() as Arc<dyn meshcache_backplane::Backplane<String>>),
    )
    .unwrap();

    let handle2 = InMemoryHandle::with_shard_count(HandleConfiguration::new("h2"), 2);
    let m2 = Manager::new(
        ManagerConfiguration::new("m2"),
        vec![Box::new(handle2)],
        Some(backplane.clone() as Arc<dyn meshcache_backplane::Backplane<String>>),
    )
    .unwrap();

    m2.put("k".to_string(), "v".to_string()).unwrap();
    assert_eq!(m2.get(&"k".to_string()).unwrap(), "v");

    let mut m2_events = m2.subscribe();

    m1.put("k".to_string(), "ignored".to_string()).unwrap();
    m1.remove(&"k".to_string()).unwrap();

    match m2_events.recv().await.unwrap() {
        ManagerEvent::Remove { key, origin } => {
            assert_eq!(key, "k");
            assert_eq!(origin, Origin::Remote);
        }
        other => panic!("unexpected event: {other:?}"),
    }

    assert!(matches!(
        m2.get(&"k".to_string()),
        Err(meshcache_common::CacheError::NotFound)
    ));
}

#[tokio::test]
async fn dispose_cascades_to_every_handle_and_the_backplane() {
    let backplane = Arc::new(ChannelBackplane::<String>::new());
    let front = InMemoryHandle::with_shard_count(HandleConfiguration::new("front"), 2);
    let back: Arc<InMemoryHandle<String, String>> =
        Arc::new(InMemoryHandle::with_shard_count(HandleConfiguration::new("back"), 2));
    let scanner = back.start_expirer();

    let m = Manager::new(
        ManagerConfiguration::new("m"),
        vec![Box::new(front), Box::new(CloneableHandle(Arc::clone(&back)))],
        Some(backplane.clone() as Arc<dyn meshcache_backplane::Backplane<String>>),
    )
    .unwrap();

    m.add("k".to_string(), "v".to_string()).unwrap();
    m.dispose().unwrap();

    assert!(matches!(
        m.get(&"k".to_string()),
        Err(meshcache_common::CacheError::Disposed)
    ));
    // The manager's dispose already signalled the back handle's scanner
    // to stop; this just joins the thread.
    scanner.stop();
}

#[test]
fn add_or_update_race_increments_once_per_success() {
    let handle = InMemoryHandle::with_shard_count(HandleConfiguration::new("h"), 2);
    let m: Manager<String, i32> = Manager::new(ManagerConfiguration::new("m"), vec![Box::new(handle)], None).unwrap();

    let calls = AtomicU32::new(0);
    let first = m
        .add_or_update(&"k".to_string(), 0, |v| {
            calls.fetch_add(1, Ordering::SeqCst);
            Some(v + 1)
        })
        .unwrap();
    assert_eq!(first, 0);

    let second = m
        .add_or_update(&"k".to_string(), 0, |v| {
            calls.fetch_add(1, Ordering::SeqCst);
            Some(v + 1)
        })
        .unwrap();
    assert_eq!(second, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

/// A handle whose `update` always reports `TooManyRetries`, standing in
/// for a distributed backend that exhausted its optimistic-retry budget.
struct AlwaysTooManyRetriesHandle {
    config: HandleConfiguration,
    stats: meshcache_common::Stats,
}

impl Handle<String, i32> for AlwaysTooManyRetriesHandle {
    fn config(&self) -> &HandleConfiguration {
        &self.config
    }
    fn add(&self, _item: CacheItem<String, i32>) -> CacheResult<bool> {
        Ok(true)
    }
    fn get(&self, _key: &String) -> CacheResult<Option<CacheItem<String, i32>>> {
        Ok(Some(CacheItem::new("k".to_string(), 0)))
    }
    fn put(&self, _item: CacheItem<String, i32>) -> CacheResult<()> {
        Ok(())
    }
    fn remove(&self, _key: &String) -> CacheResult<bool> {
        Ok(true)
    }
    fn clear(&self) -> CacheResult<()> {
        Ok(())
    }
    fn exists(&self, _key: &String) -> CacheResult<bool> {
        Ok(true)
    }
    fn count(&self) -> CacheResult<usize> {
        Ok(1)
    }
    fn update(
        &self,
        _key: &String,
        _factory: &meshcache_handle::UpdateFactory<'_, i32>,
        max_retries: u32,
    ) -> CacheResult<UpdateResult<String, i32>> {
        Ok(UpdateResult::TooManyRetries { tries: max_retries })
    }
    fn on_cache_specific_remove(&self, _listener: RemoveListener<String, i32>) {}
    fn stats(&self) -> &meshcache_common::Stats {
        &self.stats
    }
    fn dispose(&self) -> CacheResult<()> {
        Ok(())
    }
}

#[tokio::test]
async fn too_many_retries_recovers_via_eviction_and_fails_throw_variant() {
    let front = InMemoryHandle::with_shard_count(HandleConfiguration::new("front"), 2);
    front.add(CacheItem::new("k".to_string(), 0)).unwrap();

    let back = AlwaysTooManyRetriesHandle {
        config: HandleConfiguration::new("back"),
        stats: meshcache_common::Stats::new(false),
    };

    let m: Manager<String, i32> =
        Manager::new(ManagerConfiguration::new("m"), vec![Box::new(front), Box::new(back)], None).unwrap();

    let mut events = m.subscribe();

    let result = m.update(&"k".to_string(), |v| Some(v + 1));
    assert!(result.is_err());

    let try_result = m.try_update(&"k".to_string(), |v| Some(v + 1)).unwrap();
    assert_eq!(try_result, None);

    // No OnUpdate should have fired for either attempt.
    assert!(events.try_recv().is_err());
}
