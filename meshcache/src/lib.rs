//! meshcache - Facade crate re-exporting the coordinator's public surface
//! from `meshcache-common`, `meshcache-handle`, `meshcache-backplane`, and
//! `meshcache-manager` under one namespace.

pub use meshcache_common::{
    CacheError, CacheItem, CacheItemConverter, CacheResult, ExpirationMode, HandleConfiguration,
    ManagerConfiguration, SerializedCacheItem, SerializedExpirationMode, Stats, StatsSnapshot, UpdateMode,
    UpdateResult, MAX_EXPIRATION_TIMEOUT,
};

pub use meshcache_handle::{
    resolve_expiration, CacheSpecificRemoveEvent, ExpirationHandle, Handle, InMemoryHandle, RemoveListener,
    RemoveReason, UpdateFactory,
};

pub use meshcache_backplane::{Backplane, BackplaneEvent, ChangeAction, ChannelBackplane};

pub use meshcache_manager::{Manager, ManagerEvent, Origin};
