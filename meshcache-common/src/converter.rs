//! # Serializer-Facing Item Carrier
//!
//! Purpose: Give serializer integrations a neutral wire shape for a
//! `CacheItem` without exposing the item's internal representation.
//!
//! ## Design Principles
//!
//! 1. **Opaque Value Type Id**: `value_type` is a caller-supplied label;
//!    the core never interprets it.
//! 2. **Tick Precision**: Timestamps round-trip at 100-nanosecond
//!    granularity (the same tick unit long-lived .NET-interop wire
//!    formats use), not wall-clock-string precision.
//! 3. **Millisecond Timeout**: `expiration_timeout_ms` matches how most
//!    external stores (and this crate's own handle configuration) accept
//!    durations over the wire.
//!
//! ## Memory Layout
//!
//! ```text
//! SerializedCacheItem
//!   key                        : K
//!   value                      : V
//!   value_type                 : String   (opaque to the core)
//!   created_ticks              : u64      (100ns ticks since Unix epoch)
//!   last_accessed_ticks        : u64      (100ns ticks since Unix epoch)
//!   expiration_mode            : SerializedExpirationMode
//!   expiration_timeout_ms      : u64
//!   uses_expiration_defaults   : bool
//! ```

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, CacheResult};
use crate::item::{CacheItem, ExpirationMode};

/// 100-nanosecond ticks per second, matching the granularity other
/// interop wire formats in this ecosystem use for timestamps.
pub const TICKS_PER_SECOND: u64 = 10_000_000;

/// Wire form of `ExpirationMode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SerializedExpirationMode {
    None,
    Sliding,
    Absolute,
    Default,
}

impl From<ExpirationMode> for SerializedExpirationMode {
    fn from(mode: ExpirationMode) -> Self {
        match mode {
            ExpirationMode::None => SerializedExpirationMode::None,
            ExpirationMode::Sliding => SerializedExpirationMode::Sliding,
            ExpirationMode::Absolute => SerializedExpirationMode::Absolute,
            ExpirationMode::Default => SerializedExpirationMode::Default,
        }
    }
}

impl From<SerializedExpirationMode> for ExpirationMode {
    fn from(mode: SerializedExpirationMode) -> Self {
        match mode {
            SerializedExpirationMode::None => ExpirationMode::None,
            SerializedExpirationMode::Sliding => ExpirationMode::Sliding,
            SerializedExpirationMode::Absolute => ExpirationMode::Absolute,
            SerializedExpirationMode::Default => ExpirationMode::Default,
        }
    }
}

/// Neutral carrier for a serialized `CacheItem`, preserving the original
/// `created`/`last_accessed` timestamps across the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializedCacheItem<K, V> {
    pub key: K,
    pub value: V,
    /// Opaque to the core; callers use it to pick a deserializer.
    pub value_type: String,
    pub created_ticks: u64,
    pub last_accessed_ticks: u64,
    pub expiration_mode: SerializedExpirationMode,
    pub expiration_timeout_ms: u64,
    pub uses_expiration_defaults: bool,
}

fn to_ticks(t: SystemTime) -> u64 {
    let since_epoch = t.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
    since_epoch
        .as_secs()
        .saturating_mul(TICKS_PER_SECOND)
        .saturating_add(u64::from(since_epoch.subsec_nanos()) / 100)
}

fn from_ticks(ticks: u64) -> SystemTime {
    let seconds = ticks / TICKS_PER_SECOND;
    let sub_ticks = ticks % TICKS_PER_SECOND;
    UNIX_EPOCH + Duration::from_secs(seconds) + Duration::from_nanos(sub_ticks * 100)
}

/// Converts between `CacheItem` and its neutral wire carrier.
pub struct CacheItemConverter;

impl CacheItemConverter {
    /// Encodes an item for serialization, tagging it with a caller-chosen
    /// `value_type` identifier.
    pub fn encode<K, V>(
        item: &CacheItem<K, V>,
        value_type: impl Into<String>,
    ) -> SerializedCacheItem<K, V>
    where
        K: Clone,
        V: Clone,
    {
        SerializedCacheItem {
            key: item.key().clone(),
            value: item.value().clone(),
            value_type: value_type.into(),
            created_ticks: to_ticks(item.created_utc()),
            last_accessed_ticks: to_ticks(item.last_accessed_utc()),
            expiration_mode: item.expiration_mode().into(),
            expiration_timeout_ms: item.expiration_timeout().as_millis() as u64,
            uses_expiration_defaults: item.uses_expiration_defaults(),
        }
    }

    /// Decodes a wire carrier back into a `CacheItem`, restoring the
    /// original `created`/`last_accessed` timestamps.
    pub fn decode<K, V>(serialized: SerializedCacheItem<K, V>) -> CacheResult<CacheItem<K, V>> {
        CacheItem::from_raw_parts(
            serialized.key,
            serialized.value,
            from_ticks(serialized.created_ticks),
            from_ticks(serialized.last_accessed_ticks),
            serialized.expiration_mode.into(),
            Duration::from_millis(serialized.expiration_timeout_ms),
            serialized.uses_expiration_defaults,
        )
        .map_err(|_| CacheError::invalid_argument("serialized item violates expiration invariants"))
    }
}
