//! # Cache Item
//!
//! The unit of storage every handle and the manager pass around. A
//! `CacheItem` is immutable except for `last_accessed_utc`; every other
//! mutation goes through a `with_*` factory that returns a new instance,
//! following the copy-on-write style the coordinator relies on to keep
//! handles from racing on shared mutable item state.

use std::time::{Duration, SystemTime};

use crate::error::{CacheError, CacheResult};

/// Upper bound on `ExpirationTimeout` (invariant ii).
pub const MAX_EXPIRATION_TIMEOUT: Duration = Duration::from_secs(365 * 24 * 3600);

/// How an item's lifetime is bounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExpirationMode {
    /// Never expires.
    None,
    /// Expires `ExpirationTimeout` after the last access.
    Sliding,
    /// Expires `ExpirationTimeout` after creation.
    Absolute,
    /// Defer to the owning handle's configured default.
    Default,
}

/// A key/value entry with expiration bookkeeping.
///
/// Invariants (enforced by every constructor and `with_*` factory):
/// - `expiration_timeout` is in `[0, 365 days]`.
/// - `Sliding`/`Absolute` require a non-zero timeout.
/// - `None`/`Default` require a zero timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheItem<K, V> {
    key: K,
    value: V,
    created_utc: SystemTime,
    last_accessed_utc: SystemTime,
    expiration_mode: ExpirationMode,
    expiration_timeout: Duration,
    uses_expiration_defaults: bool,
}

fn validate_expiration(mode: ExpirationMode, timeout: Duration) -> CacheResult<()> {
    if timeout > MAX_EXPIRATION_TIMEOUT {
        return Err(CacheError::invalid_argument(
            "expiration timeout exceeds 365 days",
        ));
    }
    match mode {
        ExpirationMode::Sliding | ExpirationMode::Absolute => {
            if timeout.is_zero() {
                return Err(CacheError::invariant_violation(
                    "sliding/absolute expiration requires a non-zero timeout",
                ));
            }
        }
        ExpirationMode::None | ExpirationMode::Default => {
            if !timeout.is_zero() {
                return Err(CacheError::invalid_argument(
                    "none/default expiration must carry a zero timeout",
                ));
            }
        }
    }
    Ok(())
}

impl<K, V> CacheItem<K, V> {
    /// Creates a new item with no expiration, created and last-accessed
    /// at `now`.
    pub fn new(key: K, value: V) -> Self {
        let now = SystemTime::now();
        CacheItem {
            key,
            value,
            created_utc: now,
            last_accessed_utc: now,
            expiration_mode: ExpirationMode::None,
            expiration_timeout: Duration::ZERO,
            uses_expiration_defaults: false,
        }
    }

    /// Reconstructs an item from explicit fields, bypassing `now()`.
    /// Used by the neutral serializer carrier when decoding a value that
    /// was created on another node or at an earlier time.
    pub fn from_raw_parts(
        key: K,
        value: V,
        created_utc: SystemTime,
        last_accessed_utc: SystemTime,
        expiration_mode: ExpirationMode,
        expiration_timeout: Duration,
        uses_expiration_defaults: bool,
    ) -> CacheResult<Self> {
        validate_expiration(expiration_mode, expiration_timeout)?;
        Ok(CacheItem {
            key,
            value,
            created_utc,
            last_accessed_utc,
            expiration_mode,
            expiration_timeout,
            uses_expiration_defaults,
        })
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn into_value(self) -> V {
        self.value
    }

    pub fn created_utc(&self) -> SystemTime {
        self.created_utc
    }

    pub fn last_accessed_utc(&self) -> SystemTime {
        self.last_accessed_utc
    }

    pub fn expiration_mode(&self) -> ExpirationMode {
        self.expiration_mode
    }

    pub fn expiration_timeout(&self) -> Duration {
        self.expiration_timeout
    }

    pub fn uses_expiration_defaults(&self) -> bool {
        self.uses_expiration_defaults
    }

    /// True iff the item has expired as of `now`.
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        match self.expiration_mode {
            ExpirationMode::Absolute => now
                .duration_since(self.created_utc)
                .map(|age| age >= self.expiration_timeout)
                .unwrap_or(false),
            ExpirationMode::Sliding => now
                .duration_since(self.last_accessed_utc)
                .map(|idle| idle >= self.expiration_timeout)
                .unwrap_or(false),
            ExpirationMode::None | ExpirationMode::Default => false,
        }
    }

    /// True iff the item has expired as of now.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(SystemTime::now())
    }

    /// Touches `last_accessed_utc` to `now`; called on a successful get.
    pub fn touch(&mut self) {
        self.last_accessed_utc = SystemTime::now();
    }

    pub fn touched_at(&self, now: SystemTime) -> Self
    where
        K: Clone,
        V: Clone,
    {
        let mut clone = self.clone();
        clone.last_accessed_utc = now;
        clone
    }

    /// Returns a copy carrying a new value; timestamps and expiration are
    /// preserved.
    pub fn with_value(&self, value: V) -> Self
    where
        K: Clone,
    {
        CacheItem {
            key: self.key.clone(),
            value,
            created_utc: self.created_utc,
            last_accessed_utc: self.last_accessed_utc,
            expiration_mode: self.expiration_mode,
            expiration_timeout: self.expiration_timeout,
            uses_expiration_defaults: self.uses_expiration_defaults,
        }
    }

    /// Returns a copy with explicit expiration fields. Does not touch
    /// `created_utc` (only `with_absolute_expiration` restarts the clock).
    pub fn with_expiration(
        &self,
        mode: ExpirationMode,
        timeout: Duration,
        uses_handle_default: bool,
    ) -> CacheResult<Self>
    where
        K: Clone,
        V: Clone,
    {
        validate_expiration(mode, timeout)?;
        let mut clone = self.clone();
        clone.expiration_mode = mode;
        clone.expiration_timeout = timeout;
        clone.uses_expiration_defaults = uses_handle_default;
        Ok(clone)
    }

    /// Absolute expiration `timeout` from now; resets `created_utc`
    /// because the absolute clock restarts.
    pub fn with_absolute_expiration(&self, timeout: Duration) -> CacheResult<Self>
    where
        K: Clone,
        V: Clone,
    {
        validate_expiration(ExpirationMode::Absolute, timeout)?;
        let mut clone = self.clone();
        clone.created_utc = SystemTime::now();
        clone.expiration_mode = ExpirationMode::Absolute;
        clone.expiration_timeout = timeout;
        clone.uses_expiration_defaults = false;
        Ok(clone)
    }

    /// Absolute expiration at a fixed instant; also restarts `created_utc`
    /// to now, with the timeout computed as `at - now`.
    pub fn with_absolute_expiration_at(&self, at: SystemTime) -> CacheResult<Self>
    where
        K: Clone,
        V: Clone,
    {
        let now = SystemTime::now();
        let timeout = at
            .duration_since(now)
            .map_err(|_| CacheError::invalid_argument("absolute expiration instant is in the past"))?;
        self.with_absolute_expiration(timeout)
    }

    /// Sliding expiration of `timeout`; preserves `created_utc`.
    pub fn with_sliding_expiration(&self, timeout: Duration) -> CacheResult<Self>
    where
        K: Clone,
        V: Clone,
    {
        self.with_expiration(ExpirationMode::Sliding, timeout, false)
    }

    /// Clears expiration entirely.
    pub fn with_no_expiration(&self) -> Self
    where
        K: Clone,
        V: Clone,
    {
        self.with_expiration(ExpirationMode::None, Duration::ZERO, false)
            .expect("None/zero is always a valid expiration pair")
    }

    /// Defers expiration to the owning handle's configured default.
    pub fn with_default_expiration(&self) -> Self
    where
        K: Clone,
        V: Clone,
    {
        self.with_expiration(ExpirationMode::Default, Duration::ZERO, true)
            .expect("Default/zero is always a valid expiration pair")
    }

    /// Returns a copy with an explicit `created_utc` (preserves
    /// `last_accessed_utc` and expiration).
    pub fn with_created(&self, created_utc: SystemTime) -> Self
    where
        K: Clone,
        V: Clone,
    {
        let mut clone = self.clone();
        clone.created_utc = created_utc;
        clone
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn new_item_has_no_expiration() {
        let item = CacheItem::new("k", "v");
        assert_eq!(item.expiration_mode(), ExpirationMode::None);
        assert_eq!(item.expiration_timeout(), Duration::ZERO);
        assert!(!item.is_expired());
    }

    #[test]
    fn absolute_expiration_resets_created() {
        let item = CacheItem::new("k", "v");
        let created_before = item.created_utc();
        std::thread::sleep(Duration::from_millis(5));
        let item = item.with_absolute_expiration(Duration::from_secs(60)).unwrap();
        assert!(item.created_utc() > created_before);
    }

    #[test]
    fn sliding_expiration_preserves_created() {
        let item = CacheItem::new("k", "v");
        let created_before = item.created_utc();
        let item = item.with_sliding_expiration(Duration::from_secs(60)).unwrap();
        assert_eq!(item.created_utc(), created_before);
    }

    #[test]
    fn sliding_zero_timeout_is_rejected() {
        let item = CacheItem::new("k", "v");
        assert!(item.with_sliding_expiration(Duration::ZERO).is_err());
    }

    #[test]
    fn absolute_expiry_arithmetic() {
        let item = CacheItem::new("k", "v")
            .with_absolute_expiration(Duration::from_millis(10))
            .unwrap();
        assert!(!item.is_expired_at(item.created_utc() + Duration::from_millis(5)));
        assert!(item.is_expired_at(item.created_utc() + Duration::from_millis(10)));
    }

    #[test]
    fn sliding_expiry_uses_last_accessed() {
        let item = CacheItem::new("k", "v")
            .with_sliding_expiration(Duration::from_millis(10))
            .unwrap();
        let touched = item.touched_at(item.last_accessed_utc() + Duration::from_millis(5));
        assert!(!touched.is_expired_at(touched.last_accessed_utc() + Duration::from_millis(9)));
        assert!(touched.is_expired_at(touched.last_accessed_utc() + Duration::from_millis(10)));
    }

    #[test]
    fn timeout_over_one_year_is_rejected() {
        let item = CacheItem::new("k", "v");
        assert!(item
            .with_absolute_expiration(MAX_EXPIRATION_TIMEOUT + Duration::from_secs(1))
            .is_err());
    }
}
