//! Configuration types for handles and the manager.

use std::time::Duration;

use crate::item::ExpirationMode;

/// Per-handle configuration.
#[derive(Debug, Clone)]
pub struct HandleConfiguration {
    /// Non-empty handle name.
    pub name: String,
    /// Lookup key; defaults to `name` when not given.
    pub key: String,
    /// Default expiration mode applied when an item defers to handle
    /// defaults (§4.2 expiration resolution).
    pub expiration_mode: ExpirationMode,
    /// Default expiration timeout paired with `expiration_mode`.
    pub expiration_timeout: Duration,
    /// Gates `Stats` counter updates.
    pub enable_statistics: bool,
    /// Forces statistics on when true.
    pub enable_performance_counters: bool,
    /// At most one handle in a manager may set this.
    pub is_backplane_source: bool,
}

impl HandleConfiguration {
    /// Creates a configuration with `key` defaulted to `name`, no default
    /// expiration, and statistics disabled.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        HandleConfiguration {
            key: name.clone(),
            name,
            expiration_mode: ExpirationMode::None,
            expiration_timeout: Duration::ZERO,
            enable_statistics: false,
            enable_performance_counters: false,
            is_backplane_source: false,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn with_expiration(mut self, mode: ExpirationMode, timeout: Duration) -> Self {
        self.expiration_mode = mode;
        self.expiration_timeout = timeout;
        self
    }

    pub fn with_statistics(mut self, enabled: bool) -> Self {
        self.enable_statistics = enabled;
        self
    }

    pub fn with_performance_counters(mut self, enabled: bool) -> Self {
        self.enable_performance_counters = enabled;
        if enabled {
            self.enable_statistics = true;
        }
        self
    }

    pub fn as_backplane_source(mut self) -> Self {
        self.is_backplane_source = true;
        self
    }

    /// Statistics are active when explicitly enabled or forced on by
    /// performance counters.
    pub fn statistics_active(&self) -> bool {
        self.enable_statistics || self.enable_performance_counters
    }
}

/// Policy governing how a handle's cache-specific-remove propagates to
/// handles above it (§4.5.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    /// Cache-specific removes never propagate.
    None,
    /// Cache-specific removes evict the key from every handle above the
    /// one that fired the event.
    Up,
    /// Reserved for future full-mesh propagation; currently behaves like
    /// `Up` (the source exposes no handle layout richer than "above").
    Full,
}

/// Manager-level configuration.
#[derive(Debug, Clone)]
pub struct ManagerConfiguration {
    pub name: String,
    pub update_mode: UpdateMode,
    pub max_retries: u32,
    pub retry_timeout: Duration,
}

impl ManagerConfiguration {
    pub fn new(name: impl Into<String>) -> Self {
        ManagerConfiguration {
            name: name.into(),
            update_mode: UpdateMode::None,
            max_retries: 50,
            retry_timeout: Duration::from_millis(100),
        }
    }

    pub fn with_update_mode(mut self, mode: UpdateMode) -> Self {
        self.update_mode = mode;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_timeout(mut self, timeout: Duration) -> Self {
        self.retry_timeout = timeout;
        self
    }
}

impl Default for ManagerConfiguration {
    fn default() -> Self {
        ManagerConfiguration::new("default")
    }
}
