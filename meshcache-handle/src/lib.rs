//! meshcache-handle - The `Handle` contract plus the in-memory reference
//! implementation and its background expiration scanner.

pub mod handle;
pub mod memory;

pub use handle::{resolve_expiration, CacheSpecificRemoveEvent, Handle, RemoveListener, RemoveReason, UpdateFactory};
pub use memory::{ExpirationHandle, InMemoryHandle};
