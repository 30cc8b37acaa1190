//! meshcache-manager - Orchestrates an ordered list of cache handles
//! behind one key/value interface, wiring handle and backplane events
//! into the coordinator's public event surface.

pub mod events;
pub mod manager;

pub use events::{ManagerEvent, Origin};
pub use manager::Manager;
