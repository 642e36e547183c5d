//! The persistent store and its storage layers.
//!
//! Provides the trait and shared types for the two-layer architecture:
//!
//! - [`StorageBackend`]: low-level string key-value storage (memory, file,
//!   redb)
//! - [`PersistentStore`]: checksummed records, backup rotation, retries,
//!   pending-change tracking, and listener fan-out on top of a backend
//!
//! Additionally defines the diagnostic report types and the
//! [`ListenerRegistry`] used for per-key save/error notification.

pub mod backend;
pub mod backends;
pub mod health;
pub mod listener;
pub mod pending;
pub mod persistent;

pub use backend::StorageBackend;
pub use health::{format_bytes, HealthReport, StorageUsage};
pub use listener::{ListenerId, ListenerRegistry, StoreEvent, StoreListener};
pub use pending::PendingSet;
pub use persistent::{FlushOutcome, LoadOptions, PersistentStore, RemoveOptions, SaveOptions};
