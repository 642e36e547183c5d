//! Savepoint Store — checksummed persistence, auto-save, and lifecycle over
//! pluggable storage backends.

pub mod autosave;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod session;
pub mod store;

pub use autosave::{AutoSaveTask, AutoSaveWorker, PayloadSource};
pub use config::StoreConfig;
pub use error::{StorageError, StoreError};
pub use lifecycle::{Lifecycle, LifecycleState, ShutdownOutcome};
pub use session::{DataSession, FormSession, SessionOptions, SessionPool};
pub use store::{
    FlushOutcome, HealthReport, ListenerId, LoadOptions, PersistentStore, RemoveOptions,
    SaveOptions, StorageBackend, StorageUsage, StoreEvent,
};
