//! [`StorageBackend`](super::backend::StorageBackend) implementations.
//!
//! [`MemoryBackend`] for tests and ephemeral stores, [`FileBackend`] for a
//! single durable JSON document, and [`RedbBackend`] (feature `redb`, on by
//! default) for an embedded transactional database.

mod file;
mod memory;
#[cfg(feature = "redb")]
mod redb;

pub use file::FileBackend;
pub use memory::MemoryBackend;
#[cfg(feature = "redb")]
pub use self::redb::RedbBackend;
