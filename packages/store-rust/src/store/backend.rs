//! Low-level storage backend trait.
//!
//! Defines [`StorageBackend`], the innermost storage layer: a flat
//! string-to-string map with whole-keyspace enumeration. It stands in for
//! the browser's `localStorage` and is deliberately minimal so the same
//! store logic runs over memory, a JSON file, or an embedded database.

use crate::error::StorageError;

/// Flat synchronous key-value storage.
///
/// Raw keys and values are strings; the store layers record envelopes and
/// key namespacing on top. Implementations must tolerate concurrent calls.
/// All operations are synchronous.
///
/// Wrapped in `Arc<dyn StorageBackend>` for sharing across async boundaries.
pub trait StorageBackend: Send + Sync + 'static {
    /// Retrieve the value for a raw key, or `None` if not present.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn get(&self, raw_key: &str) -> Result<Option<String>, StorageError>;

    /// Insert or replace the value for a raw key.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::QuotaExceeded`] when the write would pass
    /// the backend's capacity, or another [`StorageError`] if the write
    /// cannot be performed.
    fn set(&self, raw_key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove a raw key. Removing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be written.
    fn remove(&self, raw_key: &str) -> Result<(), StorageError>;

    /// Enumerate every raw key currently stored, in no particular order.
    ///
    /// Includes keys foreign to any store prefix; callers filter.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn keys(&self) -> Result<Vec<String>, StorageError>;

    /// Advisory capacity in bytes, or `None` when unbounded.
    ///
    /// Used for usage reporting only; enforcement happens inside `set`.
    fn capacity_bytes(&self) -> Option<u64> {
        None
    }
}
