//! In-memory [`StorageBackend`] implementation backed by [`DashMap`].
//!
//! Provides concurrent read/write access without external locking.
//! Suitable for tests and for hosts that treat the store as a cache with
//! export/import as the durability path. An optional byte quota emulates
//! the hard capacity of browser-style storage.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::error::StorageError;
use crate::store::backend::StorageBackend;

/// In-memory storage backed by [`DashMap`].
///
/// All operations use fine-grained sharding internally (via `DashMap`), so
/// concurrent stores sharing one backend never block each other for long.
/// The optional quota is enforced on `set`; accounting counts the UTF-8
/// lengths of keys and values.
pub struct MemoryBackend {
    entries: DashMap<String, String>,
    used_bytes: AtomicU64,
    quota_bytes: Option<u64>,
}

impl MemoryBackend {
    /// Creates an unbounded in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            used_bytes: AtomicU64::new(0),
            quota_bytes: None,
        }
    }

    /// Creates a backend that rejects writes past `quota_bytes`.
    ///
    /// Enforcement is advisory under concurrency: two racing writes may
    /// both pass the check and land slightly over quota.
    #[must_use]
    pub fn with_quota(quota_bytes: u64) -> Self {
        Self {
            entries: DashMap::new(),
            used_bytes: AtomicU64::new(0),
            quota_bytes: Some(quota_bytes),
        }
    }

    /// Bytes currently accounted against the quota.
    #[must_use]
    pub fn used_bytes(&self) -> u64 {
        self.used_bytes.load(Ordering::Relaxed)
    }

    fn entry_cost(raw_key: &str, value: &str) -> u64 {
        raw_key.len() as u64 + value.len() as u64
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageBackend for MemoryBackend {
    fn get(&self, raw_key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.get(raw_key).map(|entry| entry.clone()))
    }

    fn set(&self, raw_key: &str, value: &str) -> Result<(), StorageError> {
        let new_cost = Self::entry_cost(raw_key, value);
        let old_cost = self
            .entries
            .get(raw_key)
            .map(|entry| Self::entry_cost(raw_key, &entry));

        if let Some(capacity) = self.quota_bytes {
            let used = self.used_bytes.load(Ordering::Relaxed);
            let projected = used - old_cost.unwrap_or(0) + new_cost;
            if projected > capacity {
                return Err(StorageError::QuotaExceeded { used, capacity });
            }
        }

        self.entries.insert(raw_key.to_string(), value.to_string());
        match old_cost {
            Some(old) => {
                if new_cost >= old {
                    self.used_bytes.fetch_add(new_cost - old, Ordering::Relaxed);
                } else {
                    self.used_bytes.fetch_sub(old - new_cost, Ordering::Relaxed);
                }
            }
            None => {
                self.used_bytes.fetch_add(new_cost, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    fn remove(&self, raw_key: &str) -> Result<(), StorageError> {
        if let Some((key, value)) = self.entries.remove(raw_key) {
            self.used_bytes
                .fetch_sub(Self::entry_cost(&key, &value), Ordering::Relaxed);
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.entries.iter().map(|entry| entry.key().clone()).collect())
    }

    fn capacity_bytes(&self) -> Option<u64> {
        self.quota_bytes
    }
}
