//! Embedded-database [`StorageBackend`] backed by [redb](https://docs.rs/redb).
//!
//! A single `records` table of string keys to string values inside one
//! database file. Each `set`/`remove` runs in its own write transaction,
//! so entries are durable as soon as the call returns and readers never
//! observe a half-applied write.

use std::path::Path;

use redb::{Database, ReadableTable, TableDefinition};

use crate::error::StorageError;
use crate::store::backend::StorageBackend;

const RECORDS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("records");

/// Durable storage in a single redb database file.
pub struct RedbBackend {
    db: Database,
}

impl RedbBackend {
    /// Opens or creates the database file at `path` and ensures the
    /// records table exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created or opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = Database::create(path).map_err(|err| StorageError::Backend(err.into()))?;
        let write_txn = db
            .begin_write()
            .map_err(|err| StorageError::Backend(err.into()))?;
        {
            write_txn
                .open_table(RECORDS_TABLE)
                .map_err(|err| StorageError::Backend(err.into()))?;
        }
        write_txn
            .commit()
            .map_err(|err| StorageError::Backend(err.into()))?;
        Ok(Self { db })
    }
}

impl StorageBackend for RedbBackend {
    fn get(&self, raw_key: &str) -> Result<Option<String>, StorageError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|err| StorageError::Backend(err.into()))?;
        let table = read_txn
            .open_table(RECORDS_TABLE)
            .map_err(|err| StorageError::Backend(err.into()))?;
        let entry = table
            .get(raw_key)
            .map_err(|err| StorageError::Backend(err.into()))?;
        Ok(entry.map(|guard| guard.value().to_string()))
    }

    fn set(&self, raw_key: &str, value: &str) -> Result<(), StorageError> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|err| StorageError::Backend(err.into()))?;
        {
            let mut table = write_txn
                .open_table(RECORDS_TABLE)
                .map_err(|err| StorageError::Backend(err.into()))?;
            table
                .insert(raw_key, value)
                .map_err(|err| StorageError::Backend(err.into()))?;
        }
        write_txn
            .commit()
            .map_err(|err| StorageError::Backend(err.into()))?;
        Ok(())
    }

    fn remove(&self, raw_key: &str) -> Result<(), StorageError> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|err| StorageError::Backend(err.into()))?;
        {
            let mut table = write_txn
                .open_table(RECORDS_TABLE)
                .map_err(|err| StorageError::Backend(err.into()))?;
            table
                .remove(raw_key)
                .map_err(|err| StorageError::Backend(err.into()))?;
        }
        write_txn
            .commit()
            .map_err(|err| StorageError::Backend(err.into()))?;
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|err| StorageError::Backend(err.into()))?;
        let table = read_txn
            .open_table(RECORDS_TABLE)
            .map_err(|err| StorageError::Backend(err.into()))?;
        let iter = table
            .iter()
            .map_err(|err| StorageError::Backend(err.into()))?;
        let mut keys = Vec::new();
        for entry in iter {
            let (key, _) = entry.map_err(|err| StorageError::Backend(err.into()))?;
            keys.push(key.value().to_string());
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_backend(dir: &TempDir) -> RedbBackend {
        RedbBackend::open(dir.path().join("store.redb")).unwrap()
    }

    #[test]
    fn set_get_remove_round_trip() {
        let dir = TempDir::new().unwrap();
        let backend = open_backend(&dir);

        assert_eq!(backend.get("key1").unwrap(), None);

        backend.set("key1", "value1").unwrap();
        assert_eq!(backend.get("key1").unwrap(), Some("value1".to_string()));

        backend.remove("key1").unwrap();
        assert_eq!(backend.get("key1").unwrap(), None);
    }

    #[test]
    fn fresh_database_lists_no_keys() {
        let dir = TempDir::new().unwrap();
        let backend = open_backend(&dir);
        assert!(backend.keys().unwrap().is_empty());
    }

    #[test]
    fn entries_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.redb");

        {
            let backend = RedbBackend::open(&path).unwrap();
            backend.set("a", "1").unwrap();
            backend.set("b", r#"{"nested":"json"}"#).unwrap();
        }

        let backend = RedbBackend::open(&path).unwrap();
        assert_eq!(backend.get("a").unwrap(), Some("1".to_string()));
        assert_eq!(
            backend.get("b").unwrap(),
            Some(r#"{"nested":"json"}"#.to_string())
        );
    }

    #[test]
    fn set_overwrites_existing_value() {
        let dir = TempDir::new().unwrap();
        let backend = open_backend(&dir);

        backend.set("key", "first").unwrap();
        backend.set("key", "second").unwrap();
        assert_eq!(backend.get("key").unwrap(), Some("second".to_string()));
    }

    #[test]
    fn remove_missing_key_is_ok() {
        let dir = TempDir::new().unwrap();
        let backend = open_backend(&dir);
        backend.remove("missing").unwrap();
    }

    #[test]
    fn keys_lists_all_entries() {
        let dir = TempDir::new().unwrap();
        let backend = open_backend(&dir);
        backend.set("b", "2").unwrap();
        backend.set("a", "1").unwrap();

        let mut keys = backend.keys().unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a", "b"]);
    }
}
