//! File-backed [`StorageBackend`] persisting all entries as one JSON
//! document.
//!
//! The whole key/value map lives in memory and is mirrored to a single
//! JSON file on every mutation, written to a `.tmp` sibling and renamed
//! into place so a crash mid-write leaves the previous file intact. The
//! file is pretty-printed and key-sorted, so it stays inspectable and
//! diffable.
//!
//! One process must own the file; concurrent processes writing the same
//! path will clobber each other.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::StorageError;
use crate::store::backend::StorageBackend;

/// Durable single-file storage.
pub struct FileBackend {
    path: PathBuf,
    state: Mutex<BTreeMap<String, String>>,
}

impl FileBackend {
    /// Opens or creates the backing file at `path`.
    ///
    /// A missing file starts empty; missing parent directories are
    /// created. A file that exists but does not parse is an error, never
    /// silently replaced.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or holds something
    /// other than a JSON string map.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let state = match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).map_err(|err| {
                StorageError::Backend(anyhow::anyhow!(
                    "corrupt backing file {}: {err}",
                    path.display()
                ))
            })?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// The backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut os = self.path.as_os_str().to_os_string();
        os.push(".tmp");
        PathBuf::from(os)
    }

    /// Writes the full map to the `.tmp` sibling, fsyncs, and renames it
    /// over the backing file.
    fn persist(&self, state: &BTreeMap<String, String>) -> Result<(), StorageError> {
        let body = serde_json::to_string_pretty(state).map_err(|err| {
            StorageError::Backend(anyhow::anyhow!("serialize backing file: {err}"))
        })?;
        let tmp = self.tmp_path();
        let mut file = File::create(&tmp)?;
        file.write_all(body.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl StorageBackend for FileBackend {
    fn get(&self, raw_key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.state.lock().get(raw_key).cloned())
    }

    fn set(&self, raw_key: &str, value: &str) -> Result<(), StorageError> {
        let mut state = self.state.lock();
        let previous = state.insert(raw_key.to_string(), value.to_string());
        if let Err(err) = self.persist(&state) {
            // Failed writes must not leave the in-memory map ahead of disk.
            match previous {
                Some(old) => {
                    state.insert(raw_key.to_string(), old);
                }
                None => {
                    state.remove(raw_key);
                }
            }
            return Err(err);
        }
        Ok(())
    }

    fn remove(&self, raw_key: &str) -> Result<(), StorageError> {
        let mut state = self.state.lock();
        let Some(previous) = state.remove(raw_key) else {
            return Ok(());
        };
        if let Err(err) = self.persist(&state) {
            state.insert(raw_key.to_string(), previous);
            return Err(err);
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.state.lock().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn backing_path(dir: &TempDir) -> PathBuf {
        dir.path().join("store.json")
    }

    #[test]
    fn set_get_remove_round_trip() {
        let dir = TempDir::new().unwrap();
        let backend = FileBackend::open(backing_path(&dir)).unwrap();

        assert_eq!(backend.get("key1").unwrap(), None);

        backend.set("key1", "value1").unwrap();
        assert_eq!(backend.get("key1").unwrap(), Some("value1".to_string()));

        backend.remove("key1").unwrap();
        assert_eq!(backend.get("key1").unwrap(), None);
    }

    #[test]
    fn entries_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = backing_path(&dir);

        {
            let backend = FileBackend::open(&path).unwrap();
            backend.set("a", "1").unwrap();
            backend.set("b", r#"{"nested":"json"}"#).unwrap();
        }

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.get("a").unwrap(), Some("1".to_string()));
        assert_eq!(
            backend.get("b").unwrap(),
            Some(r#"{"nested":"json"}"#.to_string())
        );
    }

    #[test]
    fn removal_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = backing_path(&dir);

        {
            let backend = FileBackend::open(&path).unwrap();
            backend.set("keep", "1").unwrap();
            backend.set("drop", "2").unwrap();
            backend.remove("drop").unwrap();
        }

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.get("keep").unwrap(), Some("1".to_string()));
        assert_eq!(backend.get("drop").unwrap(), None);
    }

    #[test]
    fn missing_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let backend = FileBackend::open(backing_path(&dir)).unwrap();
        assert!(backend.keys().unwrap().is_empty());
    }

    #[test]
    fn missing_parent_directories_are_created() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("deeper").join("store.json");
        let backend = FileBackend::open(&path).unwrap();
        backend.set("a", "1").unwrap();
        assert!(path.exists());
    }

    #[test]
    fn corrupt_file_is_rejected_not_replaced() {
        let dir = TempDir::new().unwrap();
        let path = backing_path(&dir);
        fs::write(&path, "this is not json").unwrap();

        assert!(FileBackend::open(&path).is_err());
        // The corrupt bytes are still there for manual recovery.
        assert_eq!(fs::read_to_string(&path).unwrap(), "this is not json");
    }

    #[test]
    fn no_tmp_file_left_behind() {
        let dir = TempDir::new().unwrap();
        let path = backing_path(&dir);
        let backend = FileBackend::open(&path).unwrap();

        backend.set("a", "1").unwrap();
        assert!(path.exists());
        assert!(!backend.tmp_path().exists());
    }

    #[test]
    fn remove_missing_key_does_not_touch_disk() {
        let dir = TempDir::new().unwrap();
        let path = backing_path(&dir);
        let backend = FileBackend::open(&path).unwrap();

        backend.remove("never-set").unwrap();
        // No mutation happened, so nothing was persisted yet.
        assert!(!path.exists());
    }

    #[test]
    fn keys_lists_all_entries_sorted() {
        let dir = TempDir::new().unwrap();
        let backend = FileBackend::open(backing_path(&dir)).unwrap();
        backend.set("c", "3").unwrap();
        backend.set("a", "1").unwrap();
        backend.set("b", "2").unwrap();

        assert_eq!(backend.keys().unwrap(), vec!["a", "b", "c"]);
    }
}
