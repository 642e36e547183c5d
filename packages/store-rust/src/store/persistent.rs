//! Checksummed persistent store with backup rotation and write retries.
//!
//! [`PersistentStore`] is the orchestrator above a raw [`StorageBackend`]:
//! every payload is sealed into a checksummed [`StoredRecord`] before it is
//! written, a rotated backup of the previous bytes is kept per key, and
//! corrupted primaries are transparently recovered from the newest backup
//! that still verifies. Expected failures never surface as `Err` from the
//! save/load path; they come back as `false` or the caller's fallback, with
//! the key parked in the pending set for a later flush.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use savepoint_core::clock::Clock;
use savepoint_core::keys::{validate_key, KeySpace, RawKey};
use savepoint_core::record::StoredRecord;
use savepoint_core::snapshot::Snapshot;

use crate::autosave::PayloadSource;
use crate::config::StoreConfig;
use crate::error::{StorageError, StoreError};
use crate::store::backend::StorageBackend;
use crate::store::health::{HealthReport, StorageUsage};
use crate::store::listener::{ListenerId, ListenerRegistry, StoreEvent};
use crate::store::pending::PendingSet;

/// Meta entry stamped with the time of the most recent export.
const LAST_BACKUP_META: &str = "last-backup";

/// Meta entry used for the health-check write probe.
const HEALTH_PROBE_META: &str = "health-probe";

/// Meta entry holding the pre-import snapshot of the whole store.
const IMPORT_BACKUP_META: &str = "import-backup";

/// Options for [`PersistentStore::save`].
#[derive(Debug, Clone, Copy)]
pub struct SaveOptions {
    /// Reject null payloads before anything is written.
    pub validate: bool,
    /// Rotate a backup of the current bytes before overwriting.
    pub backup: bool,
    /// Retry transient write failures up to the configured attempt count.
    pub retry: bool,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            validate: true,
            backup: true,
            retry: true,
        }
    }
}

/// Options for [`PersistentStore::load`].
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Require the stored checksum to verify before the payload is returned.
    pub validate: bool,
    /// Value returned when the key is missing or unrecoverable.
    pub fallback: Value,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            validate: true,
            fallback: Value::Null,
        }
    }
}

/// Options for [`PersistentStore::remove`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveOptions {
    /// Also delete the key's rotated backups.
    pub remove_backups: bool,
}

/// Result of one [`PersistentStore::flush_pending`] pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlushOutcome {
    /// Pending keys for which the source produced a payload.
    pub attempted: usize,
    /// How many of those saves succeeded.
    pub saved: usize,
    /// Keys still pending after the pass (no payload, or save failed).
    pub still_pending: Vec<String>,
}

/// Checksummed key/value store over a pluggable [`StorageBackend`].
///
/// Construct one explicitly and share it as `Arc<PersistentStore>`; there is
/// no global instance. All mutation methods take `&self`.
pub struct PersistentStore {
    backend: Arc<dyn StorageBackend>,
    config: StoreConfig,
    clock: Arc<dyn Clock>,
    keyspace: KeySpace,
    pending: PendingSet,
    listeners: ListenerRegistry,
    auto_save_enabled: AtomicBool,
}

impl PersistentStore {
    /// Creates a store over `backend`, namespaced by `config.key_prefix`.
    #[must_use]
    pub fn new(backend: Arc<dyn StorageBackend>, config: StoreConfig, clock: Arc<dyn Clock>) -> Self {
        let keyspace = KeySpace::new(config.key_prefix.clone());
        Self {
            backend,
            config,
            clock,
            keyspace,
            pending: PendingSet::new(),
            listeners: ListenerRegistry::new(),
            auto_save_enabled: AtomicBool::new(true),
        }
    }

    /// The store's configuration.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Current reading of the store clock, in milliseconds since the epoch.
    ///
    /// Sessions stamp their debounce deadlines from this so that everything
    /// sharing the store also shares one timeline.
    #[must_use]
    pub fn now(&self) -> i64 {
        self.clock.now_millis()
    }

    // --- Core save/load ---

    /// Persists `payload` under `key` as a checksummed record.
    ///
    /// Returns `true` on success; the key's pending mark is cleared unless
    /// a newer mark arrived while the write was in flight. On any failure
    /// the key is parked in the pending set, listeners receive
    /// [`StoreEvent::Error`], and the method returns `false`; it never
    /// panics and never returns `Err`.
    pub async fn save(&self, key: &str, payload: Value, options: SaveOptions) -> bool {
        // Step 1: Reject inputs that can never be stored.
        if !validate_key(key) {
            return self.fail_save(key, format!("invalid key: {key:?}"));
        }
        if options.validate && payload.is_null() {
            return self.fail_save(key, format!("null payload rejected for key: {key}"));
        }

        // The mark generation this save sets out to cover. A newer mark
        // landing while the write is in flight must survive the save.
        let observed_mark = self.pending.generation(key);

        // Step 2: Rotate a backup of whatever is currently stored. Backup
        // trouble is logged but never blocks the save itself.
        if options.backup {
            self.backup_current(key);
        }

        // Step 3: Seal and encode the record.
        let record = StoredRecord::seal(payload, self.clock.now_millis());
        let encoded = match record.encode() {
            Ok(raw) => raw,
            Err(err) => {
                return self.fail_save(key, format!("payload not serializable: {err}"));
            }
        };

        // Step 4: Write, retrying transient failures with a fixed delay.
        let attempts = if options.retry { self.config.max_retries } else { 1 };
        let raw_key = self.keyspace.primary(key);
        match self.set_with_retry(&raw_key, &encoded, attempts).await {
            Ok(()) => {
                self.pending.unmark_if(key, observed_mark);
                tracing::debug!(key = %key, "saved");
                self.listeners
                    .notify(key, &StoreEvent::Saved { payload: record.data });
                true
            }
            Err(err) => self.fail_save(key, format!("write failed: {err}")),
        }
    }

    /// Loads the payload stored under `key`.
    ///
    /// Returns `options.fallback` when the key is missing. When the primary
    /// record is unreadable, undecodable, or fails its checksum (with
    /// `options.validate`), the newest backup that verifies is returned
    /// instead; only when no backup survives does the fallback apply.
    #[must_use]
    pub fn load(&self, key: &str, options: LoadOptions) -> Value {
        self.try_load(key, options.validate)
            .unwrap_or(options.fallback)
    }

    /// Readable payload for `key`: the primary record when it decodes (and,
    /// with `validate`, verifies), otherwise the newest verifying backup.
    /// `None` when the key is missing or nothing readable survives.
    fn try_load(&self, key: &str, validate: bool) -> Option<Value> {
        let raw_key = self.keyspace.primary(key);

        let raw = match self.backend.get(&raw_key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                tracing::warn!(key = %key, error = %err, "primary read failed, trying backups");
                return self.load_from_backups(key);
            }
        };

        match StoredRecord::decode(&raw) {
            Ok(record) if !validate || record.verify() => Some(record.data),
            Ok(_) => {
                tracing::warn!(key = %key, "integrity check failed, trying backups");
                self.load_from_backups(key)
            }
            Err(err) => {
                tracing::warn!(key = %key, error = %err, "undecodable record, trying backups");
                self.load_from_backups(key)
            }
        }
    }

    // --- Pending changes ---

    /// Marks `key` as having unpersisted changes.
    pub fn mark_as_changed(&self, key: &str) {
        self.pending.mark(key);
    }

    /// Drops the pending mark for `key` without saving anything.
    pub fn unmark_changed(&self, key: &str) {
        self.pending.unmark(key);
    }

    /// Returns `true` if `key` has unpersisted changes.
    #[must_use]
    pub fn is_changed(&self, key: &str) -> bool {
        self.pending.contains(key)
    }

    /// All keys currently marked as changed, in arbitrary order.
    #[must_use]
    pub fn pending_changes(&self) -> Vec<String> {
        self.pending.snapshot()
    }

    /// Drops every pending mark without saving anything.
    pub fn clear_pending_changes(&self) {
        self.pending.clear();
    }

    /// Saves every pending key whose current payload `source` can produce.
    ///
    /// Keys the source knows nothing about stay pending untouched. Saves use
    /// default options, so failures also leave their keys pending; the next
    /// flush picks them up again.
    pub async fn flush_pending(&self, source: &dyn PayloadSource) -> FlushOutcome {
        let mut attempted = 0_usize;
        let mut saved = 0_usize;
        for key in self.pending.snapshot() {
            let Some(payload) = source.current_payload(&key) else {
                continue;
            };
            attempted += 1;
            if self.save(&key, payload, SaveOptions::default()).await {
                saved += 1;
            }
        }
        FlushOutcome {
            attempted,
            saved,
            still_pending: self.pending.snapshot(),
        }
    }

    // --- Deletion ---

    /// Removes the primary record for `key` and unmarks it as pending.
    ///
    /// Rotated backups survive unless `options.remove_backups` is set.
    /// Returns `false` if any backend deletion failed.
    pub fn remove(&self, key: &str, options: RemoveOptions) -> bool {
        let mut ok = true;
        if let Err(err) = self.backend.remove(&self.keyspace.primary(key)) {
            tracing::warn!(key = %key, error = %err, "failed to remove primary record");
            ok = false;
        }
        self.pending.unmark(key);

        if options.remove_backups {
            for (_, raw) in self.backups_for(key) {
                if let Err(err) = self.backend.remove(&raw) {
                    tracing::warn!(key = %key, raw_key = %raw, error = %err, "failed to remove backup");
                    ok = false;
                }
            }
        }
        ok
    }

    /// Deletes every raw key under the store's prefix and clears the
    /// pending set. Foreign keys sharing the backend are untouched.
    /// Returns the number of entries deleted.
    pub fn clear_all(&self) -> usize {
        let raw_keys = match self.backend.keys() {
            Ok(keys) => keys,
            Err(err) => {
                tracing::error!(error = %err, "key enumeration failed, nothing cleared");
                return 0;
            }
        };

        let mut removed = 0_usize;
        for raw in raw_keys {
            if self.keyspace.parse(&raw).is_none() {
                continue;
            }
            match self.backend.remove(&raw) {
                Ok(()) => removed += 1,
                Err(err) => {
                    tracing::warn!(raw_key = %raw, error = %err, "failed to remove entry");
                }
            }
        }
        self.pending.clear();
        removed
    }

    // --- Export and import ---

    /// Every logical key with a primary record, sorted.
    ///
    /// Reads nothing but the key listing; unlike
    /// [`export_all`](Self::export_all) it has no side effects on the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot enumerate its keys.
    pub fn logical_keys(&self) -> Result<Vec<String>, StoreError> {
        let raw_keys = self.backend.keys().map_err(StorageError::from)?;
        let mut keys: Vec<String> = raw_keys
            .into_iter()
            .filter_map(|raw| match self.keyspace.parse(&raw) {
                Some(RawKey::Primary { key }) => Some(key),
                _ => None,
            })
            .collect();
        keys.sort();
        Ok(keys)
    }

    /// Exports every readable primary payload into one checksummed
    /// [`Snapshot`] and stamps the last-backup meta entry with the current
    /// time.
    ///
    /// A corrupted key with no surviving backup is omitted from the
    /// snapshot (and logged) rather than exported as JSON null, which the
    /// import path would reject; the file a user downloads stays
    /// restorable.
    ///
    /// # Errors
    ///
    /// Returns an error only when the backend cannot enumerate its keys; the
    /// snapshot is assembled from whatever individual loads produce.
    pub fn export_all(&self) -> Result<Snapshot, StoreError> {
        let mut data = BTreeMap::new();
        for key in self.logical_keys()? {
            match self.try_load(&key, true) {
                Some(payload) => {
                    data.insert(key, payload);
                }
                None => {
                    tracing::warn!(key = %key, "unrecoverable record omitted from export");
                }
            }
        }

        let now = self.clock.now_millis();
        let snapshot = Snapshot::assemble(data, now);
        if let Err(err) = self
            .backend
            .set(&self.keyspace.meta(LAST_BACKUP_META), &now.to_string())
        {
            tracing::warn!(error = %err, "failed to stamp last-backup time");
        }
        tracing::debug!(entries = snapshot.len(), "exported snapshot");
        Ok(snapshot)
    }

    /// Replaces the store's contents with the payloads in `snapshot`.
    ///
    /// A full pre-import snapshot of the current store is written to the
    /// meta namespace first; if that write fails the import aborts without
    /// touching any record. Each payload is then saved with validation on
    /// and per-key backups off. The first failed key stops the import and
    /// rolls the already-written keys back to their pre-import payloads
    /// (best effort, logged). Returns `true` only if every key was written.
    pub async fn import_all(&self, snapshot: &Snapshot) -> bool {
        if !snapshot.verify() {
            tracing::warn!(
                entries = snapshot.len(),
                "snapshot checksum mismatch, relying on per-key validation"
            );
        }

        // Step 1: Preserve the current store state for rollback.
        let pre_import = match self.export_all() {
            Ok(snapshot) => snapshot,
            Err(err) => {
                tracing::error!(error = %err, "cannot snapshot current state, import aborted");
                return false;
            }
        };
        let encoded = match pre_import.encode() {
            Ok(raw) => raw,
            Err(err) => {
                tracing::error!(error = %err, "cannot encode pre-import snapshot, import aborted");
                return false;
            }
        };
        if let Err(err) = self
            .backend
            .set(&self.keyspace.meta(IMPORT_BACKUP_META), &encoded)
        {
            tracing::error!(error = %err, "cannot write pre-import snapshot, import aborted");
            return false;
        }

        // Step 2: Write every imported payload. Per-key backups stay off;
        // the pre-import snapshot is the rollback point.
        let options = SaveOptions {
            validate: true,
            backup: false,
            retry: true,
        };
        let mut written: Vec<&String> = Vec::new();
        for (key, payload) in &snapshot.data {
            if self.save(key, payload.clone(), options).await {
                written.push(key);
            } else {
                tracing::error!(key = %key, "import failed, rolling back written keys");
                self.rollback_import(&pre_import, &written).await;
                return false;
            }
        }

        tracing::info!(entries = snapshot.len(), "import complete");
        true
    }

    // --- Diagnostics ---

    /// Probes the backend and scans stored records for damage.
    ///
    /// Reports findings without repairing anything: a failed write/read
    /// probe, primaries that no longer decode as records, and raw keys
    /// under the prefix that belong to no known family.
    #[must_use]
    pub fn health_check(&self) -> HealthReport {
        let mut issues = Vec::new();

        // Probe: the backend must round-trip a write on the meta namespace.
        let probe_key = self.keyspace.meta(HEALTH_PROBE_META);
        let probe_value = self.clock.now_millis().to_string();
        match self.backend.set(&probe_key, &probe_value) {
            Ok(()) => {
                match self.backend.get(&probe_key) {
                    Ok(Some(read_back)) if read_back == probe_value => {}
                    Ok(_) => issues.push("storage probe read back the wrong value".to_string()),
                    Err(err) => issues.push(format!("storage probe read failed: {err}")),
                }
                if let Err(err) = self.backend.remove(&probe_key) {
                    issues.push(format!("storage probe cleanup failed: {err}"));
                }
            }
            Err(err) => issues.push(format!("storage not writable: {err}")),
        }

        // Scan: every primary must still decode as a record.
        match self.backend.keys() {
            Ok(raw_keys) => {
                for raw in raw_keys {
                    match self.keyspace.parse(&raw) {
                        Some(RawKey::Primary { .. }) => match self.backend.get(&raw) {
                            Ok(Some(bytes)) => {
                                if StoredRecord::decode(&bytes).is_err() {
                                    issues.push(format!("corrupted record: {raw}"));
                                }
                            }
                            Ok(None) => {}
                            Err(err) => issues.push(format!("unreadable record {raw}: {err}")),
                        },
                        Some(_) => {}
                        None if raw.starts_with(self.keyspace.prefix()) => {
                            issues.push(format!("unrecognized key under prefix: {raw}"));
                        }
                        None => {}
                    }
                }
            }
            Err(err) => issues.push(format!("key enumeration failed: {err}")),
        }

        HealthReport {
            healthy: issues.is_empty(),
            issues,
            pending_changes: self.pending.len(),
            auto_save_enabled: self.auto_save_enabled(),
        }
    }

    /// Space accounting for everything stored under the prefix.
    #[must_use]
    pub fn usage(&self) -> StorageUsage {
        let mut usage = StorageUsage {
            used_bytes: 0,
            primary_records: 0,
            backup_records: 0,
            meta_records: 0,
            capacity_bytes: self.backend.capacity_bytes(),
        };

        let raw_keys = match self.backend.keys() {
            Ok(keys) => keys,
            Err(err) => {
                tracing::warn!(error = %err, "key enumeration failed, usage is partial");
                return usage;
            }
        };
        for raw in raw_keys {
            let Some(family) = self.keyspace.parse(&raw) else {
                continue;
            };
            match family {
                RawKey::Primary { .. } => usage.primary_records += 1,
                RawKey::Backup { .. } => usage.backup_records += 1,
                RawKey::Meta { .. } => usage.meta_records += 1,
            }
            if let Ok(Some(value)) = self.backend.get(&raw) {
                usage.used_bytes += value.len() as u64;
            }
        }
        usage
    }

    /// When the store was last exported, epoch milliseconds.
    #[must_use]
    pub fn last_backup_at(&self) -> Option<i64> {
        self.backend
            .get(&self.keyspace.meta(LAST_BACKUP_META))
            .ok()
            .flatten()
            .and_then(|raw| raw.parse().ok())
    }

    // --- Listeners and auto-save gate ---

    /// Registers a callback for events on `key`; returns its handle.
    pub fn add_listener<F>(&self, key: &str, listener: F) -> ListenerId
    where
        F: Fn(&str, &StoreEvent) + Send + Sync + 'static,
    {
        self.listeners.add(key, listener)
    }

    /// Unregisters a callback. Returns `false` if the handle was unknown.
    pub fn remove_listener(&self, key: &str, id: ListenerId) -> bool {
        self.listeners.remove(key, id)
    }

    /// Gates scheduled auto-save flushes. The worker keeps ticking; while
    /// disabled its ticks are no-ops.
    pub fn enable_auto_save(&self, enabled: bool) {
        self.auto_save_enabled.store(enabled, Ordering::Relaxed);
    }

    /// Whether scheduled auto-save flushes are currently enabled.
    #[must_use]
    pub fn auto_save_enabled(&self) -> bool {
        self.auto_save_enabled.load(Ordering::Relaxed)
    }

    // --- Internals ---

    /// Marks a failed save: parks the key, notifies listeners, logs.
    fn fail_save(&self, key: &str, message: String) -> bool {
        tracing::error!(key = %key, message = %message, "save failed");
        self.pending.mark(key);
        self.listeners.notify(key, &StoreEvent::Error { message });
        false
    }

    /// Writes `value` with up to `max_attempts` tries, sleeping the
    /// configured fixed delay between them. No jitter, no backoff growth.
    async fn set_with_retry(
        &self,
        raw_key: &str,
        value: &str,
        max_attempts: u32,
    ) -> Result<(), StorageError> {
        let mut attempt = 0_u32;
        loop {
            attempt += 1;
            match self.backend.set(raw_key, value) {
                Ok(()) => return Ok(()),
                Err(err) if attempt < max_attempts => {
                    tracing::warn!(
                        raw_key = %raw_key,
                        attempt,
                        error = %err,
                        "write attempt failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Copies the current primary bytes into a fresh backup key, then evicts
    /// the oldest backups beyond the configured bound.
    fn backup_current(&self, key: &str) {
        let current = match self.backend.get(&self.keyspace.primary(key)) {
            Ok(Some(current)) => current,
            Ok(None) => return,
            Err(err) => {
                tracing::warn!(key = %key, error = %err, "could not read current value for backup");
                return;
            }
        };

        let backup_key = self.keyspace.backup(key, self.clock.now_millis());
        if let Err(err) = self.backend.set(&backup_key, &current) {
            tracing::warn!(key = %key, error = %err, "backup write failed, continuing with save");
            return;
        }
        self.prune_backups(key);
    }

    /// Deletes the oldest backups of `key` beyond `config.max_backups`.
    fn prune_backups(&self, key: &str) {
        for (_, raw) in self.backups_for(key).into_iter().skip(self.config.max_backups) {
            if let Err(err) = self.backend.remove(&raw) {
                tracing::warn!(key = %key, raw_key = %raw, error = %err, "failed to evict old backup");
            }
        }
    }

    /// All backup raw keys for `key`, newest first.
    fn backups_for(&self, key: &str) -> Vec<(i64, String)> {
        let raw_keys = match self.backend.keys() {
            Ok(keys) => keys,
            Err(err) => {
                tracing::warn!(key = %key, error = %err, "backup enumeration failed");
                return Vec::new();
            }
        };
        let mut backups: Vec<(i64, String)> = raw_keys
            .into_iter()
            .filter_map(|raw| match self.keyspace.parse(&raw) {
                Some(RawKey::Backup {
                    key: owner,
                    timestamp,
                }) if owner == key => Some((timestamp, raw)),
                _ => None,
            })
            .collect();
        backups.sort_by(|a, b| b.0.cmp(&a.0));
        backups
    }

    /// Newest backup payload for `key` whose own checksum verifies.
    fn load_from_backups(&self, key: &str) -> Option<Value> {
        for (timestamp, raw) in self.backups_for(key) {
            let bytes = match self.backend.get(&raw) {
                Ok(Some(bytes)) => bytes,
                Ok(None) => continue,
                Err(err) => {
                    tracing::warn!(key = %key, raw_key = %raw, error = %err, "backup read failed");
                    continue;
                }
            };
            match StoredRecord::decode(&bytes) {
                Ok(record) if record.verify() => {
                    tracing::warn!(
                        key = %key,
                        backup_timestamp = timestamp,
                        "recovered payload from backup"
                    );
                    return Some(record.data);
                }
                _ => {
                    tracing::debug!(key = %key, raw_key = %raw, "backup did not verify, skipping");
                }
            }
        }
        None
    }

    /// Restores `written` keys to their pre-import payloads.
    ///
    /// Keys absent (or null) in the pre-import snapshot are removed; the
    /// rest are saved back without validation or retries. Failures are
    /// logged and skipped.
    async fn rollback_import(&self, pre_import: &Snapshot, written: &[&String]) {
        let options = SaveOptions {
            validate: false,
            backup: false,
            retry: false,
        };
        for key in written {
            match pre_import.data.get(*key) {
                Some(old) if !old.is_null() => {
                    if !self.save(key, old.clone(), options).await {
                        tracing::error!(key = %key, "rollback save failed, key left imported");
                    }
                }
                _ => {
                    if !self.remove(key, RemoveOptions::default()) {
                        tracing::error!(key = %key, "rollback removal failed, key left imported");
                    }
                }
            }
        }
    }
}
