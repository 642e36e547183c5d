//! In-memory working copies bound to store keys, with debounced saves.
//!
//! A [`DataSession`] owns the editing surface for one key: the host mutates
//! a working copy, the session tracks dirtiness and a quiet-period deadline,
//! and the store only ever sees whole-payload saves. Time is explicit in
//! this module; nothing here spawns a timer. The host (or a [`SessionPool`]
//! handed to the auto-save worker) decides what "now" is and sweeps the
//! sessions that are due.

use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::autosave::PayloadSource;
use crate::store::{LoadOptions, PersistentStore, RemoveOptions, SaveOptions};

const DEFAULT_DEBOUNCE_MS: u64 = 1_000;
const FORM_DEBOUNCE_MS: u64 = 2_000;

/// Tuning for a [`DataSession`].
#[derive(Clone, Copy, Debug)]
pub struct SessionOptions {
    /// Verify checksums when loading and reject null payloads when saving.
    pub validate: bool,
    /// Quiet period after the last update before a flush becomes due.
    pub debounce_ms: u64,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            validate: true,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
        }
    }
}

impl SessionOptions {
    /// Defaults for form payloads: a longer quiet period than plain
    /// sessions, so a burst of field edits collapses into one save.
    #[must_use]
    pub fn form() -> Self {
        Self {
            debounce_ms: FORM_DEBOUNCE_MS,
            ..Self::default()
        }
    }
}

#[derive(Debug)]
struct SessionState {
    working: Value,
    dirty: bool,
    last_change: Option<i64>,
    last_loaded: Option<i64>,
    last_saved: Option<i64>,
}

/// A per-key working copy with an explicit-time save debounce.
///
/// Opening a session reads the stored payload once; afterwards the host
/// edits the in-memory copy and the session tracks when that copy is due
/// for persistence. All methods take `&self`; share a session as
/// `Arc<DataSession>` when a pool or worker also needs it.
pub struct DataSession {
    store: Arc<PersistentStore>,
    key: String,
    initial: Value,
    options: SessionOptions,
    state: Mutex<SessionState>,
}

impl DataSession {
    /// Opens a session over `key`, seeding the working copy from the store
    /// or from `initial` when nothing readable is stored.
    #[must_use]
    pub fn open(
        store: Arc<PersistentStore>,
        key: &str,
        initial: Value,
        options: SessionOptions,
    ) -> Self {
        let stored = store.load(
            key,
            LoadOptions {
                validate: options.validate,
                fallback: Value::Null,
            },
        );
        let (working, last_loaded) = if stored.is_null() {
            (initial.clone(), None)
        } else {
            (stored, Some(store.now()))
        };

        Self {
            store,
            key: key.to_string(),
            initial,
            options,
            state: Mutex::new(SessionState {
                working,
                dirty: false,
                last_change: None,
                last_loaded,
                last_saved: None,
            }),
        }
    }

    // --- Working copy ---

    /// The key this session persists under.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Clones the current working copy.
    #[must_use]
    pub fn payload(&self) -> Value {
        self.state.lock().working.clone()
    }

    /// Returns `true` while the working copy has edits no save has covered.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.state.lock().dirty
    }

    /// When the stored payload was read at open, if one existed.
    #[must_use]
    pub fn last_loaded(&self) -> Option<i64> {
        self.state.lock().last_loaded
    }

    /// When this session last saved successfully.
    #[must_use]
    pub fn last_saved(&self) -> Option<i64> {
        self.state.lock().last_saved
    }

    /// Replaces the working copy, marking the session and the store key as
    /// changed.
    pub fn update(&self, value: Value) {
        let now = self.store.now();
        {
            let mut state = self.state.lock();
            state.working = value;
            state.dirty = true;
            state.last_change = Some(now);
        }
        self.store.mark_as_changed(&self.key);
    }

    /// Discards edits in favor of the initial payload.
    ///
    /// The session stays dirty: the restored payload is not persisted until
    /// the next save.
    pub fn reset(&self) {
        self.restore(true);
    }

    /// Deletes the stored entry and restores the initial payload.
    ///
    /// Rotated backups survive. The session comes out clean, as if it had
    /// just been opened with nothing stored.
    pub fn clear(&self) {
        self.store.remove(&self.key, RemoveOptions::default());
        let mut state = self.state.lock();
        state.working = self.initial.clone();
        state.dirty = false;
        state.last_change = None;
        state.last_saved = None;
    }

    // --- Debounce ---

    /// When the debounced save becomes due, or `None` while clean.
    #[must_use]
    pub fn save_deadline(&self) -> Option<i64> {
        let state = self.state.lock();
        if !state.dirty {
            return None;
        }
        let last_change = state.last_change?;
        Some(last_change.saturating_add(self.debounce_millis()))
    }

    /// Saves the working copy when the deadline has passed.
    ///
    /// Returns `true` only when a save ran and succeeded. Clean sessions
    /// and sessions still inside their quiet period are left alone.
    pub async fn flush_if_due(&self, now: i64) -> bool {
        match self.save_deadline() {
            Some(deadline) if deadline <= now => self.save_now().await,
            _ => false,
        }
    }

    /// Saves the working copy immediately, bypassing the debounce.
    ///
    /// On failure the store has already parked the key as pending and the
    /// session stays dirty.
    pub async fn save_now(&self) -> bool {
        let (payload, change_mark) = {
            let state = self.state.lock();
            (state.working.clone(), state.last_change)
        };
        let options = SaveOptions {
            validate: self.options.validate,
            ..SaveOptions::default()
        };
        if !self.store.save(&self.key, payload, options).await {
            return false;
        }

        let now = self.store.now();
        let mut state = self.state.lock();
        state.last_saved = Some(now);
        // An update that landed while the save was in flight keeps the
        // session dirty; only the captured copy is known to be persisted.
        if state.last_change == change_mark {
            state.dirty = false;
            state.last_change = None;
        }
        true
    }

    /// Swaps the working copy back to `initial`, dirty or clean as asked,
    /// keeping the store's pending mark in step.
    fn restore(&self, dirty: bool) {
        let now = self.store.now();
        {
            let mut state = self.state.lock();
            state.working = self.initial.clone();
            state.dirty = dirty;
            state.last_change = dirty.then_some(now);
        }
        if dirty {
            self.store.mark_as_changed(&self.key);
        } else {
            self.store.unmark_changed(&self.key);
        }
    }

    fn debounce_millis(&self) -> i64 {
        i64::try_from(self.options.debounce_ms).unwrap_or(i64::MAX)
    }
}

/// A [`DataSession`] over a JSON object, with per-field touched tracking.
///
/// Editing a field marks it touched for the life of the form; a field is
/// dirty only while its value differs from the initial object.
pub struct FormSession {
    inner: Arc<DataSession>,
    touched: Mutex<BTreeSet<String>>,
}

impl FormSession {
    /// Opens a form session whose payload is the object in `initial`.
    #[must_use]
    pub fn open(
        store: Arc<PersistentStore>,
        key: &str,
        initial: Map<String, Value>,
        options: SessionOptions,
    ) -> Self {
        Self {
            inner: Arc::new(DataSession::open(store, key, Value::Object(initial), options)),
            touched: Mutex::new(BTreeSet::new()),
        }
    }

    /// The underlying session, shareable with a [`SessionPool`].
    #[must_use]
    pub fn session(&self) -> Arc<DataSession> {
        Arc::clone(&self.inner)
    }

    /// The key this form persists under.
    #[must_use]
    pub fn key(&self) -> &str {
        self.inner.key()
    }

    /// Clones the current form object.
    #[must_use]
    pub fn fields(&self) -> Map<String, Value> {
        match self.inner.payload() {
            Value::Object(map) => map,
            _ => self.initial_object(),
        }
    }

    /// Sets one field and marks it touched.
    pub fn update_field(&self, name: &str, value: Value) {
        self.update_fields([(name.to_string(), value)]);
    }

    /// Sets a batch of fields as one update, marking each touched.
    pub fn update_fields<I>(&self, fields: I)
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let mut object = self.fields();
        {
            let mut touched = self.touched.lock();
            for (name, value) in fields {
                touched.insert(name.clone());
                object.insert(name, value);
            }
        }
        self.inner.update(Value::Object(object));
    }

    /// Returns `true` once `name` has been edited through this form.
    #[must_use]
    pub fn is_field_touched(&self, name: &str) -> bool {
        self.touched.lock().contains(name)
    }

    /// Returns `true` while the current value of `name` differs from the
    /// initial object.
    #[must_use]
    pub fn is_field_dirty(&self, name: &str) -> bool {
        self.fields().get(name) != self.initial_object().get(name)
    }

    /// Whether any unsaved edits exist.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.inner.is_dirty()
    }

    /// When the debounced save becomes due, or `None` while clean.
    #[must_use]
    pub fn save_deadline(&self) -> Option<i64> {
        self.inner.save_deadline()
    }

    /// Saves the form when its deadline has passed.
    pub async fn flush_if_due(&self, now: i64) -> bool {
        self.inner.flush_if_due(now).await
    }

    /// Saves the form immediately.
    pub async fn save_now(&self) -> bool {
        self.inner.save_now().await
    }

    /// Restores the initial object and clears every touched flag.
    ///
    /// In-memory only: the form comes out clean and whatever was last
    /// persisted stays persisted.
    pub fn reset_form(&self) {
        self.inner.restore(false);
        self.touched.lock().clear();
    }

    fn initial_object(&self) -> Map<String, Value> {
        match &self.inner.initial {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        }
    }
}

/// Registry of shared sessions, keyed by store key.
///
/// Implements [`PayloadSource`] so the auto-save worker can ask for a dirty
/// session's working copy when its key comes up in a flush.
pub struct SessionPool {
    store: Arc<PersistentStore>,
    sessions: DashMap<String, Arc<DataSession>>,
}

impl SessionPool {
    /// Creates an empty pool over `store`.
    #[must_use]
    pub fn new(store: Arc<PersistentStore>) -> Self {
        Self {
            store,
            sessions: DashMap::new(),
        }
    }

    /// Returns the session for `key`, opening one when the pool has none.
    ///
    /// `initial` and `options` apply only to a freshly opened session.
    pub fn open(&self, key: &str, initial: Value, options: SessionOptions) -> Arc<DataSession> {
        self.sessions
            .entry(key.to_string())
            .or_insert_with(|| {
                Arc::new(DataSession::open(
                    Arc::clone(&self.store),
                    key,
                    initial,
                    options,
                ))
            })
            .value()
            .clone()
    }

    /// Places an externally opened session under the pool's management.
    pub fn adopt(&self, session: Arc<DataSession>) {
        self.sessions.insert(session.key().to_string(), session);
    }

    /// The pooled session for `key`, if any.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Arc<DataSession>> {
        self.sessions.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Drops the session for `key` from the pool without saving it.
    pub fn close(&self, key: &str) -> Option<Arc<DataSession>> {
        self.sessions.remove(key).map(|(_, session)| session)
    }

    /// Number of pooled sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns `true` when no sessions are pooled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// The earliest save deadline over every dirty session.
    #[must_use]
    pub fn next_deadline(&self) -> Option<i64> {
        self.sessions
            .iter()
            .filter_map(|entry| entry.value().save_deadline())
            .min()
    }

    /// Saves every session whose deadline has passed; returns the saved
    /// keys. Failed saves leave their sessions dirty for a later sweep.
    pub async fn flush_due(&self, now: i64) -> Vec<String> {
        // Collect first so no map guard is held across an await.
        let due: Vec<Arc<DataSession>> = self
            .sessions
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .save_deadline()
                    .is_some_and(|deadline| deadline <= now)
            })
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut saved = Vec::new();
        for session in due {
            if session.save_now().await {
                saved.push(session.key().to_string());
            }
        }
        saved
    }
}

impl PayloadSource for SessionPool {
    fn current_payload(&self, key: &str) -> Option<Value> {
        let session = self.get(key)?;
        session.is_dirty().then(|| session.payload())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use savepoint_core::clock::ManualClock;
    use serde_json::json;

    use super::*;
    use crate::autosave::AutoSaveWorker;
    use crate::config::StoreConfig;
    use crate::error::StorageError;
    use crate::store::backends::MemoryBackend;
    use crate::store::StorageBackend;

    /// Backend whose first write fails, forcing a save into its retry sleep.
    struct StallOnce {
        inner: MemoryBackend,
        failed_once: AtomicBool,
    }

    impl StallOnce {
        fn new() -> Self {
            Self {
                inner: MemoryBackend::new(),
                failed_once: AtomicBool::new(false),
            }
        }
    }

    impl StorageBackend for StallOnce {
        fn get(&self, raw_key: &str) -> Result<Option<String>, StorageError> {
            self.inner.get(raw_key)
        }

        fn set(&self, raw_key: &str, value: &str) -> Result<(), StorageError> {
            if self.failed_once.swap(true, Ordering::SeqCst) {
                self.inner.set(raw_key, value)
            } else {
                Err(StorageError::Backend(anyhow::anyhow!(
                    "injected write failure"
                )))
            }
        }

        fn remove(&self, raw_key: &str) -> Result<(), StorageError> {
            self.inner.remove(raw_key)
        }

        fn keys(&self) -> Result<Vec<String>, StorageError> {
            self.inner.keys()
        }
    }

    fn make_store() -> (Arc<ManualClock>, Arc<PersistentStore>) {
        let clock = Arc::new(ManualClock::new(1_000));
        let store = Arc::new(PersistentStore::new(
            Arc::new(MemoryBackend::new()),
            StoreConfig::default(),
            clock.clone(),
        ));
        (clock, store)
    }

    fn profile_fields() -> Map<String, Value> {
        let Value::Object(fields) = json!({"email": "", "name": ""}) else {
            unreachable!()
        };
        fields
    }

    // --- Data sessions ---

    #[tokio::test]
    async fn open_prefers_stored_payload() {
        let (clock, store) = make_store();
        assert!(
            store
                .save("settings", json!({"theme": "dark"}), SaveOptions::default())
                .await
        );

        clock.set(5_000);
        let session = DataSession::open(store, "settings", json!({}), SessionOptions::default());

        assert_eq!(session.payload(), json!({"theme": "dark"}));
        assert_eq!(session.last_loaded(), Some(5_000));
        assert_eq!(session.last_saved(), None);
        assert!(!session.is_dirty());
    }

    #[test]
    fn open_falls_back_to_initial() {
        let (_clock, store) = make_store();
        let session = DataSession::open(
            store,
            "settings",
            json!({"theme": "light"}),
            SessionOptions::default(),
        );

        assert_eq!(session.payload(), json!({"theme": "light"}));
        assert_eq!(session.last_loaded(), None);
        assert!(!session.is_dirty());
        assert_eq!(session.save_deadline(), None);
    }

    #[test]
    fn update_marks_session_and_store() {
        let (_clock, store) = make_store();
        let session =
            DataSession::open(store.clone(), "panel", json!({}), SessionOptions::default());

        session.update(json!({"collapsed": true}));

        assert!(session.is_dirty());
        assert!(store.is_changed("panel"));
        assert_eq!(session.payload(), json!({"collapsed": true}));
    }

    #[test]
    fn save_deadline_tracks_the_last_update() {
        let (clock, store) = make_store();
        let session = DataSession::open(store, "doc", json!({}), SessionOptions::default());

        session.update(json!(1));
        assert_eq!(session.save_deadline(), Some(2_000));

        clock.set(1_400);
        session.update(json!(2));
        assert_eq!(session.save_deadline(), Some(2_400));
    }

    #[tokio::test]
    async fn flush_if_due_waits_out_the_quiet_period() {
        let (clock, store) = make_store();
        let session = DataSession::open(store.clone(), "doc", json!({}), SessionOptions::default());
        session.update(json!({"body": "draft"}));

        assert!(!session.flush_if_due(1_999).await);
        assert_eq!(store.load("doc", LoadOptions::default()), Value::Null);

        clock.set(2_000);
        assert!(session.flush_if_due(2_000).await);
        assert_eq!(
            store.load("doc", LoadOptions::default()),
            json!({"body": "draft"})
        );
        assert!(!session.is_dirty());
        assert_eq!(session.last_saved(), Some(2_000));
    }

    #[tokio::test]
    async fn save_now_persists_immediately() {
        let (_clock, store) = make_store();
        let session = DataSession::open(store.clone(), "doc", json!({}), SessionOptions::default());
        session.update(json!({"n": 7}));

        assert!(session.save_now().await);

        assert_eq!(store.load("doc", LoadOptions::default()), json!({"n": 7}));
        assert!(!session.is_dirty());
        assert!(!store.is_changed("doc"));
        assert_eq!(session.save_deadline(), None);
    }

    #[tokio::test]
    async fn failed_save_keeps_the_session_dirty() {
        let (_clock, store) = make_store();
        let session = DataSession::open(store.clone(), "doc", json!({}), SessionOptions::default());

        session.update(Value::Null);

        assert!(!session.save_now().await);
        assert!(session.is_dirty());
        assert!(store.is_changed("doc"));
        assert_eq!(session.last_saved(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn update_during_a_save_keeps_the_session_dirty() {
        let clock = Arc::new(ManualClock::new(1_000));
        let store = Arc::new(PersistentStore::new(
            Arc::new(StallOnce::new()),
            StoreConfig::default(),
            clock.clone(),
        ));
        let session = Arc::new(DataSession::open(
            store.clone(),
            "doc",
            json!({}),
            SessionOptions::default(),
        ));

        session.update(json!("first"));
        let saving = tokio::spawn({
            let session = session.clone();
            async move { session.save_now().await }
        });

        // Land a second update while the save sits in its retry sleep.
        tokio::time::sleep(Duration::from_millis(500)).await;
        clock.set(1_500);
        session.update(json!("second"));

        assert!(saving.await.expect("save task panicked"));
        assert!(session.is_dirty());
        assert_eq!(session.payload(), json!("second"));
        assert_eq!(store.load("doc", LoadOptions::default()), json!("first"));
        // The store also still tracks the key, so pending-set flushes
        // (auto-save, shutdown) will pick the newer edit up.
        assert!(store.is_changed("doc"));
    }

    #[tokio::test(start_paused = true)]
    async fn edit_during_a_save_is_flushed_later() {
        let clock = Arc::new(ManualClock::new(1_000));
        let store = Arc::new(PersistentStore::new(
            Arc::new(StallOnce::new()),
            StoreConfig::default(),
            clock.clone(),
        ));
        let pool = Arc::new(SessionPool::new(store.clone()));
        let session = pool.open("doc", json!({}), SessionOptions::default());

        session.update(json!("first"));
        let saving = tokio::spawn({
            let session = session.clone();
            async move { session.save_now().await }
        });
        tokio::time::sleep(Duration::from_millis(500)).await;
        clock.set(1_500);
        session.update(json!("second"));
        assert!(saving.await.expect("save task panicked"));

        // The newer edit stayed pending; one flush persists it.
        assert!(store.is_changed("doc"));
        let outcome = store.flush_pending(pool.as_ref()).await;
        assert_eq!(outcome.saved, 1);
        assert!(outcome.still_pending.is_empty());
        assert_eq!(store.load("doc", LoadOptions::default()), json!("second"));
    }

    #[tokio::test]
    async fn reset_queues_the_initial_payload() {
        let (clock, store) = make_store();
        let session = DataSession::open(
            store.clone(),
            "filters",
            json!({"sort": "asc"}),
            SessionOptions::default(),
        );
        session.update(json!({"sort": "desc"}));
        assert!(session.save_now().await);

        clock.set(10_000);
        session.reset();

        assert_eq!(session.payload(), json!({"sort": "asc"}));
        assert!(session.is_dirty());
        assert_eq!(session.save_deadline(), Some(11_000));
        assert!(session.flush_if_due(11_000).await);
        assert_eq!(
            store.load("filters", LoadOptions::default()),
            json!({"sort": "asc"})
        );
    }

    #[tokio::test]
    async fn clear_removes_the_stored_entry() {
        let (_clock, store) = make_store();
        let session = DataSession::open(
            store.clone(),
            "doc",
            json!({"fresh": true}),
            SessionOptions::default(),
        );
        session.update(json!({"fresh": false}));
        assert!(session.save_now().await);

        session.clear();

        assert_eq!(store.load("doc", LoadOptions::default()), Value::Null);
        assert_eq!(session.payload(), json!({"fresh": true}));
        assert!(!session.is_dirty());
        assert!(!store.is_changed("doc"));
        assert_eq!(session.last_saved(), None);
    }

    // --- Form sessions ---

    #[test]
    fn form_updates_track_touched_fields() {
        let (_clock, store) = make_store();
        let form = FormSession::open(store, "profile", profile_fields(), SessionOptions::form());

        form.update_field("name", json!("Ada"));

        assert!(form.is_field_touched("name"));
        assert!(!form.is_field_touched("email"));
        assert!(form.is_dirty());
        assert_eq!(form.fields()["name"], json!("Ada"));
    }

    #[test]
    fn field_dirty_compares_against_the_initial_value() {
        let (_clock, store) = make_store();
        let form = FormSession::open(store, "profile", profile_fields(), SessionOptions::form());

        form.update_field("name", json!("Ada"));
        assert!(form.is_field_dirty("name"));

        // Typing the original value back leaves the field touched but clean.
        form.update_field("name", json!(""));
        assert!(!form.is_field_dirty("name"));
        assert!(form.is_field_touched("name"));
        assert!(!form.is_field_dirty("missing"));
    }

    #[test]
    fn update_fields_applies_a_batch() {
        let (_clock, store) = make_store();
        let form = FormSession::open(store, "profile", profile_fields(), SessionOptions::form());

        form.update_fields([
            ("name".to_string(), json!("Ada")),
            ("email".to_string(), json!("ada@example.com")),
        ]);

        assert!(form.is_field_touched("name"));
        assert!(form.is_field_touched("email"));
        assert_eq!(
            form.session().payload(),
            json!({"email": "ada@example.com", "name": "Ada"})
        );
    }

    #[tokio::test]
    async fn form_reset_keeps_the_stored_entry() {
        let (_clock, store) = make_store();
        let form = FormSession::open(
            store.clone(),
            "profile",
            profile_fields(),
            SessionOptions::form(),
        );

        form.update_field("name", json!("Ada"));
        assert!(form.save_now().await);

        form.update_field("name", json!("Bea"));
        form.reset_form();

        assert!(!form.is_dirty());
        assert!(!form.is_field_touched("name"));
        assert!(!store.is_changed("profile"));
        assert_eq!(form.fields(), profile_fields());
        // The reset is in-memory only; the last save still stands.
        assert_eq!(
            store.load("profile", LoadOptions::default()),
            json!({"email": "", "name": "Ada"})
        );
    }

    #[test]
    fn form_debounce_defaults_longer() {
        assert_eq!(SessionOptions::default().debounce_ms, 1_000);
        assert_eq!(SessionOptions::form().debounce_ms, 2_000);

        let (_clock, store) = make_store();
        let form = FormSession::open(store, "profile", profile_fields(), SessionOptions::form());
        form.update_field("name", json!("Ada"));
        assert_eq!(form.save_deadline(), Some(3_000));
    }

    // --- Session pool ---

    #[test]
    fn pool_reuses_open_sessions() {
        let (_clock, store) = make_store();
        let pool = SessionPool::new(store);

        let first = pool.open("a", json!({}), SessionOptions::default());
        let second = pool.open("a", json!({"ignored": true}), SessionOptions::default());

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn pool_serves_only_dirty_payloads() {
        let (_clock, store) = make_store();
        let pool = SessionPool::new(store);
        let alpha = pool.open("alpha", json!({}), SessionOptions::default());
        let _beta = pool.open("beta", json!({}), SessionOptions::default());

        alpha.update(json!({"edited": true}));

        assert_eq!(pool.current_payload("alpha"), Some(json!({"edited": true})));
        assert_eq!(pool.current_payload("beta"), None);
        assert_eq!(pool.current_payload("unknown"), None);
    }

    #[test]
    fn pool_adopts_and_closes_sessions() {
        let (_clock, store) = make_store();
        let pool = SessionPool::new(store.clone());
        let form = FormSession::open(store, "profile", profile_fields(), SessionOptions::form());

        pool.adopt(form.session());
        assert!(pool.get("profile").is_some());

        form.update_field("name", json!("Ada"));
        assert_eq!(
            pool.current_payload("profile"),
            Some(json!({"email": "", "name": "Ada"}))
        );

        assert!(pool.close("profile").is_some());
        assert!(pool.is_empty());
        assert!(pool.get("profile").is_none());
    }

    #[tokio::test]
    async fn pool_flush_due_sweeps_expired_sessions() {
        let (clock, store) = make_store();
        let pool = SessionPool::new(store.clone());
        let alpha = pool.open("alpha", json!({}), SessionOptions::default());
        let beta = pool.open("beta", json!({}), SessionOptions::default());

        alpha.update(json!(1));
        clock.set(1_800);
        beta.update(json!(2));

        assert_eq!(pool.next_deadline(), Some(2_000));
        let saved = pool.flush_due(2_000).await;
        assert_eq!(saved, vec!["alpha".to_string()]);
        assert!(!alpha.is_dirty());
        assert!(beta.is_dirty());
        assert_eq!(pool.next_deadline(), Some(2_800));
        assert_eq!(store.load("alpha", LoadOptions::default()), json!(1));
    }

    // --- Worker integration ---

    #[tokio::test(start_paused = true)]
    async fn auto_save_worker_drains_pool_sessions() {
        let (_clock, store) = make_store();
        let pool = Arc::new(SessionPool::new(store.clone()));
        let session = pool.open("notes", json!({}), SessionOptions::default());
        session.update(json!({"body": "remember"}));

        let mut worker = AutoSaveWorker::start(store.clone(), pool.clone(), 100);
        tokio::time::sleep(Duration::from_millis(250)).await;
        worker.stop().await;

        assert_eq!(
            store.load("notes", LoadOptions::default()),
            json!({"body": "remember"})
        );
        assert!(!store.is_changed("notes"));
        // The worker saved through the store; a session's own dirty flag
        // clears only when the session itself saves.
        assert!(session.is_dirty());
    }
}
