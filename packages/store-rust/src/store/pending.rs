//! Tracking of keys with unpersisted changes.
//!
//! A shared set of logical keys whose in-memory state is newer than what
//! storage holds. Keys enter when a feature marks them changed or a save
//! fails, and leave only when a save covering their latest mark succeeds
//! (or the set is explicitly cleared). Every mark carries a generation, so
//! a save that was already in flight when a new edit arrived cannot clear
//! the newer mark: the key stays pending and the next flush picks the edit
//! up. The auto-save worker drains this set every tick.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

/// Concurrent set of logical keys awaiting persistence, mark-stamped with
/// a monotonically increasing generation.
#[derive(Debug, Default)]
pub struct PendingSet {
    marks: DashMap<String, u64>,
    generation: AtomicU64,
}

impl PendingSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a key as having unpersisted changes, advancing its mark
    /// generation.
    ///
    /// Returns `true` if the key was not already pending.
    pub fn mark(&self, key: &str) -> bool {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        self.marks.insert(key.to_string(), generation).is_none()
    }

    /// The key's current mark generation, or `None` when it is not pending.
    ///
    /// A save records this before it starts writing and hands it back to
    /// [`unmark_if`](Self::unmark_if) on success.
    #[must_use]
    pub fn generation(&self, key: &str) -> Option<u64> {
        self.marks.get(key).map(|entry| *entry)
    }

    /// Clears a key unconditionally.
    ///
    /// Returns `true` if the key was pending.
    pub fn unmark(&self, key: &str) -> bool {
        self.marks.remove(key).is_some()
    }

    /// Clears a key only while its mark generation still equals `observed`.
    ///
    /// Marks that landed after `observed` was read stay in place; an
    /// `observed` of `None` never clears anything, so a save that started
    /// with the key unmarked cannot swallow a mark that arrived mid-write.
    /// Returns `true` if the key was cleared.
    pub fn unmark_if(&self, key: &str, observed: Option<u64>) -> bool {
        match observed {
            Some(generation) => self
                .marks
                .remove_if(key, |_, current| *current == generation)
                .is_some(),
            None => false,
        }
    }

    /// Returns `true` if the key has unpersisted changes.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.marks.contains_key(key)
    }

    /// Point-in-time list of pending keys, in no particular order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<String> {
        self.marks.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Drops every pending key without persisting anything.
    pub fn clear(&self) {
        self.marks.clear();
    }

    /// Number of pending keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.marks.len()
    }

    /// Returns `true` if no key is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }
}
