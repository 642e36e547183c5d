//! Whole-store snapshots for export and import.
//!
//! A [`Snapshot`] bundles every primary payload into one checksummed JSON
//! document. Exports produce one, imports consume one, and the checksum
//! covers the full data map so a truncated or hand-edited file is rejected
//! before any of it is written back.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::checksum::checksum_of;
use crate::record::SCHEMA_VERSION;

/// A point-in-time export of all primary payloads, keyed by logical key.
///
/// `data` is a `BTreeMap` so exports are key-sorted and byte-stable for a
/// given store state, which keeps snapshot files diffable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Logical key to payload. Payloads are stored bare, without their
    /// record envelopes.
    pub data: BTreeMap<String, Value>,
    /// Wall-clock time (millis since epoch) when the snapshot was taken.
    pub timestamp: i64,
    /// Schema version at export time.
    pub version: String,
    /// Rolling checksum of the data map's compact serialization.
    pub checksum: String,
}

impl Snapshot {
    /// Assembles a snapshot from collected payloads, stamping `now` and
    /// checksumming the data map.
    #[must_use]
    pub fn assemble(data: BTreeMap<String, Value>, now: i64) -> Self {
        let checksum = data_checksum(&data);
        Self {
            data,
            timestamp: now,
            version: SCHEMA_VERSION.to_string(),
            checksum,
        }
    }

    /// Returns `true` if the stored checksum matches a fresh checksum of
    /// the data map.
    #[must_use]
    pub fn verify(&self) -> bool {
        let actual = data_checksum(&self.data);
        if actual == self.checksum {
            return true;
        }
        tracing::debug!(
            expected = %self.checksum,
            actual = %actual,
            entries = self.data.len(),
            "snapshot checksum mismatch"
        );
        false
    }

    /// Number of payloads in the snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the snapshot holds no payloads.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Serializes to compact JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Serializes to pretty-printed JSON, the format written to download
    /// files so they stay human-inspectable.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Parses a snapshot from JSON. Accepts both compact and pretty forms.
    ///
    /// # Errors
    ///
    /// Returns an error if `raw` is not valid JSON or is missing fields.
    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// Checksum of the data map alone, over its compact key-ordered
/// serialization. The envelope fields are excluded so re-stamping a
/// snapshot's timestamp does not invalidate it.
fn data_checksum(data: &BTreeMap<String, Value>) -> String {
    let map: serde_json::Map<String, Value> =
        data.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    checksum_of(&Value::Object(map))
}

/// Default file name for a snapshot download, e.g.
/// `savepoint-backup-2026-08-22.json`.
#[must_use]
pub fn suggested_filename(now: DateTime<Utc>) -> String {
    format!("savepoint-backup-{}.json", now.format("%Y-%m-%d"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn sample_data() -> BTreeMap<String, Value> {
        let mut data = BTreeMap::new();
        data.insert("customers".to_string(), json!([{"id": 1}, {"id": 2}]));
        data.insert("route-plan".to_string(), json!({"stops": 7}));
        data
    }

    #[test]
    fn assemble_then_verify() {
        let snapshot = Snapshot::assemble(sample_data(), 1_000);
        assert!(snapshot.verify());
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.version, SCHEMA_VERSION);
    }

    #[test]
    fn empty_snapshot_is_valid() {
        let snapshot = Snapshot::assemble(BTreeMap::new(), 1_000);
        assert!(snapshot.verify());
        assert!(snapshot.is_empty());
    }

    #[test]
    fn verify_detects_entry_edit() {
        let mut snapshot = Snapshot::assemble(sample_data(), 1_000);
        snapshot
            .data
            .insert("route-plan".to_string(), json!({"stops": 8}));
        assert!(!snapshot.verify());
    }

    #[test]
    fn verify_detects_entry_removal() {
        let mut snapshot = Snapshot::assemble(sample_data(), 1_000);
        snapshot.data.remove("customers");
        assert!(!snapshot.verify());
    }

    #[test]
    fn restamping_timestamp_keeps_snapshot_valid() {
        let mut snapshot = Snapshot::assemble(sample_data(), 1_000);
        snapshot.timestamp = 2_000;
        assert!(snapshot.verify());
    }

    #[test]
    fn encode_decode_roundtrip() {
        let snapshot = Snapshot::assemble(sample_data(), 1_000);
        let compact = snapshot.encode().expect("encode");
        let pretty = snapshot.encode_pretty().expect("encode pretty");
        assert_eq!(Snapshot::decode(&compact).expect("decode"), snapshot);
        assert_eq!(Snapshot::decode(&pretty).expect("decode pretty"), snapshot);
    }

    #[test]
    fn decode_rejects_missing_data_field() {
        let raw = r#"{"timestamp":5,"version":"1.0.0","checksum":"0"}"#;
        assert!(Snapshot::decode(raw).is_err());
    }

    #[test]
    fn suggested_filename_is_date_stamped() {
        let date = Utc.with_ymd_and_hms(2025, 3, 9, 14, 30, 0).unwrap();
        assert_eq!(suggested_filename(date), "savepoint-backup-2025-03-09.json");
    }
}
