//! Record envelope for persisted payloads.
//!
//! Every value written through the store is wrapped in a [`StoredRecord`]
//! that carries the payload together with a wall-clock timestamp, the schema
//! version, and a rolling checksum of the payload. The envelope is what
//! actually lands in the backend, and what [`StoredRecord::verify`] checks
//! on the way back out.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::checksum::checksum_of;

/// Schema version stamped into every envelope and snapshot.
///
/// Bump only on incompatible envelope changes; readers may use it to route
/// future migrations.
pub const SCHEMA_VERSION: &str = "1.0.0";

/// A sealed payload as it is persisted: payload + timestamp + version +
/// checksum.
///
/// The JSON shape (`data`, `timestamp`, `version`, `checksum`) is shared
/// with the snapshots exported by legacy browser builds, so those files
/// remain readable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    /// The caller's payload, untouched.
    pub data: Value,
    /// Wall-clock time (millis since epoch) when the envelope was sealed.
    pub timestamp: i64,
    /// Schema version at seal time. See [`SCHEMA_VERSION`].
    pub version: String,
    /// Rolling checksum of the payload's compact serialization.
    pub checksum: String,
}

impl StoredRecord {
    /// Seals a payload into an envelope, stamping `now` and computing the
    /// payload checksum.
    ///
    /// # Examples
    ///
    /// ```
    /// use savepoint_core::record::StoredRecord;
    /// use serde_json::json;
    ///
    /// let record = StoredRecord::seal(json!({"crew": "north"}), 1_700_000_000_000);
    /// assert!(record.verify());
    /// ```
    #[must_use]
    pub fn seal(data: Value, now: i64) -> Self {
        let checksum = checksum_of(&data);
        Self {
            data,
            timestamp: now,
            version: SCHEMA_VERSION.to_string(),
            checksum,
        }
    }

    /// Returns `true` if the stored checksum matches a fresh checksum of the
    /// payload.
    ///
    /// A mismatch means the record was corrupted or edited outside the
    /// store; callers fall back to backups when this fails.
    #[must_use]
    pub fn verify(&self) -> bool {
        let actual = checksum_of(&self.data);
        if actual == self.checksum {
            return true;
        }
        tracing::debug!(
            expected = %self.checksum,
            actual = %actual,
            "record checksum mismatch"
        );
        false
    }

    /// Serializes the envelope to the compact JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parses an envelope from its JSON wire form.
    ///
    /// All four fields are required; anything else is a decode error, not a
    /// verification failure.
    ///
    /// # Errors
    ///
    /// Returns an error if `raw` is not valid JSON or is missing fields.
    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}
