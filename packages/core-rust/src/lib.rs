//! Savepoint Core — record envelopes, checksums, snapshots, and key namespacing.

pub mod checksum;
pub mod clock;
pub mod keys;
pub mod record;
pub mod snapshot;

pub use checksum::{checksum_of, rolling_checksum};
pub use clock::{Clock, ManualClock, SystemClock};
pub use keys::{validate_key, KeySpace, RawKey, DEFAULT_PREFIX};
pub use record::{StoredRecord, SCHEMA_VERSION};
pub use snapshot::{suggested_filename, Snapshot};
