//! Error types for backends and whole-store operations.
//!
//! Expected per-key failures (validation rejection, checksum fallback,
//! exhausted retries) surface as boolean returns plus log lines, not as
//! `Err` values. The types here cover the failures that make an operation
//! meaningless as a whole: a backend that cannot be read or a document that
//! cannot be serialized.

/// Errors surfaced by storage backends.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A write would push the backend past its capacity.
    #[error("storage quota exceeded: {used} of {capacity} bytes in use")]
    QuotaExceeded {
        /// Bytes currently stored.
        used: u64,
        /// Configured capacity in bytes.
        capacity: u64,
    },
    /// Filesystem-level failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    /// Engine-specific failure (redb transaction errors and the like).
    #[error("backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

/// Errors from operations that are fallible as a whole, such as exporting
/// a snapshot.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend could not be read or written.
    #[error("storage backend failed: {0}")]
    Storage(#[from] StorageError),
    /// A record or snapshot could not be serialized.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}
