//! Key namespacing for shared backends.
//!
//! Backends are flat string-to-string maps that other applications may also
//! write to, so every raw key the store touches is derived from a
//! [`KeySpace`] prefix. Three families exist under one prefix:
//!
//! - primary:  `{prefix}-{key}`
//! - backup:   `{prefix}-backup-{key}-{timestamp}`
//! - meta:     `{prefix}-meta-{name}`
//!
//! [`KeySpace::parse`] is the single inverse of all three builders; scans
//! over a backend classify raw keys with it and skip anything foreign.

/// Prefix used when no other is configured.
pub const DEFAULT_PREFIX: &str = "savepoint-data";

/// Marker that starts the backup family, directly after the prefix.
const BACKUP_MARKER: &str = "backup-";

/// Marker that starts the meta family, directly after the prefix.
const META_MARKER: &str = "meta-";

/// A classified raw key, as returned by [`KeySpace::parse`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawKey {
    /// A primary record: `{prefix}-{key}`.
    Primary {
        /// The logical key.
        key: String,
    },
    /// A rotated backup: `{prefix}-backup-{key}-{timestamp}`.
    Backup {
        /// The logical key the backup belongs to.
        key: String,
        /// Wall-clock millis when the backup was written.
        timestamp: i64,
    },
    /// Store-internal metadata: `{prefix}-meta-{name}`.
    Meta {
        /// The metadata entry name.
        name: String,
    },
}

/// Builds and parses the raw keys for one store prefix.
#[derive(Debug, Clone)]
pub struct KeySpace {
    prefix: String,
}

impl KeySpace {
    /// Creates a key space over the given prefix.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// The configured prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Raw key for a primary record.
    #[must_use]
    pub fn primary(&self, key: &str) -> String {
        format!("{}-{key}", self.prefix)
    }

    /// Raw key for a backup of `key` taken at `timestamp`.
    ///
    /// The timestamp is part of the key, so backups written at distinct
    /// times never collide and sort chronologically once parsed.
    #[must_use]
    pub fn backup(&self, key: &str, timestamp: i64) -> String {
        format!("{}-{BACKUP_MARKER}{key}-{timestamp}", self.prefix)
    }

    /// Raw key for a store-internal metadata entry.
    #[must_use]
    pub fn meta(&self, name: &str) -> String {
        format!("{}-{META_MARKER}{name}", self.prefix)
    }

    /// Classifies a raw key from the backend.
    ///
    /// Returns `None` for keys outside this prefix and for malformed
    /// members of the namespace (empty key, non-numeric backup timestamp).
    /// Backup parsing splits on the last `-`, so logical keys containing
    /// dashes survive the round trip.
    #[must_use]
    pub fn parse(&self, raw: &str) -> Option<RawKey> {
        let rest = raw.strip_prefix(&self.prefix)?.strip_prefix('-')?;
        if let Some(backup) = rest.strip_prefix(BACKUP_MARKER) {
            let (key, stamp) = backup.rsplit_once('-')?;
            let timestamp = stamp.parse::<i64>().ok()?;
            if key.is_empty() {
                return None;
            }
            Some(RawKey::Backup {
                key: key.to_string(),
                timestamp,
            })
        } else if let Some(name) = rest.strip_prefix(META_MARKER) {
            if name.is_empty() {
                return None;
            }
            Some(RawKey::Meta {
                name: name.to_string(),
            })
        } else if rest.is_empty() {
            None
        } else {
            Some(RawKey::Primary {
                key: rest.to_string(),
            })
        }
    }
}

impl Default for KeySpace {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}

/// Returns `true` if `key` is usable as a logical key.
///
/// Keys must be non-empty, free of whitespace and control characters, and
/// must not start with the reserved `backup-` / `meta-` markers, which
/// would make the raw form ambiguous with the other families.
#[must_use]
pub fn validate_key(key: &str) -> bool {
    !key.is_empty()
        && !key.starts_with(BACKUP_MARKER)
        && !key.starts_with(META_MARKER)
        && !key
            .chars()
            .any(|c| c.is_whitespace() || c.is_control())
}
