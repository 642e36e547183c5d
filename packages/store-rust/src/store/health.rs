//! Store health and usage reports.
//!
//! Plain data returned by the store's diagnostic operations. The health
//! check diagnoses; it never repairs. Hosts decide what to do with the
//! findings.

use serde::Serialize;

/// Result of a store health check.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// `true` when no issues were found.
    pub healthy: bool,
    /// Human-readable findings, empty when healthy.
    pub issues: Vec<String>,
    /// Number of keys with unpersisted changes at check time.
    pub pending_changes: usize,
    /// Whether scheduled auto-save flushes are currently enabled.
    pub auto_save_enabled: bool,
}

/// Space accounting for everything under the store's prefix.
#[derive(Debug, Clone, Serialize)]
pub struct StorageUsage {
    /// Total value bytes stored under the prefix.
    pub used_bytes: u64,
    /// Number of primary records.
    pub primary_records: usize,
    /// Number of rotated backups across all keys.
    pub backup_records: usize,
    /// Number of store-internal metadata entries.
    pub meta_records: usize,
    /// Backend capacity, when the backend reports one.
    pub capacity_bytes: Option<u64>,
}

impl StorageUsage {
    /// Percentage of capacity in use, when the backend reports a capacity.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn percent_used(&self) -> Option<f64> {
        self.capacity_bytes
            .filter(|capacity| *capacity > 0)
            .map(|capacity| (self.used_bytes as f64 / capacity as f64) * 100.0)
    }
}

/// Renders a byte count for humans, e.g. `1.5 KB` or `5 MB`.
///
/// Base 1024, two decimals with trailing zeros trimmed, capped at GB.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];
    if bytes == 0 {
        return "0 Bytes".to_string();
    }
    let exponent = (bytes.ilog(1024) as usize).min(UNITS.len() - 1);
    let scaled = bytes as f64 / 1024_f64.powi(exponent as i32);
    let formatted = format!("{scaled:.2}");
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    format!("{trimmed} {}", UNITS[exponent])
}
