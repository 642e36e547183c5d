use savepoint_core::keys::DEFAULT_PREFIX;

/// Store-level configuration for persistence, retries, and backup rotation.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Raw-key prefix that namespaces this store inside a shared backend.
    pub key_prefix: String,
    /// Interval between auto-save flushes in milliseconds.
    pub auto_save_interval_ms: u64,
    /// Maximum write attempts per save before the key is parked as pending.
    pub max_retries: u32,
    /// Fixed delay between write attempts in milliseconds.
    pub retry_delay_ms: u64,
    /// Number of rotated backups kept per key; older ones are evicted.
    pub max_backups: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_PREFIX.to_string(),
            auto_save_interval_ms: 30_000,
            max_retries: 3,
            retry_delay_ms: 1_000,
            max_backups: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_legacy_store() {
        let config = StoreConfig::default();
        assert_eq!(config.key_prefix, "savepoint-data");
        assert_eq!(config.auto_save_interval_ms, 30_000);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay_ms, 1_000);
        assert_eq!(config.max_backups, 5);
    }
}
