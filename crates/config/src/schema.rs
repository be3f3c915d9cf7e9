use serde::{Deserialize, Serialize};

/// Static fabric configuration.
///
/// All durations are milliseconds. Unknown keys are ignored so older config
/// files keep loading across releases.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FabricConfig {
    /// Delivery attempts for a queued message beyond the first.
    pub max_retries: u32,

    /// Interval between drain passes over the pending-delivery queue.
    pub drain_interval_ms: u64,

    /// A connection with no heartbeat for longer than this is evicted.
    pub heartbeat_timeout_ms: u64,

    /// Interval between stale-connection sweep passes.
    pub sweep_interval_ms: u64,

    /// Interval between channel health recomputations.
    pub monitor_interval_ms: u64,

    /// Channel history entries older than this are trimmed.
    pub history_retention_ms: u64,

    /// Translation cache entries older than this are evicted.
    pub translation_cache_ttl_ms: u64,

    /// Bounded violation-log capacity; oldest entries are dropped past this.
    pub violation_log_cap: usize,
}

impl Default for FabricConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            drain_interval_ms: 500,
            heartbeat_timeout_ms: 60_000,
            sweep_interval_ms: 30_000,
            monitor_interval_ms: 5_000,
            history_retention_ms: 3_600_000,
            translation_cache_ttl_ms: 3_600_000,
            violation_log_cap: 1000,
        }
    }
}

impl FabricConfig {
    pub fn drain_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.drain_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn monitor_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.monitor_interval_ms)
    }

    pub fn history_retention(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.history_retention_ms)
    }

    pub fn translation_cache_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.translation_cache_ttl_ms)
    }
}
