use chrono::{DateTime, Utc};
use serde::Serialize;

/// Point-in-time view of the cache, as served by the status endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStatistics {
    pub enabled: bool,
    pub total_entries: usize,
    pub hits: u64,
    pub misses: u64,
    /// Hits over lookups, `0.0` before the first lookup.
    pub hit_ratio: f64,
    /// Rough footprint: key bytes plus the JSON size of each value.
    pub memory_usage_bytes: usize,
    pub last_sweep: DateTime<Utc>,
}

impl CacheStatistics {
    pub(super) fn ratio(hits: u64, misses: u64) -> f64 {
        let lookups = hits + misses;
        if lookups == 0 {
            0.0
        } else {
            hits as f64 / lookups as f64
        }
    }
}
