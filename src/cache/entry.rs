//! Cache entries and their expiration policies.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Eviction priority used by [`CacheService::trim`](super::CacheService::trim).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CachePriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// When an entry stops being served. Exactly one policy applies per entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Expiration {
    /// Expires `ttl` after insertion; reads do not extend it.
    Absolute(Duration),
    /// Expires `ttl` after the last read.
    Sliding(Duration),
    /// Expires once the host clock has advanced this many ticks past insertion.
    ClockTick(u64),
    /// Stays until removed.
    #[default]
    Never,
}

pub(super) struct CacheEntry {
    pub(super) value: Arc<dyn Any + Send + Sync>,
    pub(super) created: Instant,
    pub(super) last_accessed: Instant,
    pub(super) priority: CachePriority,
    pub(super) expiration: Expiration,
    pub(super) tick_added: u64,
    pub(super) size_estimate: usize,
}

impl CacheEntry {
    pub(super) fn is_expired(&self, now: Instant, current_tick: u64) -> bool {
        match self.expiration {
            // A deadline past the clock's range never arrives.
            Expiration::Absolute(ttl) => self
                .created
                .checked_add(ttl)
                .is_some_and(|deadline| now >= deadline),
            Expiration::Sliding(ttl) => self
                .last_accessed
                .checked_add(ttl)
                .is_some_and(|deadline| now >= deadline),
            Expiration::ClockTick(ticks) => current_tick >= self.tick_added.saturating_add(ticks),
            Expiration::Never => false,
        }
    }
}
