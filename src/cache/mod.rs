//! In-memory cache with per-entry expiration policies.
//!
//! [`CacheService`] stores values of any `'static` type under string keys. Each
//! entry carries exactly one [`Expiration`] policy and a [`CachePriority`] used
//! when trimming. Expired entries are evicted lazily on read, and in bulk by
//! [`CacheService::sweep`], which the host drives through
//! [`CacheService::on_tick`].
//!
//! All state sits behind one lock, so every read-modify-write (including an
//! expiring read) is atomic with respect to other callers. Producers passed to
//! [`CacheService::cache_aware_response`] run outside that lock.

mod controller;
mod entry;
mod memo;
mod stats;
mod tick;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::CacheConfig;

pub use controller::CacheController;
pub use entry::{CachePriority, Expiration};
pub use memo::CacheOptions;
pub use stats::CacheStatistics;
pub use tick::{ManualTickSource, TickSource};

use entry::CacheEntry;

/// Size assumed for a value that cannot be serialized.
const FALLBACK_VALUE_SIZE: usize = 1024;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("invalid invalidation pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("cache producer for '{key}' failed: {message}")]
    ProducerFault { key: String, message: String },
}

struct CacheState {
    enabled: bool,
    entries: HashMap<String, CacheEntry>,
    hits: u64,
    misses: u64,
    last_sweep: DateTime<Utc>,
    last_sweep_tick: u64,
}

/// Keyed store of typed values with absolute, sliding, tick-based or no expiration.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use waypoint::cache::{CachePriority, CacheService};
/// use waypoint::config::CacheConfig;
///
/// let cache = CacheService::new(CacheConfig::default());
/// cache.set("colonists", vec!["Ada", "Bo"], Some(Duration::from_secs(5)), CachePriority::Normal);
///
/// let colonists: Option<Vec<&str>> = cache.try_get("colonists");
/// assert_eq!(colonists.map(|c| c.len()), Some(2));
/// ```
pub struct CacheService {
    state: Mutex<CacheState>,
    ticks: Arc<dyn TickSource>,
    config: CacheConfig,
    flights: Mutex<HashMap<String, memo::Flight>>,
}

impl CacheService {
    /// A cache with its own tick clock fixed at zero. Use
    /// [`with_tick_source`](Self::with_tick_source) for tick-based expiration.
    pub fn new(config: CacheConfig) -> Self {
        Self::with_tick_source(config, Arc::new(ManualTickSource::default()))
    }

    pub fn with_tick_source(config: CacheConfig, ticks: Arc<dyn TickSource>) -> Self {
        let last_sweep_tick = ticks.current_tick();
        info!(enabled = config.enabled, "cache initialized");
        Self {
            state: Mutex::new(CacheState {
                enabled: config.enabled,
                entries: HashMap::new(),
                hits: 0,
                misses: 0,
                last_sweep: Utc::now(),
                last_sweep_tick,
            }),
            ticks,
            config,
            flights: Mutex::new(HashMap::new()),
        }
    }

    /// Look up `key` as a `T`.
    ///
    /// Returns `None` when caching is disabled, the key is absent, the entry has
    /// expired (it is evicted), or the stored value is not a `T`. A hit on a
    /// sliding entry restarts its window.
    pub fn try_get<T: Clone + 'static>(&self, key: &str) -> Option<T> {
        self.lookup(key, true)
    }

    pub(crate) fn lookup<T: Clone + 'static>(&self, key: &str, count_miss: bool) -> Option<T> {
        let now = Instant::now();
        let tick = self.ticks.current_tick();
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if !state.enabled {
            return None;
        }

        if state.entries.get(key).is_some_and(|e| e.is_expired(now, tick)) {
            state.entries.remove(key);
            debug!(key, "expired cache entry evicted on read");
        }

        let found = state.entries.get_mut(key).and_then(|entry| {
            let value = entry.value.downcast_ref::<T>().cloned();
            match value {
                Some(_) => entry.last_accessed = now,
                None => warn!(
                    key,
                    requested = std::any::type_name::<T>(),
                    "cache entry holds a different type"
                ),
            }
            value
        });

        match found {
            Some(_) => state.hits += 1,
            None if count_miss => state.misses += 1,
            None => {}
        }
        found
    }

    /// Store `value` under `key`, replacing any previous entry.
    ///
    /// `Some(ttl)` gives the entry an absolute expiration; `None` keeps it until
    /// removed. Does nothing while caching is disabled.
    pub fn set<T>(
        &self,
        key: impl Into<String>,
        value: T,
        ttl: Option<Duration>,
        priority: CachePriority,
    ) where
        T: Serialize + Send + Sync + 'static,
    {
        let expiration = ttl.map_or(Expiration::Never, Expiration::Absolute);
        self.set_with_expiration(key, value, expiration, priority);
    }

    /// Store `value` under `key` with an explicit expiration policy.
    pub fn set_with_expiration<T>(
        &self,
        key: impl Into<String>,
        value: T,
        expiration: Expiration,
        priority: CachePriority,
    ) where
        T: Serialize + Send + Sync + 'static,
    {
        let key = key.into();
        let size_estimate = key.len()
            + serde_json::to_vec(&value)
                .map(|json| json.len())
                .unwrap_or(FALLBACK_VALUE_SIZE);
        let now = Instant::now();
        let tick_added = self.ticks.current_tick();

        let mut state = self.state.lock();
        if !state.enabled {
            return;
        }
        state.entries.insert(
            key,
            CacheEntry {
                value: Arc::new(value),
                created: now,
                last_accessed: now,
                priority,
                expiration,
                tick_added,
                size_estimate,
            },
        );
    }

    /// Remove one entry. Returns whether it existed.
    pub fn remove(&self, key: &str) -> bool {
        self.state.lock().entries.remove(key).is_some()
    }

    /// Whether `key` holds a live entry. Does not touch statistics or access times.
    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        let tick = self.ticks.current_tick();
        let state = self.state.lock();
        state
            .entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now, tick))
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        let count = state.entries.len();
        state.entries.clear();
        debug!(count, "cache cleared");
    }

    /// Remove every key matching the regular expression `pattern`.
    ///
    /// # Errors
    ///
    /// [`CacheError::InvalidPattern`] when `pattern` does not compile; nothing is removed.
    pub fn invalidate_by_pattern(&self, pattern: &str) -> Result<usize, CacheError> {
        let regex = Regex::new(pattern)?;
        let removed = self.remove_where(|key, _| regex.is_match(key));
        info!(removed, pattern, "cache invalidated by pattern");
        Ok(removed)
    }

    pub fn invalidate_by_prefix(&self, prefix: &str) -> usize {
        let removed = self.remove_where(|key, _| key.starts_with(prefix));
        info!(removed, prefix, "cache invalidated by prefix");
        removed
    }

    pub fn invalidate_by_suffix(&self, suffix: &str) -> usize {
        let removed = self.remove_where(|key, _| key.ends_with(suffix));
        info!(removed, suffix, "cache invalidated by suffix");
        removed
    }

    /// Shrink the cache.
    ///
    /// With a floor, evicts every entry whose priority is strictly below it.
    /// Without one, evicts the least recently accessed share of entries given by
    /// `trim_fraction` (a fifth by default, clamped to `0.0..=1.0`), rounded
    /// down. Returns the number of entries removed.
    pub fn trim(&self, floor: Option<CachePriority>) -> usize {
        if let Some(floor) = floor {
            let removed = self.remove_where(|_, entry| entry.priority < floor);
            info!(removed, ?floor, "cache trimmed by priority");
            return removed;
        }

        let fraction = self.config.trim_fraction.clamp(0.0, 1.0);
        let mut state = self.state.lock();
        let count = (state.entries.len() as f64 * fraction).floor() as usize;
        let mut by_age: Vec<(Instant, String)> = state
            .entries
            .iter()
            .map(|(key, entry)| (entry.last_accessed, key.clone()))
            .collect();
        by_age.sort();
        let removed = by_age
            .into_iter()
            .take(count)
            .filter(|(_, key)| state.entries.remove(key).is_some())
            .count();
        info!(removed, "cache trimmed oldest entries");
        removed
    }

    /// Evict every expired entry now. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(self.ticks.current_tick())
    }

    fn sweep_at(&self, tick: u64) -> usize {
        let now = Instant::now();
        let mut state = self.state.lock();
        let before = state.entries.len();
        state.entries.retain(|_, entry| !entry.is_expired(now, tick));
        let removed = before - state.entries.len();
        state.last_sweep = Utc::now();
        state.last_sweep_tick = tick;
        if removed > 0 {
            debug!(removed, "expired cache entries swept");
        }
        removed
    }

    /// Host tick hook: sweeps once `sweep_interval_ticks` have passed since the
    /// last sweep. Returns the number of entries evicted.
    pub fn on_tick(&self, tick: u64) -> usize {
        let due = {
            let state = self.state.lock();
            tick.saturating_sub(state.last_sweep_tick) >= self.config.sweep_interval_ticks
        };
        if due {
            self.sweep_at(tick.max(self.ticks.current_tick()))
        } else {
            0
        }
    }

    /// Turn caching on or off. Disabling also clears every entry.
    pub fn set_enabled(&self, enabled: bool) {
        let mut state = self.state.lock();
        if state.enabled == enabled {
            return;
        }
        state.enabled = enabled;
        if !enabled {
            state.entries.clear();
        }
        info!(enabled, "caching toggled");
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().enabled
    }

    pub fn statistics(&self) -> CacheStatistics {
        let state = self.state.lock();
        CacheStatistics {
            enabled: state.enabled,
            total_entries: state.entries.len(),
            hits: state.hits,
            misses: state.misses,
            hit_ratio: CacheStatistics::ratio(state.hits, state.misses),
            memory_usage_bytes: state.entries.values().map(|e| e.size_estimate).sum(),
            last_sweep: state.last_sweep,
        }
    }

    fn remove_where(&self, mut doomed: impl FnMut(&str, &CacheEntry) -> bool) -> usize {
        let mut state = self.state.lock();
        let before = state.entries.len();
        state.entries.retain(|key, entry| !doomed(key, entry));
        before - state.entries.len()
    }
}

impl std::fmt::Debug for CacheService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CacheService")
            .field("enabled", &state.enabled)
            .field("entries", &state.entries.len())
            .finish_non_exhaustive()
    }
}
