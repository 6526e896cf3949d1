//! Response memoization on top of [`CacheService`].

use std::fmt::Display;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error};

use super::{CacheError, CachePriority, CacheService, Expiration};
use crate::http::ApiResult;

/// How a memoized result is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheOptions {
    pub expiration: Expiration,
    pub priority: CachePriority,
}

impl CacheOptions {
    pub fn new(expiration: Expiration, priority: CachePriority) -> Self {
        Self {
            expiration,
            priority,
        }
    }
}

impl CacheService {
    /// Serve `key` from the cache, or run `producer` and cache what it returns.
    ///
    /// Only successful envelopes are stored; failures are returned but never
    /// cached. A producer error becomes a failure envelope and is logged.
    /// Concurrent misses on the same key run the producer once: later callers
    /// wait for the first and then read its result from the cache.
    ///
    /// ```
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// use waypoint::cache::{CacheOptions, CacheService};
    /// use waypoint::config::CacheConfig;
    /// use waypoint::http::ApiResult;
    ///
    /// let cache = CacheService::new(CacheConfig::default());
    /// let result = cache
    ///     .cache_aware_response("colonists", CacheOptions::default(), || async {
    ///         Ok::<_, std::io::Error>(ApiResult::ok(3_u32))
    ///     })
    ///     .await;
    /// assert_eq!(result.data, Some(3));
    /// # }
    /// ```
    pub async fn cache_aware_response<T, E, F, Fut>(
        &self,
        key: &str,
        options: CacheOptions,
        producer: F,
    ) -> ApiResult<T>
    where
        T: Clone + Serialize + Send + Sync + 'static,
        E: Display,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ApiResult<T>, E>>,
    {
        if let Some(hit) = self.try_get::<ApiResult<T>>(key) {
            debug!(key, "cache hit");
            return hit;
        }
        if !self.is_enabled() {
            return self.produce(key, options, producer).await;
        }

        let ticket = FlightTicket::join(self, key);
        let _turn = ticket.gate.lock().await;

        // Another caller may have filled the entry while this one waited.
        match self.lookup::<ApiResult<T>>(key, false) {
            Some(hit) => {
                debug!(key, "cache filled by concurrent producer");
                hit
            }
            None => {
                debug!(key, "cache miss, producing");
                self.produce(key, options, producer).await
            }
        }
    }

    async fn produce<T, E, F, Fut>(
        &self,
        key: &str,
        options: CacheOptions,
        producer: F,
    ) -> ApiResult<T>
    where
        T: Clone + Serialize + Send + Sync + 'static,
        E: Display,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ApiResult<T>, E>>,
    {
        match producer().await {
            Ok(result) => {
                if result.success {
                    self.set_with_expiration(
                        key,
                        result.clone(),
                        options.expiration,
                        options.priority,
                    );
                }
                result
            }
            Err(e) => {
                let fault = CacheError::ProducerFault {
                    key: key.to_owned(),
                    message: e.to_string(),
                };
                error!(error = %fault, "cache producer failed");
                ApiResult::fail(fault.to_string())
            }
        }
    }
}

/// Per-key async gate shared by every caller waiting on the same miss.
pub(super) struct Flight {
    gate: Arc<tokio::sync::Mutex<()>>,
    waiters: usize,
}

/// One caller's membership in a [`Flight`]. Dropping it, including when the
/// caller's future is cancelled, removes the flight once its last waiter leaves.
struct FlightTicket<'a> {
    cache: &'a CacheService,
    key: &'a str,
    gate: Arc<tokio::sync::Mutex<()>>,
}

impl<'a> FlightTicket<'a> {
    fn join(cache: &'a CacheService, key: &'a str) -> Self {
        let mut flights = cache.flights.lock();
        let flight = flights.entry(key.to_owned()).or_insert_with(|| Flight {
            gate: Arc::new(tokio::sync::Mutex::new(())),
            waiters: 0,
        });
        flight.waiters += 1;
        Self {
            cache,
            key,
            gate: Arc::clone(&flight.gate),
        }
    }
}

impl Drop for FlightTicket<'_> {
    fn drop(&mut self) {
        let mut flights = self.cache.flights.lock();
        let last = match flights.get_mut(self.key) {
            Some(flight) => {
                flight.waiters = flight.waiters.saturating_sub(1);
                flight.waiters == 0
            }
            None => false,
        };
        if last {
            flights.remove(self.key);
        }
    }
}
