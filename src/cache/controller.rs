//! Admin endpoints for the cache.

use std::sync::Arc;

use serde::Serialize;

use super::{CacheService, CacheStatistics};
use crate::controller::{Controller, RouteTable};
use crate::di::{Container, DiError, Injectable};
use crate::http::ApiResult;
use crate::{Context, HandlerResult};

/// `enable`, `disable`, `status` and `clear` under `/api/v1/cache`.
pub struct CacheController {
    cache: Arc<CacheService>,
}

#[derive(Debug, Serialize)]
struct CacheStatus {
    enabled: bool,
    total_entries: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    statistics: Option<CacheStatistics>,
}

impl CacheController {
    pub fn new(cache: Arc<CacheService>) -> Self {
        Self { cache }
    }

    async fn enable(self: Arc<Self>, _ctx: Context) -> HandlerResult {
        self.cache.set_enabled(true);
        Ok(ApiResult::done().to_response())
    }

    async fn disable(self: Arc<Self>, _ctx: Context) -> HandlerResult {
        self.cache.set_enabled(false);
        Ok(ApiResult::done().to_response())
    }

    /// `?detailed=true` adds the full statistics block.
    async fn status(self: Arc<Self>, ctx: Context) -> HandlerResult {
        let statistics = self.cache.statistics();
        let status = CacheStatus {
            enabled: statistics.enabled,
            total_entries: statistics.total_entries,
            statistics: ctx.query_flag("detailed", false).then_some(statistics),
        };
        Ok(ApiResult::ok(status).to_response())
    }

    async fn clear(self: Arc<Self>, _ctx: Context) -> HandlerResult {
        self.cache.clear();
        Ok(ApiResult::done().to_response())
    }
}

impl Injectable for CacheController {
    fn construct(container: &Container) -> Result<Self, DiError> {
        Ok(Self::new(container.resolve::<CacheService>()?))
    }
}

impl Controller for CacheController {
    fn routes(table: &mut RouteTable<Self>) {
        table
            .post("/api/v1/cache/enable", Self::enable)
            .post("/api/v1/cache/disable", Self::disable)
            .get("/api/v1/cache/status", Self::status)
            .post("/api/v1/cache/clear", Self::clear);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CachePriority;
    use crate::config::CacheConfig;
    use crate::controller::RouteRegistrar;
    use crate::di::ServiceCollection;
    use crate::{Method, Request, Router, StatusCode};

    fn setup() -> (Arc<CacheService>, Router) {
        let cache = Arc::new(CacheService::new(CacheConfig::default()));
        let mut services = ServiceCollection::new();
        services
            .add_singleton_arc(Arc::clone(&cache))
            .add_transient::<CacheController>();
        let mut router = Router::new();
        RouteRegistrar::new(services.build()).register::<CacheController>(&mut router);
        (cache, router)
    }

    async fn call(router: &Router, method: Method, target: &str) -> serde_json::Value {
        let res = router.dispatch(Request::new(method, target)).await;
        assert_eq!(res.status(), StatusCode::Ok);
        serde_json::from_slice(res.body_ref()).unwrap()
    }

    #[tokio::test]
    async fn disable_clears_and_enable_restores() {
        let (cache, router) = setup();
        cache.set("k", 1_u8, None, CachePriority::Normal);

        let body = call(&router, Method::Post, "/api/v1/cache/disable").await;
        assert_eq!(body["success"], true);
        assert!(!cache.is_enabled());
        assert!(cache.is_empty());

        call(&router, Method::Post, "/api/v1/cache/enable").await;
        assert!(cache.is_enabled());
    }

    #[tokio::test]
    async fn status_reports_detail_on_request() {
        let (cache, router) = setup();
        cache.set("k", 1_u8, None, CachePriority::Normal);

        let body = call(&router, Method::Get, "/api/v1/cache/status").await;
        assert_eq!(body["data"]["enabled"], true);
        assert_eq!(body["data"]["total_entries"], 1);
        assert!(body["data"].get("statistics").is_none());

        let body = call(&router, Method::Get, "/api/v1/cache/status?detailed=true").await;
        assert_eq!(body["data"]["statistics"]["total_entries"], 1);
    }

    #[tokio::test]
    async fn clear_empties_cache() {
        let (cache, router) = setup();
        cache.set("k", 1_u8, None, CachePriority::Normal);
        call(&router, Method::Post, "/api/v1/cache/clear").await;
        assert!(cache.is_empty());
        assert!(cache.is_enabled());
    }
}
