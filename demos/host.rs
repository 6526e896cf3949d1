//! A host wiring every component together.
//!
//! ```text
//! cargo run --example host [config.json]
//! curl http://127.0.0.1:8765/api/v1/ping
//! curl http://127.0.0.1:8765/colony/status
//! curl http://127.0.0.1:8765/api/v1/cache/status?detailed=true
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Context as _;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use waypoint::cache::{CacheController, CacheOptions, CachePriority, Expiration, ManualTickSource};
use waypoint::controller::{Controller, RouteRegistrar, RouteTable};
use waypoint::extension::{EventRegistry, Extension, ExtensionRegistry, ExtensionRouter};
use waypoint::{
    ApiResult, CacheService, Container, Context, DiError, HandlerResult, Injectable, Router,
    RuntimeConfig, Server, ServiceCollection,
};

/// Colony clock, advanced by the host loop.
struct Clock {
    ticks: AtomicU64,
}

impl Clock {
    fn now(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }
}

struct PingController {
    clock: Arc<Clock>,
    cache: Arc<CacheService>,
}

impl Injectable for PingController {
    fn construct(container: &Container) -> Result<Self, DiError> {
        Ok(Self {
            clock: container.resolve()?,
            cache: container.resolve()?,
        })
    }
}

impl Controller for PingController {
    fn routes(table: &mut RouteTable<Self>) {
        table
            .get("/api/v1/ping", Self::ping)
            .get("/api/v1/tick/{offset}", Self::tick_at);
    }
}

impl PingController {
    async fn ping(self: Arc<Self>, _ctx: Context) -> HandlerResult {
        Ok(ApiResult::ok(self.clock.now()).to_response())
    }

    /// Memoized per offset for ten ticks.
    async fn tick_at(self: Arc<Self>, ctx: Context) -> HandlerResult {
        let offset: u64 = ctx.param_parsed("offset")?;
        let options = CacheOptions::new(Expiration::ClockTick(10), CachePriority::Low);
        let clock = Arc::clone(&self.clock);
        let result = self
            .cache
            .cache_aware_response(&format!("tick:{offset}"), options, || async move {
                Ok::<_, anyhow::Error>(ApiResult::ok(clock.now() + offset))
            })
            .await;
        Ok(result.to_response())
    }
}

struct ColonyExtension;

impl Extension for ColonyExtension {
    fn id(&self) -> &str {
        "colony"
    }

    fn name(&self) -> &str {
        "Colony overview"
    }

    fn version(&self) -> &str {
        "0.3.1"
    }

    fn register_routes(&self, router: &mut ExtensionRouter<'_>) -> anyhow::Result<()> {
        router.get("status", colony_status);
        Ok(())
    }

    fn register_event_types(&self, events: &EventRegistry) -> anyhow::Result<()> {
        events.register_event_type("colony.tick");
        Ok(())
    }
}

async fn colony_status(_ctx: Context) -> HandlerResult {
    Ok(ApiResult::ok(serde_json::json!({ "colonists": 3, "mood": "content" })).to_response())
}

/// Fails on purpose to show that one broken extension does not stop the rest.
struct BrokenExtension;

impl Extension for BrokenExtension {
    fn id(&self) -> &str {
        "broken"
    }

    fn name(&self) -> &str {
        "Broken"
    }

    fn version(&self) -> &str {
        "0.0.1"
    }

    fn register_routes(&self, _router: &mut ExtensionRouter<'_>) -> anyhow::Result<()> {
        anyhow::bail!("route table missing")
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => RuntimeConfig::from_json_file(&path)
            .with_context(|| format!("loading configuration from {path}"))?,
        None => RuntimeConfig::default(),
    };

    let ticks = Arc::new(ManualTickSource::default());
    let cache = Arc::new(CacheService::with_tick_source(
        config.cache.clone(),
        ticks.clone(),
    ));
    let clock = Arc::new(Clock {
        ticks: AtomicU64::new(0),
    });

    let extensions = ExtensionRegistry::new()
        .with_factory(|| Ok(Box::new(ColonyExtension) as Box<dyn Extension>))
        .with_factory(|| Ok(Box::new(BrokenExtension) as Box<dyn Extension>));
    for fault in extensions.discover() {
        warn!(error = %fault, "extension discovery fault");
    }

    let mut services = ServiceCollection::new();
    services
        .add_singleton_arc(Arc::clone(&clock))
        .add_singleton_arc(Arc::clone(&cache))
        .add_transient::<PingController>()
        .add_transient::<CacheController>();
    extensions.register_services(&mut services);
    let container = services.build();

    let events = Arc::new(EventRegistry::default());
    extensions.register_event_types(&events);

    let mut router = Router::new();
    let mut registrar = RouteRegistrar::new(container.clone());
    registrar.register::<PingController>(&mut router);
    registrar.register::<CacheController>(&mut router);
    let prefix = &config.extensions.route_prefix;
    let faults = extensions.register_routes(&mut router, &container, prefix);
    info!(
        routes = router.len(),
        extensions = extensions.len(),
        faults = faults.len(),
        "host ready"
    );

    let mut subscriber = events.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = subscriber.recv().await {
            info!(event_type = %event.event_type, data = %event.data, "event");
        }
    });

    tokio::spawn({
        let events = Arc::clone(&events);
        async move {
            let mut interval = tokio::time::interval(Duration::from_millis(100));
            loop {
                interval.tick().await;
                let tick = clock.ticks.fetch_add(1, Ordering::AcqRel) + 1;
                ticks.set(tick);
                cache.on_tick(tick);
                if tick % 600 == 0 {
                    let _ = events.publish("colony.tick", tick);
                }
            }
        }
    });

    let server = Server::bind(&config.server.bind_addr).await?;
    server
        .serve_with_shutdown(Arc::new(router), async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
