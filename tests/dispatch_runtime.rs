use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use waypoint::cache::CacheController;
use waypoint::config::CacheConfig;
use waypoint::controller::{Controller, RouteRegistrar, RouteTable};
use waypoint::extension::{EventRegistry, Extension, ExtensionRegistry, ExtensionRouter};
use waypoint::{
    ApiResult, CacheService, Container, Context, DiError, HandlerResult, Injectable, Method,
    Request, Response, Router, Server, ServiceCollection, StatusCode,
};

struct Clock {
    value: AtomicU64,
}

struct PingController {
    clock: Arc<Clock>,
}

impl Injectable for PingController {
    fn construct(container: &Container) -> Result<Self, DiError> {
        Ok(Self {
            clock: container.resolve::<Clock>()?,
        })
    }
}

impl Controller for PingController {
    fn routes(table: &mut RouteTable<Self>) {
        table.get("/ping", Self::ping);
    }
}

impl PingController {
    async fn ping(self: Arc<Self>, _ctx: Context) -> HandlerResult {
        Ok(ApiResult::ok(self.clock.value.load(Ordering::SeqCst)).to_response())
    }
}

fn data(response: &Response) -> serde_json::Value {
    let body: serde_json::Value = serde_json::from_slice(response.body_ref()).unwrap();
    body["data"].clone()
}

#[tokio::test]
async fn singleton_clock_is_reused_across_dispatches() {
    let built = Arc::new(AtomicUsize::new(0));
    let mut services = ServiceCollection::new();
    {
        let built = Arc::clone(&built);
        services.add_singleton_factory(move |_: &Container| {
            built.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Clock {
                value: AtomicU64::new(0),
            }))
        });
    }
    services.add_transient::<PingController>();

    let mut router = Router::new();
    RouteRegistrar::new(services.build()).register::<PingController>(&mut router);

    let first = router.dispatch(Request::new(Method::Get, "/ping")).await;
    let second = router.dispatch(Request::new(Method::Get, "/ping")).await;

    assert_eq!(first.status(), StatusCode::Ok);
    assert_eq!(data(&first), 0);
    assert_eq!(data(&first), data(&second));
    assert_eq!(built.load(Ordering::SeqCst), 1);
}

struct Colony;

impl Extension for Colony {
    fn id(&self) -> &str {
        "Colony"
    }

    fn name(&self) -> &str {
        "Colony"
    }

    fn version(&self) -> &str {
        "1.2.0"
    }

    fn register_routes(&self, router: &mut ExtensionRouter<'_>) -> anyhow::Result<()> {
        router.get("bar", bar).get("pawn/{id}", pawn);
        Ok(())
    }

    fn register_event_types(&self, events: &EventRegistry) -> anyhow::Result<()> {
        events.register_event_type("colony.raid");
        Ok(())
    }
}

async fn bar(_ctx: Context) -> HandlerResult {
    Ok(Response::new(StatusCode::Ok).body("bar"))
}

async fn pawn(ctx: Context) -> HandlerResult {
    let id: u32 = ctx.param_parsed("id")?;
    Ok(Response::new(StatusCode::Ok).body(format!("pawn {id}")))
}

struct Unstable;

impl Extension for Unstable {
    fn id(&self) -> &str {
        "unstable"
    }

    fn name(&self) -> &str {
        "Unstable"
    }

    fn version(&self) -> &str {
        "0.1.0"
    }

    fn register_routes(&self, router: &mut ExtensionRouter<'_>) -> anyhow::Result<()> {
        router.get("before-failure", bar);
        anyhow::bail!("half-registered")
    }
}

fn registry() -> ExtensionRegistry {
    ExtensionRegistry::new()
        .with_factory(|| Ok(Box::new(Unstable) as Box<dyn Extension>))
        .with_factory(|| anyhow::bail!("missing assets"))
        .with_factory(|| Ok(Box::new(Colony) as Box<dyn Extension>))
}

#[tokio::test]
async fn extensions_are_namespaced_and_isolated() {
    let registry = registry();
    let discovery_faults = registry.discover();
    assert_eq!(discovery_faults.len(), 1);
    assert!(registry.has_extension("colony"));
    assert!(registry.has_extension("unstable"));

    let container = ServiceCollection::new().build();
    let mut router = Router::new();
    let faults = registry.register_routes(&mut router, &container, "");
    assert_eq!(faults.len(), 1);

    let res = router.dispatch(Request::new(Method::Get, "/colony/bar")).await;
    assert_eq!(res.status(), StatusCode::Ok);
    assert_eq!(res.body_text(), "bar");

    let res = router.dispatch(Request::new(Method::Get, "/bar")).await;
    assert_eq!(res.status(), StatusCode::NotFound);

    let res = router.dispatch(Request::new(Method::Get, "/Colony/Pawn/9")).await;
    assert_eq!(res.body_text(), "pawn 9");

    let res = router.dispatch(Request::new(Method::Get, "/colony/pawn/nine")).await;
    assert_eq!(res.status(), StatusCode::InternalServerError);
    let body: serde_json::Value = serde_json::from_slice(res.body_ref()).unwrap();
    assert_eq!(body["errors"][0], "Extension 'colony' error");

    let events = EventRegistry::default();
    assert!(registry.register_event_types(&events).is_empty());
    assert!(events.is_event_type_registered("colony.raid"));
}

#[tokio::test]
async fn full_host_over_tcp() {
    let cache = Arc::new(CacheService::new(CacheConfig::default()));
    let mut services = ServiceCollection::new();
    services
        .add_singleton_arc(Arc::clone(&cache))
        .add_singleton_instance(Clock {
            value: AtomicU64::new(42),
        })
        .add_singleton::<PingController>()
        .add_transient::<CacheController>();
    let container = services.build();

    let mut router = Router::new();
    let mut registrar = RouteRegistrar::new(container.clone());
    registrar.register::<PingController>(&mut router);
    registrar.register::<CacheController>(&mut router);

    let registry = registry();
    registry.discover();
    registry.register_routes(&mut router, &container, "/api/v1");

    let server = Server::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr();
    tokio::spawn(server.serve(Arc::new(router)));

    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(
            b"GET /ping HTTP/1.1\r\n\r\n\
              HEAD /api/v1/colony/bar HTTP/1.1\r\n\r\n\
              POST /api/v1/cache/disable HTTP/1.1\r\nContent-Length: 0\r\n\r\n\
              GET /nowhere HTTP/1.1\r\nConnection: close\r\n\r\n",
        )
        .await
        .unwrap();
    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();
    let reply = String::from_utf8(raw).unwrap();

    assert_eq!(reply.matches("HTTP/1.1 200 OK").count(), 3);
    let not_found = reply.find("HTTP/1.1 404 Not Found").unwrap();
    assert!(reply.rfind("HTTP/1.1 200 OK").unwrap() < not_found);
    assert!(reply.contains(r#""data":42"#));
    assert!(!reply.contains("\r\n\r\nbar"), "HEAD must not carry a body");
    assert!(reply.contains("Endpoint not found: GET /nowhere"));
    assert!(!cache.is_enabled());
}
