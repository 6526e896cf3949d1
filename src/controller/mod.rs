//! Controllers: types that declare their own routes and are resolved per request.
//!
//! A controller lists `(method, template, action)` entries in a [`RouteTable`].
//! [`RouteRegistrar::register`] turns each entry into a router handler that
//! resolves the controller from the [`Container`] on every request, so its
//! registered lifetime decides whether requests share an instance.
//!
//! ```
//! use std::sync::Arc;
//! use waypoint::controller::{Controller, RouteTable};
//! use waypoint::di::{Container, DiError, Injectable};
//! use waypoint::{Context, HandlerResult, Response, StatusCode};
//!
//! struct VersionController;
//!
//! impl Injectable for VersionController {
//!     fn construct(_: &Container) -> Result<Self, DiError> {
//!         Ok(VersionController)
//!     }
//! }
//!
//! impl Controller for VersionController {
//!     fn routes(table: &mut RouteTable<Self>) {
//!         table.get("/api/v1/version", Self::version);
//!     }
//! }
//!
//! impl VersionController {
//!     async fn version(self: Arc<Self>, _ctx: Context) -> HandlerResult {
//!         Ok(Response::new(StatusCode::Ok).body("1.0.0"))
//!     }
//! }
//! ```

use std::sync::Arc;

use anyhow::Context as _;
use tracing::{info, warn};

use crate::di::{Container, DiError};
use crate::router::{BoxFuture, HandlerResult, Router};
use crate::{Context, Method};

/// A type whose actions are exposed as routes.
pub trait Controller: Send + Sync + 'static {
    fn routes(table: &mut RouteTable<Self>)
    where
        Self: Sized;
}

/// A controller action, type-erased.
pub type Action<C> = Arc<dyn Fn(Arc<C>, Context) -> BoxFuture<HandlerResult> + Send + Sync>;

/// One declared route of a controller.
pub struct RouteEntry<C> {
    pub method: Method,
    pub template: String,
    /// Short action name used in logs, e.g. `ping`.
    pub action_name: &'static str,
    action: Action<C>,
}

/// The explicit route list a [`Controller`] fills in.
pub struct RouteTable<C> {
    entries: Vec<RouteEntry<C>>,
}

impl<C: Send + Sync + 'static> RouteTable<C> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn get<F, Fut>(&mut self, template: &str, action: F) -> &mut Self
    where
        F: Fn(Arc<C>, Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.route(Method::Get, template, action)
    }

    pub fn post<F, Fut>(&mut self, template: &str, action: F) -> &mut Self
    where
        F: Fn(Arc<C>, Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.route(Method::Post, template, action)
    }

    pub fn put<F, Fut>(&mut self, template: &str, action: F) -> &mut Self
    where
        F: Fn(Arc<C>, Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.route(Method::Put, template, action)
    }

    pub fn delete<F, Fut>(&mut self, template: &str, action: F) -> &mut Self
    where
        F: Fn(Arc<C>, Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.route(Method::Delete, template, action)
    }

    pub fn route<F, Fut>(&mut self, method: Method, template: &str, action: F) -> &mut Self
    where
        F: Fn(Arc<C>, Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.entries.push(RouteEntry {
            method,
            template: template.to_owned(),
            action_name: short_name(std::any::type_name::<F>()),
            action: Arc::new(
                move |controller: Arc<C>, ctx: Context| -> BoxFuture<HandlerResult> {
                    Box::pin(action(controller, ctx))
                },
            ),
        });
        self
    }

    /// Name the most recently added action in logs and [`RouteInfo`].
    ///
    /// Actions default to the last path segment of their type name, which is
    /// the method name for `Self::method` but `{{closure}}` for a closure.
    pub fn named(&mut self, name: &'static str) -> &mut Self {
        if let Some(last) = self.entries.last_mut() {
            last.action_name = name;
        }
        self
    }

    pub fn entries(&self) -> &[RouteEntry<C>] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Collect the table a controller declares.
    pub fn of() -> Self
    where
        C: Controller,
    {
        let mut table = Self::new();
        C::routes(&mut table);
        table
    }

    pub(crate) fn into_entries(self) -> Vec<RouteEntry<C>> {
        self.entries
    }
}

impl<C: Send + Sync + 'static> Default for RouteTable<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> RouteEntry<C> {
    pub(crate) fn action(&self) -> Action<C> {
        Arc::clone(&self.action)
    }
}

/// What the registrar installed, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteInfo {
    pub controller: &'static str,
    pub action: &'static str,
    pub method: Method,
    pub template: String,
}

/// Installs controller route tables into a [`Router`].
pub struct RouteRegistrar {
    container: Container,
    registered: Vec<RouteInfo>,
}

impl RouteRegistrar {
    pub fn new(container: Container) -> Self {
        Self {
            container,
            registered: Vec::new(),
        }
    }

    /// Register every route `C` declares. Returns how many were added.
    ///
    /// Each handler resolves `C` from the container per request. A resolution
    /// failure or an action error reaches the router as an error carrying the
    /// controller and action names, which it logs and answers with `500`.
    pub fn register<C: Controller>(&mut self, router: &mut Router) -> usize {
        let controller = std::any::type_name::<C>();
        let entries = RouteTable::<C>::of().into_entries();

        if entries.is_empty() {
            warn!(controller, "controller declares no routes");
            return 0;
        }

        for entry in &entries {
            let handler =
                controller_handler::<C>(self.container.clone(), entry.action(), entry.action_name);
            router.add_route(entry.method.clone(), &entry.template, handler);
            self.registered.push(RouteInfo {
                controller,
                action: entry.action_name,
                method: entry.method.clone(),
                template: entry.template.clone(),
            });
        }

        info!(controller, routes = entries.len(), "controller routes registered");
        entries.len()
    }

    /// Checks that `C` can be resolved from the container right now.
    pub fn validate<C: Controller>(&self) -> Result<(), DiError> {
        self.container.resolve::<C>().map(|_| ())
    }

    pub fn routes_info(&self) -> &[RouteInfo] {
        &self.registered
    }
}

fn controller_handler<C: Controller>(
    container: Container,
    action: Action<C>,
    action_name: &'static str,
) -> impl Fn(Context) -> BoxFuture<HandlerResult> + Send + Sync + 'static {
    move |ctx: Context| -> BoxFuture<HandlerResult> {
        let container = container.clone();
        let action = Arc::clone(&action);
        Box::pin(async move {
            let controller_name = std::any::type_name::<C>();
            let controller = container
                .resolve::<C>()
                .with_context(|| format!("cannot resolve controller {controller_name}"))?;
            action(controller, ctx)
                .await
                .with_context(|| format!("{controller_name}::{action_name} failed"))
        })
    }
}

// `my_crate::PingController::ping` -> `ping`
fn short_name(full: &'static str) -> &'static str {
    full.rsplit("::").next().unwrap_or(full)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::di::{Injectable, ServiceCollection};
    use crate::{Request, Response, StatusCode};

    static CONSTRUCTED: AtomicUsize = AtomicUsize::new(0);

    struct PawnController;

    impl Injectable for PawnController {
        fn construct(_: &Container) -> Result<Self, DiError> {
            CONSTRUCTED.fetch_add(1, Ordering::SeqCst);
            Ok(PawnController)
        }
    }

    impl Controller for PawnController {
        fn routes(table: &mut RouteTable<Self>) {
            table
                .get("/api/v1/pawn/{id}", Self::pawn)
                .post("/api/v1/pawn/{id}/draft", Self::draft);
        }
    }

    impl PawnController {
        async fn pawn(self: Arc<Self>, ctx: Context) -> HandlerResult {
            let id: u32 = ctx.param_parsed("id")?;
            Ok(Response::new(StatusCode::Ok).body(format!("pawn {id}")))
        }

        async fn draft(self: Arc<Self>, _ctx: Context) -> HandlerResult {
            anyhow::bail!("pawn is downed")
        }
    }

    struct EmptyController;

    impl Controller for EmptyController {
        fn routes(_: &mut RouteTable<Self>) {}
    }

    #[test]
    fn table_collects_entries_with_action_names() {
        let table = RouteTable::<PawnController>::of();
        assert_eq!(table.len(), 2);
        assert_eq!(table.entries()[0].method, Method::Get);
        assert_eq!(table.entries()[0].action_name, "pawn");
        assert_eq!(table.entries()[1].template, "/api/v1/pawn/{id}/draft");
    }

    #[tokio::test]
    async fn transient_controller_resolved_per_request() {
        let mut services = ServiceCollection::new();
        services.add_transient::<PawnController>();
        let mut registrar = RouteRegistrar::new(services.build());
        let mut router = Router::new();

        assert_eq!(registrar.register::<PawnController>(&mut router), 2);
        assert!(registrar.validate::<PawnController>().is_ok());
        let before = CONSTRUCTED.load(Ordering::SeqCst);

        let res = router.dispatch(Request::new(Method::Get, "/api/v1/pawn/7")).await;
        assert_eq!(res.status(), StatusCode::Ok);
        assert_eq!(res.body_text(), "pawn 7");
        router.dispatch(Request::new(Method::Get, "/api/v1/pawn/8")).await;

        assert!(CONSTRUCTED.load(Ordering::SeqCst) >= before + 2);
    }

    #[tokio::test]
    async fn action_errors_become_500() {
        let mut services = ServiceCollection::new();
        services.add_singleton::<PawnController>();
        let mut registrar = RouteRegistrar::new(services.build());
        let mut router = Router::new();
        registrar.register::<PawnController>(&mut router);

        let res = router.dispatch(Request::new(Method::Post, "/api/v1/pawn/1/draft")).await;
        assert_eq!(res.status(), StatusCode::InternalServerError);

        let res = router.dispatch(Request::new(Method::Get, "/api/v1/pawn/abc")).await;
        assert_eq!(res.status(), StatusCode::InternalServerError);
    }

    #[tokio::test]
    async fn unregistered_controller_yields_500_not_panic() {
        let mut registrar = RouteRegistrar::new(ServiceCollection::new().build());
        let mut router = Router::new();
        registrar.register::<PawnController>(&mut router);

        assert!(matches!(
            registrar.validate::<PawnController>(),
            Err(DiError::ServiceNotRegistered { .. })
        ));
        let res = router.dispatch(Request::new(Method::Get, "/api/v1/pawn/1")).await;
        assert_eq!(res.status(), StatusCode::InternalServerError);
    }

    #[test]
    fn empty_controller_registers_nothing() {
        let mut registrar = RouteRegistrar::new(ServiceCollection::new().build());
        let mut router = Router::new();
        assert_eq!(registrar.register::<EmptyController>(&mut router), 0);
        assert!(router.is_empty());
        assert!(registrar.routes_info().is_empty());
    }

    #[test]
    fn routes_info_lists_registrations() {
        let mut registrar = RouteRegistrar::new(ServiceCollection::new().build());
        let mut router = Router::new();
        registrar.register::<PawnController>(&mut router);

        let info = registrar.routes_info();
        assert_eq!(info.len(), 2);
        assert!(info[0].controller.ends_with("PawnController"));
        assert_eq!(info[1].action, "draft");
        assert_eq!(info[1].method, Method::Post);
    }

    struct InlineController;

    impl Injectable for InlineController {
        fn construct(_: &Container) -> Result<Self, DiError> {
            Ok(InlineController)
        }
    }

    impl Controller for InlineController {
        fn routes(table: &mut RouteTable<Self>) {
            table
                .get("/api/v1/inline", |_: Arc<Self>, _ctx: Context| async {
                    Ok::<_, anyhow::Error>(Response::new(StatusCode::Ok).body("inline"))
                })
                .get("/api/v1/inline/status", |_: Arc<Self>, _ctx: Context| async {
                    Ok::<_, anyhow::Error>(Response::new(StatusCode::Ok).body("up"))
                })
                .named("status");
        }
    }

    #[test]
    fn closure_actions_can_be_named() {
        let table = RouteTable::<InlineController>::of();
        assert_eq!(table.entries()[0].action_name, "{{closure}}");
        assert_eq!(table.entries()[1].action_name, "status");

        let mut registrar = RouteRegistrar::new(ServiceCollection::new().build());
        let mut router = Router::new();
        registrar.register::<InlineController>(&mut router);
        assert_eq!(registrar.routes_info()[1].action, "status");
    }
}
