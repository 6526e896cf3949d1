//! Route registration scoped to one extension's namespace.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::Context as _;
use futures::FutureExt;
use tracing::{error, info, warn};

use crate::controller::{Action, Controller, RouteTable};
use crate::di::{Container, DiError, Injectable};
use crate::http::ApiResult;
use crate::router::{
    BoxFuture, Handler, HandlerResult, IntoHandler, Router, into_handler, panic_message,
};
use crate::{Context, Method, Response, StatusCode};

/// A view of the main [`Router`] that mounts everything under
/// `{route_prefix}/{namespace}/`.
///
/// Every handler is wrapped so that an error or panic is logged with the
/// extension id and answered with a `500` naming the extension, instead of
/// reaching the main router's generic fault path.
pub struct ExtensionRouter<'a> {
    router: &'a mut Router,
    namespace: String,
    prefix: String,
    container: Container,
}

impl<'a> ExtensionRouter<'a> {
    /// `namespace` is lowercased; `route_prefix` may be empty or end with `/`.
    pub fn new(
        router: &'a mut Router,
        namespace: &str,
        route_prefix: &str,
        container: Container,
    ) -> Self {
        Self {
            router,
            namespace: namespace.to_lowercase(),
            prefix: route_prefix.trim_end_matches('/').to_owned(),
            container,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The application container, for handlers that need services.
    pub fn container(&self) -> &Container {
        &self.container
    }

    /// The full path `path` is mounted at.
    pub fn full_path(&self, path: &str) -> String {
        format!(
            "{}/{}/{}",
            self.prefix,
            self.namespace,
            path.trim_start_matches('/')
        )
    }

    pub fn get(&mut self, path: &str, handler: impl IntoHandler) -> &mut Self {
        self.add_route(Method::Get, path, handler)
    }

    pub fn post(&mut self, path: &str, handler: impl IntoHandler) -> &mut Self {
        self.add_route(Method::Post, path, handler)
    }

    pub fn put(&mut self, path: &str, handler: impl IntoHandler) -> &mut Self {
        self.add_route(Method::Put, path, handler)
    }

    pub fn delete(&mut self, path: &str, handler: impl IntoHandler) -> &mut Self {
        self.add_route(Method::Delete, path, handler)
    }

    /// Mount `handler` at `path` inside the namespace. Empty paths are logged
    /// and ignored.
    pub fn add_route(
        &mut self,
        method: Method,
        path: &str,
        handler: impl IntoHandler,
    ) -> &mut Self {
        self.mount(method, path, into_handler(handler));
        self
    }

    /// Mount every route controller `C` declares.
    ///
    /// `C` is resolved from the container per request; when it was never
    /// registered there, it is built with [`Injectable::construct`] instead.
    /// Returns the number of routes mounted.
    pub fn register_controller<C>(&mut self) -> usize
    where
        C: Controller + Injectable,
    {
        let table = RouteTable::<C>::of();
        if table.is_empty() {
            warn!(
                extension = %self.namespace,
                controller = std::any::type_name::<C>(),
                "controller declares no routes"
            );
            return 0;
        }

        let mut mounted = 0;
        for entry in table.entries() {
            let handler = resolving_handler::<C>(self.container.clone(), entry.action());
            if self.mount(entry.method.clone(), &entry.template, handler) {
                mounted += 1;
            }
        }
        info!(
            extension = %self.namespace,
            controller = std::any::type_name::<C>(),
            routes = mounted,
            "extension controller registered"
        );
        mounted
    }

    fn mount(&mut self, method: Method, path: &str, handler: Handler) -> bool {
        if path.trim_matches('/').is_empty() {
            error!(
                extension = %self.namespace,
                %method,
                "extension attempted to register an empty path"
            );
            return false;
        }

        let full_path = self.full_path(path);
        let namespace = self.namespace.clone();
        let route = full_path.clone();

        self.router.add_route(method.clone(), &full_path, move |ctx: Context| {
            let handler = Arc::clone(&handler);
            let namespace = namespace.clone();
            let route = route.clone();
            async move {
                let failure = match AssertUnwindSafe(handler(ctx)).catch_unwind().await {
                    Ok(Ok(response)) => return Ok(response),
                    Ok(Err(e)) => format!("{e:#}"),
                    Err(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
                };
                error!(
                    extension = %namespace,
                    route = %route,
                    error = %failure,
                    "extension endpoint failed"
                );
                HandlerResult::Ok(extension_fault_response(&namespace))
            }
        });

        info!(
            extension = %self.namespace,
            %method,
            path = %full_path,
            "extension endpoint registered"
        );
        true
    }
}

fn extension_fault_response(namespace: &str) -> Response {
    ApiResult::<()>::fail(format!("Extension '{namespace}' error"))
        .into_response(StatusCode::InternalServerError)
}

fn resolving_handler<C>(container: Container, action: Action<C>) -> Handler
where
    C: Controller + Injectable,
{
    Arc::new(move |ctx: Context| {
        let container = container.clone();
        let action = Arc::clone(&action);
        Box::pin(async move {
            let controller = match container.resolve::<C>() {
                Ok(controller) => controller,
                Err(DiError::ServiceNotRegistered { .. }) => Arc::new(C::construct(&container)?),
                Err(e) => return Err(e.into()),
            };
            action(controller, ctx)
                .await
                .with_context(|| format!("{} action failed", std::any::type_name::<C>()))
        }) as BoxFuture<HandlerResult>
    })
}
