//! Request routing: map `(method, path)` pairs to handler functions.
//!
//! This module provides [`Router`], which dispatches incoming requests to handlers based
//! on the request method and a path template. Templates use named placeholders:
//!
//! | Template                 | Example match             | Captured params          |
//! |--------------------------|---------------------------|--------------------------|
//! | `/version`               | `/version`                | *(none)*                 |
//! | `/pawn/{id}`             | `/pawn/42`                | `id → "42"`              |
//! | `/map/{map}/zone/:zone`  | `/map/0/zone/3`           | `map → "0"`, `zone → "3"` |
//!
//! Literal segments compare case-insensitively, so `/Pawn/42` matches `/pawn/{id}`.
//! Trailing slashes are ignored on both templates and incoming paths, except for the
//! root `/`. Routes are matched in registration order and the first match wins; a
//! duplicate `(method, template)` pair is kept, never replaced, and only the first one
//! is ever reached.
//!
//! [`Router::dispatch`] always produces exactly one [`Response`]: a `404` envelope when
//! nothing matches, and a `500` envelope when the handler returns an error or panics.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

use futures::FutureExt;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::context::{Context, Parameters};
use crate::http::ApiResult;
use crate::{Method, Request, Response, StatusCode};

/// What every handler resolves to. Returning `Err` is how a handler signals a fault.
pub type HandlerResult = anyhow::Result<Response>;

/// Boxed, `Send` future used for type-erased handlers.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Type-erased, heap-allocated async handler that processes a [`Context`].
///
/// Handlers are stored behind `Arc<dyn Fn(…)>` so they can be cloned and shared across
/// tasks without copying the underlying closure. Register closures through
/// [`Router::get`] and friends; use [`Router::add_handler`] when you already hold one.
pub type Handler = Arc<dyn Fn(Context) -> BoxFuture<HandlerResult> + Send + Sync + 'static>;

/// Conversion trait for async handler functions.
///
/// Any `Fn(Context) -> impl Future<Output = HandlerResult> + Send` that is also
/// `Send + Sync + 'static` implements this trait through the blanket impl below.
pub trait IntoHandler: Send + Sync + 'static {
    /// Call the handler with the given context, boxing the returned future.
    fn call(&self, ctx: Context) -> BoxFuture<HandlerResult>;
}

impl<T, F> IntoHandler for T
where
    T: Fn(Context) -> F + Send + Sync + 'static,
    F: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, ctx: Context) -> BoxFuture<HandlerResult> {
        Box::pin((self)(ctx))
    }
}

/// Erase a handler into the shared [`Handler`] form.
pub fn into_handler(handler: impl IntoHandler) -> Handler {
    Arc::new(move |ctx| handler.call(ctx))
}

/// Failures at the dispatch boundary.
///
/// None of these ever reach the transport: [`Router::dispatch`] logs them and turns
/// them into responses with [`DispatchError::to_response`].
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no route for {method} {path}")]
    RouteNotFound { method: Method, path: String },

    #[error("handler for {method} {path} failed: {error:#}")]
    HandlerFault {
        method: Method,
        path: String,
        error: anyhow::Error,
    },

    #[error("handler for {method} {path} panicked: {message}")]
    HandlerPanicked {
        method: Method,
        path: String,
        message: String,
    },
}

impl DispatchError {
    /// `404` for an unmatched route, `500` for anything the handler did.
    ///
    /// Fault details stay in the logs; the client only sees a generic message.
    pub fn to_response(&self) -> Response {
        match self {
            Self::RouteNotFound { method, path } => {
                ApiResult::<()>::fail(format!("Endpoint not found: {method} {path}"))
                    .into_response(StatusCode::NotFound)
            }
            Self::HandlerFault { method, path, .. } | Self::HandlerPanicked { method, path, .. } => {
                ApiResult::<()>::fail(format!("Internal server error while handling {method} {path}"))
                    .into_response(StatusCode::InternalServerError)
            }
        }
    }
}

// A single path segment, either a literal string or a named capture.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

impl Segment {
    fn parse(raw: &str) -> Self {
        let name = raw
            .strip_prefix('{')
            .and_then(|s| s.strip_suffix('}'))
            .or_else(|| raw.strip_prefix(':'))
            .filter(|name| !name.is_empty());

        match name {
            Some(name) => Segment::Param(name.to_owned()),
            None => Segment::Literal(raw.to_owned()),
        }
    }
}

// Compiled form of a path template, built once at registration.
#[derive(Debug, Clone)]
struct Pattern {
    segments: Vec<Segment>,
}

impl Pattern {
    fn parse(template: &str) -> Self {
        Self {
            segments: split_segments(template).map(Segment::parse).collect(),
        }
    }

    // Returns the captured parameters when every segment of `path` matches.
    fn matches(&self, path: &str) -> Option<Parameters> {
        let mut params = Parameters::new();
        let mut parts = split_segments(path);

        for segment in &self.segments {
            let part = parts.next()?;
            match segment {
                Segment::Literal(literal) => {
                    if !literal.eq_ignore_ascii_case(part) {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    if part.is_empty() {
                        return None;
                    }
                    params.insert(name.clone(), part);
                }
            }
        }

        if parts.next().is_some() {
            return None;
        }
        Some(params)
    }
}

/// Strips a trailing slash, keeping `/` for the root; an empty path becomes `/`.
pub fn normalize_path(path: &str) -> &str {
    if path.is_empty() {
        return "/";
    }
    match path.strip_suffix('/') {
        Some(stripped) if !stripped.is_empty() => stripped,
        _ => path,
    }
}

fn split_segments(path: &str) -> impl Iterator<Item = &str> {
    let path = normalize_path(path);
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    trimmed.split('/').filter(move |_| !trimmed.is_empty())
}

// A single registered route binding a method + template to a handler.
struct Route {
    method: Method,
    template: String,
    pattern: Pattern,
    handler: Handler,
}

/// A successful lookup: the handler to run and the parameters it receives.
pub struct RouteMatch<'a> {
    pub template: &'a str,
    pub params: Parameters,
    pub handler: Handler,
}

/// HTTP request router that dispatches requests to registered handler functions.
///
/// # Examples
///
/// ```rust,no_run
/// use waypoint::{Context, HandlerResult, Response, Router, StatusCode};
///
/// async fn pawn(ctx: Context) -> HandlerResult {
///     let id: u32 = ctx.param_parsed("id")?;
///     Ok(Response::new(StatusCode::Ok).body(id.to_string()))
/// }
///
/// let mut router = Router::new();
/// router.get("/ping", |_ctx: Context| async {
///     Ok::<_, anyhow::Error>(Response::new(StatusCode::Ok))
/// });
/// router.get("/pawn/{id}", pawn);
/// ```
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Register a handler for `GET` (and therefore `HEAD`) requests matching `template`.
    pub fn get(&mut self, template: &str, handler: impl IntoHandler) {
        self.add_route(Method::Get, template, handler);
    }

    /// Register a handler for `POST` requests matching `template`.
    pub fn post(&mut self, template: &str, handler: impl IntoHandler) {
        self.add_route(Method::Post, template, handler);
    }

    /// Register a handler for `PUT` requests matching `template`.
    pub fn put(&mut self, template: &str, handler: impl IntoHandler) {
        self.add_route(Method::Put, template, handler);
    }

    /// Register a handler for `DELETE` requests matching `template`.
    pub fn delete(&mut self, template: &str, handler: impl IntoHandler) {
        self.add_route(Method::Delete, template, handler);
    }

    /// Register a handler for any method.
    pub fn add_route(&mut self, method: Method, template: &str, handler: impl IntoHandler) {
        self.add_handler(method, template, into_handler(handler));
    }

    /// Register an already type-erased handler.
    ///
    /// The template is compiled here, once. Registering the same `(method, template)`
    /// twice keeps both routes; the first one wins at dispatch.
    pub fn add_handler(&mut self, method: Method, template: &str, handler: Handler) {
        let template = normalize_path(template).to_owned();
        debug!(method = %method, template = %template, "route registered");
        self.routes.push(Route {
            pattern: Pattern::parse(&template),
            method,
            template,
            handler,
        });
    }

    /// Remove every route. Meant for resetting between test runs, not for use while serving.
    pub fn clear_routes(&mut self) {
        let count = self.routes.len();
        self.routes.clear();
        debug!(count, "all routes cleared");
    }

    /// Registered `(method, template)` pairs in registration order.
    pub fn routes(&self) -> impl Iterator<Item = (&Method, &str)> {
        self.routes.iter().map(|r| (&r.method, r.template.as_str()))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Find the first route matching `method` and `path`.
    ///
    /// `HEAD` is matched as `GET`. The path is normalized before matching.
    ///
    /// # Errors
    ///
    /// [`DispatchError::RouteNotFound`] carrying the method and path when nothing matches.
    pub fn find(&self, method: &Method, path: &str) -> Result<RouteMatch<'_>, DispatchError> {
        let routing_method = method.routing_method();
        let path = normalize_path(path);

        self.routes
            .iter()
            .filter(|route| route.method == routing_method)
            .find_map(|route| {
                route.pattern.matches(path).map(|params| RouteMatch {
                    template: route.template.as_str(),
                    params,
                    handler: Arc::clone(&route.handler),
                })
            })
            .ok_or_else(|| DispatchError::RouteNotFound {
                method: method.clone(),
                path: path.to_owned(),
            })
    }

    /// Dispatch `request` to the first matching route and return its response.
    ///
    /// Never fails: unmatched requests get a `404` envelope, and a handler that
    /// returns `Err` or panics gets a `500` envelope. Every fault is logged with the
    /// method, path and error.
    pub async fn dispatch(&self, request: Request) -> Response {
        let method = request.method().clone();
        let path = normalize_path(request.path()).to_owned();

        let matched = match self.find(&method, &path) {
            Ok(matched) => matched,
            Err(not_found) => {
                warn!(method = %method, path = %path, "no route found");
                let available: Vec<&str> = self
                    .routes
                    .iter()
                    .filter(|r| r.method == method.routing_method())
                    .map(|r| r.template.as_str())
                    .collect();
                if !available.is_empty() {
                    debug!(method = %method, routes = ?available, "available routes");
                }
                return not_found.to_response();
            }
        };

        debug!(method = %method, path = %path, template = matched.template, "route matched");
        let ctx = Context::with_params(request, matched.params);

        match AssertUnwindSafe((matched.handler)(ctx)).catch_unwind().await {
            Ok(Ok(response)) => response,
            Ok(Err(error)) => {
                let fault = DispatchError::HandlerFault { method, path, error };
                error!(error = %fault, "route handler failed");
                fault.to_response()
            }
            Err(payload) => {
                let fault = DispatchError::HandlerPanicked {
                    method,
                    path,
                    message: panic_message(payload.as_ref()),
                };
                error!(error = %fault, "route handler panicked");
                fault.to_response()
            }
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
