//! # waypoint
//!
//! An embeddable request-dispatch runtime: a path-template [`Router`], a small
//! dependency-injection [`Container`], a multi-policy in-memory [`CacheService`]
//! and a registry that lets third-party extensions mount routes under their own
//! namespace. [`Server`] is an optional HTTP/1.1 transport in front of the router.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use waypoint::{Context, HandlerResult, Response, Router, Server, StatusCode};
//!
//! async fn pawn(ctx: Context) -> HandlerResult {
//!     let id = ctx.param_or("id", "unknown");
//!     Ok(Response::new(StatusCode::Ok).body(format!("pawn {id}")))
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut router = Router::new();
//!     router.get("/api/v1/pawn/{id}", pawn);
//!
//!     let server = Server::bind("127.0.0.1:8765").await?;
//!     server.serve(Arc::new(router)).await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod context;
pub mod controller;
pub mod di;
pub mod extension;
pub mod http;
pub mod router;
pub mod server;

pub use cache::CacheService;
pub use config::RuntimeConfig;
pub use context::{Context, Parameters};
pub use di::{Container, DiError, Injectable, ServiceCollection};
pub use http::{ApiResult, Headers, Method, Request, Response, StatusCode};
pub use router::{DispatchError, Handler, HandlerResult, IntoHandler, Router};
pub use server::{Server, ServerError};
