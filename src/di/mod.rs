//! Dependency injection: a registration builder and the container it freezes into.
//!
//! Services are registered on a [`ServiceCollection`] with a [`Lifetime`], then
//! [`ServiceCollection::build`] produces an immutable [`Container`] that resolves
//! them on demand. Three kinds of constructor exist:
//!
//! - **implementation types** implementing [`Injectable`], whose constructor pulls
//!   its own dependencies from the container,
//! - **instances** handed over ready-made (always singletons),
//! - **factories**, closures receiving the container.
//!
//! Services are keyed by type, so a trait object such as `dyn Clock` can be
//! registered and resolved as `Arc<dyn Clock>`.
//!
//! ```
//! use std::sync::Arc;
//! use waypoint::di::{Container, DiError, Injectable, ServiceCollection};
//!
//! trait Clock: Send + Sync {
//!     fn ticks(&self) -> u64;
//! }
//!
//! struct FixedClock;
//! impl Clock for FixedClock {
//!     fn ticks(&self) -> u64 { 60_000 }
//! }
//!
//! struct Ping {
//!     clock: Arc<dyn Clock>,
//! }
//!
//! impl Injectable for Ping {
//!     fn construct(container: &Container) -> Result<Self, DiError> {
//!         Ok(Self { clock: container.resolve::<dyn Clock>()? })
//!     }
//! }
//!
//! let mut services = ServiceCollection::new();
//! services.add_singleton_arc::<dyn Clock>(Arc::new(FixedClock));
//! services.add_transient::<Ping>();
//!
//! let container = services.build();
//! let ping = container.resolve::<Ping>().unwrap();
//! assert_eq!(ping.clock.ticks(), 60_000);
//! ```

mod collection;
mod container;

use thiserror::Error;

pub use collection::ServiceCollection;
pub use container::Container;

/// How long a resolved service lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifetime {
    /// Constructed once per container, on first use, and shared afterwards.
    Singleton,
    /// Constructed anew on every resolution.
    Transient,
}

/// A type the container can build by resolving its own dependencies.
pub trait Injectable: Sized + Send + Sync + 'static {
    fn construct(container: &Container) -> Result<Self, DiError>;
}

/// Errors produced while resolving services.
#[derive(Debug, Error)]
pub enum DiError {
    #[error("service not registered: {type_name}")]
    ServiceNotRegistered { type_name: &'static str },

    #[error("circular dependency detected: {chain}")]
    CircularDependency { chain: String },

    #[error("failed to construct {type_name}: {message}")]
    Construction {
        type_name: &'static str,
        message: String,
    },

    #[error("stored service for {type_name} has an unexpected type")]
    TypeMismatch { type_name: &'static str },
}

impl DiError {
    /// Construction failure for `T`, for use inside constructors and factories.
    pub fn construction<T: ?Sized>(message: impl std::fmt::Display) -> Self {
        Self::Construction {
            type_name: std::any::type_name::<T>(),
            message: message.to_string(),
        }
    }
}
