//! Third-party extensions: discovery, registration and fault isolation.
//!
//! An [`Extension`] contributes services, routes and event types. The host
//! hands an [`ExtensionRegistry`] the list of extension constructors it knows
//! about; [`ExtensionRegistry::discover`] builds them once, and the
//! `register_*` stages then let each extension wire itself in. A failing or
//! panicking extension is logged and skipped without affecting the others.
//!
//! Typical host wiring:
//!
//! ```no_run
//! # use waypoint::extension::{EventRegistry, ExtensionRegistry};
//! # use waypoint::di::ServiceCollection;
//! # use waypoint::Router;
//! # fn constructors(r: ExtensionRegistry) -> ExtensionRegistry { r }
//! let registry = constructors(ExtensionRegistry::new());
//! registry.discover();
//!
//! let mut services = ServiceCollection::new();
//! registry.register_services(&mut services);
//! let container = services.build();
//!
//! let events = EventRegistry::default();
//! registry.register_event_types(&events);
//!
//! let mut router = Router::new();
//! registry.register_routes(&mut router, &container, "/api/v1");
//! ```

mod events;
mod router;

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::Router;
use crate::di::{Container, ServiceCollection};
use crate::router::panic_message;

pub use events::{Event, EventError, EventRegistry};
pub use router::ExtensionRouter;

/// The capability contract every extension implements.
pub trait Extension: Send + Sync + 'static {
    /// Unique id, also the route namespace. Compared case-insensitively.
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    fn version(&self) -> &str;

    fn register_services(&self, _services: &mut ServiceCollection) -> anyhow::Result<()> {
        Ok(())
    }

    fn register_routes(&self, router: &mut ExtensionRouter<'_>) -> anyhow::Result<()>;

    fn register_event_types(&self, _events: &EventRegistry) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Builds one extension. Supplied by the host in place of runtime discovery.
pub type ExtensionFactory =
    Box<dyn Fn() -> anyhow::Result<Box<dyn Extension>> + Send + Sync + 'static>;

/// Identity of a registered extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtensionDescriptor {
    /// Lowercased id.
    pub id: String,
    pub name: String,
    pub version: String,
}

/// The registration step an extension fault happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Construction,
    Services,
    Routes,
    Events,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Construction => "construction",
            Stage::Services => "service registration",
            Stage::Routes => "route registration",
            Stage::Events => "event registration",
        })
    }
}

#[derive(Debug, Error)]
pub enum ExtensionError {
    #[error("invalid extension id {id:?}: use only a-z, 0-9, '.', '_' and '-'")]
    InvalidId { id: String },

    #[error("extension '{id}' is already registered")]
    DuplicateId { id: String },

    #[error("extension '{extension_id}' failed during {stage}: {message}")]
    Fault {
        extension_id: String,
        stage: Stage,
        message: String,
    },
}

struct Registered {
    descriptor: ExtensionDescriptor,
    extension: Arc<dyn Extension>,
}

#[derive(Default)]
struct RegistryState {
    extensions: Vec<Registered>,
    discovered: bool,
}

/// Holds the registered extensions and drives their registration stages.
#[derive(Default)]
pub struct ExtensionRegistry {
    factories: Vec<ExtensionFactory>,
    state: Mutex<RegistryState>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a constructor that [`discover`](Self::discover) will run.
    #[must_use]
    pub fn with_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> anyhow::Result<Box<dyn Extension>> + Send + Sync + 'static,
    {
        self.factories.push(Box::new(factory));
        self
    }

    /// Run every known constructor once and register the results.
    ///
    /// A second call only logs a warning. Constructors that fail or panic are
    /// logged and skipped. Returns the faults encountered, duplicates included.
    pub fn discover(&self) -> Vec<ExtensionError> {
        {
            let mut state = self.state.lock();
            if state.discovered {
                warn!("extension discovery already completed");
                return Vec::new();
            }
            state.discovered = true;
        }

        info!(candidates = self.factories.len(), "discovering extensions");
        let mut faults = Vec::new();

        for (index, factory) in self.factories.iter().enumerate() {
            let message = match catch_unwind(AssertUnwindSafe(|| factory())) {
                Ok(Ok(extension)) => {
                    if let Err(e) = self.register(extension) {
                        faults.push(e);
                    }
                    continue;
                }
                Ok(Err(e)) => format!("{e:#}"),
                Err(payload) => panic_message(payload.as_ref()),
            };
            // Not built, so there is no id yet; name the factory by position.
            faults.push(Self::fault(format!("factory #{index}"), Stage::Construction, message));
        }

        info!(extensions = self.len(), "extension discovery complete");
        faults
    }

    /// Register an extension directly.
    ///
    /// # Errors
    ///
    /// [`ExtensionError::InvalidId`] unless the lowercased id is a non-empty
    /// run of `a-z`, `0-9`, `.`, `_` and `-`, so it can only ever compile as a
    /// literal path segment. [`ExtensionError::DuplicateId`] when the id is
    /// taken. The first registration of an id always wins.
    pub fn register(&self, extension: Box<dyn Extension>) -> Result<(), ExtensionError> {
        let id = extension.id().trim().to_lowercase();
        if !is_valid_id(&id) {
            let err = ExtensionError::InvalidId {
                id: extension.id().to_owned(),
            };
            error!(error = %err, "extension rejected");
            return Err(err);
        }

        let descriptor = ExtensionDescriptor {
            id,
            name: extension.name().to_owned(),
            version: extension.version().to_owned(),
        };

        let mut state = self.state.lock();
        if state.extensions.iter().any(|r| r.descriptor.id == descriptor.id) {
            warn!(id = %descriptor.id, "extension id already registered, ignoring");
            return Err(ExtensionError::DuplicateId { id: descriptor.id });
        }

        info!(
            id = %descriptor.id,
            name = %descriptor.name,
            version = %descriptor.version,
            "extension registered"
        );
        state.extensions.push(Registered {
            descriptor,
            extension: Arc::from(extension),
        });
        Ok(())
    }

    pub fn has_extension(&self, id: &str) -> bool {
        let id = id.to_lowercase();
        self.state.lock().extensions.iter().any(|r| r.descriptor.id == id)
    }

    pub fn descriptors(&self) -> Vec<ExtensionDescriptor> {
        self.state
            .lock()
            .extensions
            .iter()
            .map(|r| r.descriptor.clone())
            .collect()
    }

    pub fn is_discovered(&self) -> bool {
        self.state.lock().discovered
    }

    pub fn len(&self) -> usize {
        self.state.lock().extensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Let every extension add its services. Returns the isolated faults.
    pub fn register_services(&self, services: &mut ServiceCollection) -> Vec<ExtensionError> {
        self.run_stage(Stage::Services, |extension| extension.register_services(services))
    }

    /// Let every extension add its routes under `{route_prefix}/{id}/`.
    pub fn register_routes(
        &self,
        router: &mut Router,
        container: &Container,
        route_prefix: &str,
    ) -> Vec<ExtensionError> {
        self.run_stage(Stage::Routes, |extension| {
            let namespace = extension.id().trim().to_lowercase();
            let mut scoped =
                ExtensionRouter::new(router, &namespace, route_prefix, container.clone());
            extension.register_routes(&mut scoped)
        })
    }

    /// Let every extension declare the event types it publishes.
    pub fn register_event_types(&self, events: &EventRegistry) -> Vec<ExtensionError> {
        self.run_stage(Stage::Events, |extension| extension.register_event_types(events))
    }

    // Runs one stage over a snapshot of the extensions, so callbacks never run
    // under the registry lock.
    fn run_stage(
        &self,
        stage: Stage,
        mut step: impl FnMut(&dyn Extension) -> anyhow::Result<()>,
    ) -> Vec<ExtensionError> {
        let snapshot: Vec<(String, Arc<dyn Extension>)> = self
            .state
            .lock()
            .extensions
            .iter()
            .map(|r| (r.descriptor.id.clone(), Arc::clone(&r.extension)))
            .collect();

        let mut faults = Vec::new();
        for (id, extension) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| step(extension.as_ref()))) {
                Ok(Ok(())) => info!(extension = %id, %stage, "extension stage complete"),
                Ok(Err(e)) => faults.push(Self::fault(id, stage, format!("{e:#}"))),
                Err(payload) => {
                    faults.push(Self::fault(id, stage, panic_message(payload.as_ref())));
                }
            }
        }
        faults
    }

    fn fault(extension_id: String, stage: Stage, message: String) -> ExtensionError {
        let err = ExtensionError::Fault {
            extension_id,
            stage,
            message,
        };
        error!(error = %err, "extension fault isolated");
        err
    }
}

fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-'))
}

impl fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionRegistry")
            .field("factories", &self.factories.len())
            .field("extensions", &self.descriptors())
            .finish()
    }
}
