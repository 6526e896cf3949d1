//! Event types declared by extensions, and a broadcast channel to publish them on.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

const DEFAULT_CAPACITY: usize = 256;

/// A published event.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub event_type: String,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum EventError {
    #[error("event type '{event_type}' is not registered")]
    UnregisteredType { event_type: String },

    #[error("event payload could not be serialized: {0}")]
    Payload(#[from] serde_json::Error),
}

/// The set of known event type names plus a fan-out channel.
///
/// Type names are stored as given; matching is exact. Publishing to a type
/// nobody declared is rejected so typos surface instead of vanishing.
pub struct EventRegistry {
    types: RwLock<BTreeSet<String>>,
    sender: broadcast::Sender<Event>,
}

impl EventRegistry {
    /// `capacity` bounds how many events a slow subscriber may lag behind.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            types: RwLock::new(BTreeSet::new()),
            sender,
        }
    }

    /// Returns `false` if the type was already registered.
    pub fn register_event_type(&self, event_type: impl Into<String>) -> bool {
        let event_type = event_type.into();
        let added = self.types.write().insert(event_type.clone());
        if added {
            debug!(%event_type, "event type registered");
        }
        added
    }

    pub fn is_event_type_registered(&self, event_type: &str) -> bool {
        self.types.read().contains(event_type)
    }

    /// Registered type names, sorted.
    pub fn registered_event_types(&self) -> Vec<String> {
        self.types.read().iter().cloned().collect()
    }

    /// Serialize `data` and send it to every current subscriber.
    ///
    /// Returns how many subscribers received it; having none is not an error.
    pub fn publish(&self, event_type: &str, data: impl Serialize) -> Result<usize, EventError> {
        if !self.is_event_type_registered(event_type) {
            warn!(event_type, "publish to unregistered event type");
            return Err(EventError::UnregisteredType {
                event_type: event_type.to_owned(),
            });
        }

        let event = Event {
            event_type: event_type.to_owned(),
            data: serde_json::to_value(data)?,
            timestamp: Utc::now(),
        };
        Ok(self.sender.send(event).unwrap_or(0))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for EventRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl std::fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRegistry")
            .field("types", &*self.types.read())
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}
