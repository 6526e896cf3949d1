//! Registration builder.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use super::container::{Constructor, Container, Descriptor, ErasedService};
use super::{DiError, Injectable, Lifetime};

/// Collects service registrations before freezing them into a [`Container`].
///
/// Registering the same service type twice replaces the earlier registration.
#[derive(Default)]
pub struct ServiceCollection {
    descriptors: HashMap<TypeId, Descriptor>,
}

impl ServiceCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T` as a singleton built by [`Injectable::construct`].
    pub fn add_singleton<T: Injectable>(&mut self) -> &mut Self {
        self.add_injectable::<T>(Lifetime::Singleton)
    }

    /// Register `T` as transient, built by [`Injectable::construct`] on every resolution.
    pub fn add_transient<T: Injectable>(&mut self) -> &mut Self {
        self.add_injectable::<T>(Lifetime::Transient)
    }

    /// Register implementation `I` under service type `S`, usually a trait object.
    ///
    /// `upcast` turns the constructed `Arc<I>` into `Arc<S>`; for a trait object
    /// that is just `|service| service`.
    pub fn add_singleton_impl<S, I, F>(&mut self, upcast: F) -> &mut Self
    where
        S: ?Sized + Send + Sync + 'static,
        I: Injectable,
        F: Fn(Arc<I>) -> Arc<S> + Send + Sync + 'static,
    {
        self.add_impl::<S, I, F>(Lifetime::Singleton, upcast)
    }

    /// Transient counterpart of [`add_singleton_impl`](Self::add_singleton_impl).
    pub fn add_transient_impl<S, I, F>(&mut self, upcast: F) -> &mut Self
    where
        S: ?Sized + Send + Sync + 'static,
        I: Injectable,
        F: Fn(Arc<I>) -> Arc<S> + Send + Sync + 'static,
    {
        self.add_impl::<S, I, F>(Lifetime::Transient, upcast)
    }

    /// Register a ready-made value as a singleton.
    pub fn add_singleton_instance<T: Send + Sync + 'static>(&mut self, instance: T) -> &mut Self {
        self.add_singleton_arc(Arc::new(instance))
    }

    /// Register an already shared value, possibly a trait object, as a singleton.
    pub fn add_singleton_arc<S>(&mut self, instance: Arc<S>) -> &mut Self
    where
        S: ?Sized + Send + Sync + 'static,
    {
        self.insert::<S>(
            Lifetime::Singleton,
            Arc::new(move |_: &Container| Ok(erase(Arc::clone(&instance)))),
        )
    }

    /// Register a factory whose result is memoized after the first call.
    pub fn add_singleton_factory<S, F>(&mut self, factory: F) -> &mut Self
    where
        S: ?Sized + Send + Sync + 'static,
        F: Fn(&Container) -> Result<Arc<S>, DiError> + Send + Sync + 'static,
    {
        self.insert::<S>(
            Lifetime::Singleton,
            Arc::new(move |c: &Container| factory(c).map(erase)),
        )
    }

    /// Register a factory invoked on every resolution.
    pub fn add_transient_factory<S, F>(&mut self, factory: F) -> &mut Self
    where
        S: ?Sized + Send + Sync + 'static,
        F: Fn(&Container) -> Result<Arc<S>, DiError> + Send + Sync + 'static,
    {
        self.insert::<S>(
            Lifetime::Transient,
            Arc::new(move |c: &Container| factory(c).map(erase)),
        )
    }

    pub fn is_registered<S: ?Sized + 'static>(&self) -> bool {
        self.descriptors.contains_key(&TypeId::of::<S>())
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Freeze the registrations. Nothing is constructed until it is resolved.
    pub fn build(self) -> Container {
        debug!(services = self.descriptors.len(), "service container built");
        Container::from_descriptors(self.descriptors)
    }

    fn add_injectable<T: Injectable>(&mut self, lifetime: Lifetime) -> &mut Self {
        self.insert::<T>(
            lifetime,
            Arc::new(|c: &Container| T::construct(c).map(|service| erase(Arc::new(service)))),
        )
    }

    fn add_impl<S, I, F>(&mut self, lifetime: Lifetime, upcast: F) -> &mut Self
    where
        S: ?Sized + Send + Sync + 'static,
        I: Injectable,
        F: Fn(Arc<I>) -> Arc<S> + Send + Sync + 'static,
    {
        self.insert::<S>(
            lifetime,
            Arc::new(move |c: &Container| {
                I::construct(c).map(|service| erase(upcast(Arc::new(service))))
            }),
        )
    }

    fn insert<S: ?Sized + 'static>(
        &mut self,
        lifetime: Lifetime,
        constructor: Constructor,
    ) -> &mut Self {
        let type_name = std::any::type_name::<S>();
        let previous = self.descriptors.insert(
            TypeId::of::<S>(),
            Descriptor {
                type_name,
                lifetime,
                constructor,
            },
        );
        if previous.is_some() {
            debug!(service = type_name, ?lifetime, "service registration replaced");
        } else {
            debug!(service = type_name, ?lifetime, "service registered");
        }
        self
    }
}

fn erase<S: ?Sized + Send + Sync + 'static>(service: Arc<S>) -> ErasedService {
    Box::new(service) as Box<dyn Any + Send + Sync>
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Config;

    impl Injectable for Config {
        fn construct(_: &Container) -> Result<Self, DiError> {
            Ok(Config)
        }
    }

    #[test]
    fn tracks_registrations() {
        let mut services = ServiceCollection::new();
        assert!(services.is_empty());
        services.add_singleton::<Config>().add_singleton_instance(7_u32);
        assert_eq!(services.len(), 2);
        assert!(services.is_registered::<Config>());
        assert!(services.is_registered::<u32>());
        assert!(!services.is_registered::<String>());
    }

    #[test]
    fn duplicate_registration_replaces() {
        let mut services = ServiceCollection::new();
        services.add_singleton_instance(1_u32);
        services.add_singleton_instance(2_u32);
        assert_eq!(services.len(), 1);
        let container = services.build();
        assert_eq!(*container.resolve::<u32>().unwrap(), 2);
    }
}
