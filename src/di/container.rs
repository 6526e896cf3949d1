//! The frozen container and its resolution rules.

use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::{DiError, Lifetime};

/// A constructed service with its concrete `Arc<S>` type erased.
pub(super) type ErasedService = Box<dyn Any + Send + Sync>;

pub(super) type Constructor =
    Arc<dyn Fn(&Container) -> Result<ErasedService, DiError> + Send + Sync>;

pub(super) struct Descriptor {
    pub(super) type_name: &'static str,
    pub(super) lifetime: Lifetime,
    pub(super) constructor: Constructor,
}

struct Slot {
    descriptor: Descriptor,
    // Held across construction so concurrent first resolutions build once.
    singleton: Mutex<Option<ErasedService>>,
}

/// Resolves registered services. Cheap to clone; clones share singletons.
#[derive(Clone)]
pub struct Container {
    slots: Arc<HashMap<TypeId, Slot>>,
}

impl Container {
    pub(super) fn from_descriptors(descriptors: HashMap<TypeId, Descriptor>) -> Self {
        let slots = descriptors
            .into_iter()
            .map(|(id, descriptor)| {
                (
                    id,
                    Slot {
                        descriptor,
                        singleton: Mutex::new(None),
                    },
                )
            })
            .collect();
        Self {
            slots: Arc::new(slots),
        }
    }

    /// Resolve service `S`, constructing it (and its dependencies) if needed.
    ///
    /// Singletons are built on first resolution and shared afterwards, whatever
    /// kind of constructor they were registered with. Transients are built every
    /// time.
    ///
    /// # Errors
    ///
    /// - [`DiError::ServiceNotRegistered`] when `S`, or something it depends on, is unknown.
    /// - [`DiError::CircularDependency`] when `S` is already being resolved on this thread.
    /// - Whatever error a constructor or factory returned.
    pub fn resolve<S: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<S>, DiError> {
        let type_id = TypeId::of::<S>();
        let type_name = std::any::type_name::<S>();

        let slot = self
            .slots
            .get(&type_id)
            .ok_or(DiError::ServiceNotRegistered { type_name })?;

        let _guard = ResolutionGuard::enter(type_id, type_name)?;

        match slot.descriptor.lifetime {
            Lifetime::Transient => {
                let created = (slot.descriptor.constructor)(self)?;
                downcast::<S>(created.as_ref())
            }
            Lifetime::Singleton => {
                let mut cell = slot.singleton.lock();
                if let Some(existing) = cell.as_ref() {
                    return downcast::<S>(existing.as_ref());
                }
                let created = (slot.descriptor.constructor)(self)?;
                let service = downcast::<S>(created.as_ref())?;
                *cell = Some(created);
                debug!(service = slot.descriptor.type_name, "singleton constructed");
                Ok(service)
            }
        }
    }

    pub fn is_registered<S: ?Sized + 'static>(&self) -> bool {
        self.slots.contains_key(&TypeId::of::<S>())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.slots.values().map(|s| s.descriptor.type_name).collect();
        names.sort_unstable();
        f.debug_struct("Container").field("services", &names).finish()
    }
}

fn downcast<S: ?Sized + 'static>(erased: &(dyn Any + Send + Sync)) -> Result<Arc<S>, DiError> {
    erased
        .downcast_ref::<Arc<S>>()
        .cloned()
        .ok_or(DiError::TypeMismatch {
            type_name: std::any::type_name::<S>(),
        })
}

thread_local! {
    static RESOLVING: RefCell<Vec<(TypeId, &'static str)>> = const { RefCell::new(Vec::new()) };
}

// Marks a type as under construction on this thread; popped on drop, including unwinds.
struct ResolutionGuard;

impl ResolutionGuard {
    fn enter(type_id: TypeId, type_name: &'static str) -> Result<Self, DiError> {
        RESOLVING.with(|stack| {
            let mut stack = stack.borrow_mut();
            if let Some(start) = stack.iter().position(|(id, _)| *id == type_id) {
                let mut chain: Vec<&str> = stack[start..].iter().map(|(_, name)| *name).collect();
                chain.push(type_name);
                return Err(DiError::CircularDependency {
                    chain: chain.join(" -> "),
                });
            }
            stack.push((type_id, type_name));
            Ok(ResolutionGuard)
        })
    }
}

impl Drop for ResolutionGuard {
    fn drop(&mut self) {
        RESOLVING.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::di::{Injectable, ServiceCollection};

    trait Clock: Send + Sync {
        fn ticks(&self) -> u64;
    }

    struct GameClock;

    impl Clock for GameClock {
        fn ticks(&self) -> u64 {
            2_500
        }
    }

    impl Injectable for GameClock {
        fn construct(_: &Container) -> Result<Self, DiError> {
            Ok(GameClock)
        }
    }

    struct Ping {
        clock: Arc<dyn Clock>,
    }

    impl Injectable for Ping {
        fn construct(container: &Container) -> Result<Self, DiError> {
            Ok(Ping {
                clock: container.resolve::<dyn Clock>()?,
            })
        }
    }

    #[test]
    fn singleton_is_shared() {
        let mut services = ServiceCollection::new();
        services.add_singleton_impl::<dyn Clock, GameClock, _>(|c| c as Arc<dyn Clock>);
        let container = services.build();

        let a = container.resolve::<dyn Clock>().unwrap();
        let b = container.clone().resolve::<dyn Clock>().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn transient_is_fresh_but_shares_singleton_dependencies() {
        let mut services = ServiceCollection::new();
        services.add_singleton_impl::<dyn Clock, GameClock, _>(|c| c as Arc<dyn Clock>);
        services.add_transient::<Ping>();
        let container = services.build();

        let a = container.resolve::<Ping>().unwrap();
        let b = container.resolve::<Ping>().unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&a.clock, &b.clock));
        assert_eq!(a.clock.ticks(), 2_500);
    }

    #[test]
    fn unregistered_service_is_reported() {
        let container = ServiceCollection::new().build();
        let err = container.resolve::<String>().unwrap_err();
        assert!(matches!(err, DiError::ServiceNotRegistered { type_name } if type_name.contains("String")));
    }

    #[test]
    fn missing_dependency_surfaces_from_constructor() {
        let mut services = ServiceCollection::new();
        services.add_transient::<Ping>();
        let Err(err) = services.build().resolve::<Ping>() else {
            panic!("resolved without its dependency");
        };
        assert!(matches!(err, DiError::ServiceNotRegistered { type_name } if type_name.contains("Clock")));
    }

    #[test]
    fn factories_memoize_only_as_singletons() {
        let singleton_calls = Arc::new(AtomicUsize::new(0));
        let transient_calls = Arc::new(AtomicUsize::new(0));

        let mut services = ServiceCollection::new();
        let counter = Arc::clone(&singleton_calls);
        services.add_singleton_factory(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(String::from("shared")))
        });
        let counter = Arc::clone(&transient_calls);
        services.add_transient_factory(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(42_u64))
        });
        let container = services.build();

        for _ in 0..3 {
            container.resolve::<String>().unwrap();
            container.resolve::<u64>().unwrap();
        }
        assert_eq!(singleton_calls.load(Ordering::SeqCst), 1);
        assert_eq!(transient_calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn instance_is_returned_as_is() {
        let shared = Arc::new(String::from("colony"));
        let mut services = ServiceCollection::new();
        services.add_singleton_arc(Arc::clone(&shared));
        let resolved = services.build().resolve::<String>().unwrap();
        assert!(Arc::ptr_eq(&shared, &resolved));
    }

    #[test]
    fn failed_singleton_is_retried() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let mut services = ServiceCollection::new();
        services.add_singleton_factory(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(DiError::construction::<u8>("map not loaded"))
            } else {
                Ok(Arc::new(1_u8))
            }
        });
        let container = services.build();

        assert!(matches!(
            container.resolve::<u8>(),
            Err(DiError::Construction { .. })
        ));
        assert_eq!(*container.resolve::<u8>().unwrap(), 1);
    }

    struct Left(#[allow(dead_code)] Arc<Right>);
    struct Right(#[allow(dead_code)] Arc<Left>);

    impl Injectable for Left {
        fn construct(c: &Container) -> Result<Self, DiError> {
            Ok(Left(c.resolve()?))
        }
    }

    impl Injectable for Right {
        fn construct(c: &Container) -> Result<Self, DiError> {
            Ok(Right(c.resolve()?))
        }
    }

    #[test]
    fn cycles_are_detected() {
        let mut services = ServiceCollection::new();
        services.add_singleton::<Left>().add_transient::<Right>();
        let container = services.build();

        match container.resolve::<Left>() {
            Err(DiError::CircularDependency { chain }) => {
                assert!(chain.contains("Left"));
                assert!(chain.contains("Right"));
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("cycle resolved"),
        }

        // The resolution stack unwound; unrelated resolutions still work.
        assert!(matches!(
            container.resolve::<String>(),
            Err(DiError::ServiceNotRegistered { .. })
        ));
    }

    #[test]
    fn concurrent_first_resolution_constructs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut services = ServiceCollection::new();
        services.add_singleton_factory(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(10));
            Ok(Arc::new(String::from("once")))
        });
        let container = services.build();

        let resolved: Vec<Arc<String>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| container.resolve::<String>().unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(resolved.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }
}
