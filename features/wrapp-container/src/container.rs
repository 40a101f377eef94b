use std::{
    backtrace::Backtrace,
    fmt::Debug,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Mutex, OnceLock, Weak},
};

use crate::{
    builder::ContainerBuilder,
    errors::{panic_message, Error, Errors},
    events::{
        Event, Events, CONTAINER_CLOSED, CONTAINER_CLOSING, CONTAINER_STARTED,
        CONTAINER_STARTING, UNHANDLED_PANIC,
    },
    factories::Factory,
    invoker::{Invocable, InvokeResult, Invoker},
    lifetime::Lifetime,
    registry::Registry,
    resolver::{Inject, Resolver},
    types::{lock, Instance},
};

/// Container holding all factories and the services they produced
///
/// Cloning is cheap, every clone refers to the same container.
#[derive(Clone)]
pub struct Container(pub(crate) Arc<ContainerInner>);
pub(crate) struct ContainerInner {
    registry: Arc<Registry>,
    events: Events,
    resolver: Resolver,
    invoker: Invoker,
    validate_on_start: bool,
    /// Serializes start and close
    lifecycle: Mutex<()>,
    closed: OnceLock<Result<(), Error>>,
}
impl Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_struct("Container");
        for (index, factory) in self.0.registry.factories().iter().enumerate() {
            let val = if self.0.registry.is_spawned(index) {
                "spawned"
            } else {
                "idle"
            };
            map.field(factory.name(), &val);
        }
        map.finish()
    }
}

impl Container {
    /// Registers the factories with default options
    pub fn new(factories: impl IntoIterator<Item = Factory>) -> Result<Self, Error> {
        ContainerBuilder::new().add_factories(factories).build()
    }

    pub fn builder() -> ContainerBuilder {
        ContainerBuilder::new()
    }

    pub(crate) fn build(
        factories: Vec<Factory>,
        stack_limit: usize,
        validate_on_start: bool,
    ) -> Result<Self, Error> {
        let events = Events::new();
        guard_panics(&events, || {
            Self::try_build(events.clone(), factories, stack_limit, validate_on_start)
        })
    }

    fn try_build(
        events: Events,
        factories: Vec<Factory>,
        stack_limit: usize,
        validate_on_start: bool,
    ) -> Result<Self, Error> {
        let lifetime = Lifetime::new();
        let mut errors = Errors::default();

        // Internal services come first, so they are closed last
        let registry = Arc::new_cyclic(|weak: &Weak<Registry>| {
            let resolver = Resolver::new(weak.clone());
            let internal = [
                Factory::service(events.clone()),
                Factory::service(Invoker::new(resolver.clone())),
                Factory::service(resolver),
            ];

            let mut registry = Registry::new(lifetime, stack_limit);
            for factory in internal.into_iter().chain(factories) {
                if let Err(error) = registry.register_factory(factory) {
                    errors.push(error);
                }
            }
            registry
        });
        errors.into_result()?;

        let resolver = Resolver::new(Arc::downgrade(&registry));
        tracing::debug!("Built container with {} factories", registry.factories().len());

        Ok(Container(Arc::new(ContainerInner {
            invoker: Invoker::new(resolver.clone()),
            resolver,
            registry,
            events,
            validate_on_start,
            lifecycle: Mutex::new(()),
            closed: OnceLock::new(),
        })))
    }

    /// Spawns every factory.
    ///
    /// On failure everything spawned so far is closed again, and the container can not be used anymore.
    /// The same happens before a panicking factory unwinds out of this call.
    pub fn start(&self) -> Result<(), Error> {
        guard_panics(&self.0.events, || {
            let _lifecycle = lock(&self.0.lifecycle);
            if self.is_closed() {
                return Err(Error::ContainerClosed);
            }

            match panic::catch_unwind(AssertUnwindSafe(|| self.start_locked())) {
                Ok(result) => result,
                Err(payload) => {
                    if let Err(error) = self.close_locked() {
                        tracing::warn!("Failed to close container after panic: {}", error);
                    }
                    panic::resume_unwind(payload)
                }
            }
        })
    }

    fn start_locked(&self) -> Result<(), Error> {
        let mut errors = Errors::default();
        tracing::debug!("Starting container");
        if let Err(error) = self.0.events.trigger(&Event::new(CONTAINER_STARTING)) {
            errors.push(error);
        }

        let result = self.spawn();
        let started = Event::new(CONTAINER_STARTED).with_arg(result.clone().err());
        if let Err(error) = self.0.events.trigger(&started) {
            errors.push(error);
        }

        if let Err(error) = result {
            tracing::error!("Failed to start container: {}", error);
            errors.push(error.context("failed to start services in container"));
            if let Err(error) = self.close_locked() {
                errors.push(error);
            }
        }

        errors.into_result()
    }

    fn spawn(&self) -> Result<(), Error> {
        if self.0.validate_on_start {
            self.0.registry.validate_factories()?;
        }

        self.0.registry.spawn_factories()
    }

    /// Closes every spawned factory in reverse instantiation order.
    ///
    /// Only the first call does the work, later calls return the same result.
    pub fn close(&self) -> Result<(), Error> {
        guard_panics(&self.0.events, || {
            let _lifecycle = lock(&self.0.lifecycle);
            self.close_locked()
        })
    }

    fn close_locked(&self) -> Result<(), Error> {
        self.0
            .closed
            .get_or_init(|| {
                let mut errors = Errors::default();
                tracing::debug!("Closing container");
                if let Err(error) = self.0.events.trigger(&Event::new(CONTAINER_CLOSING)) {
                    errors.push(error);
                }

                let result = self.0.registry.close_factories();
                let closed = Event::new(CONTAINER_CLOSED).with_arg(result.clone().err());
                if let Err(error) = result {
                    errors.push(error.context("failed to close services in container"));
                }
                if let Err(error) = self.0.events.trigger(&closed) {
                    errors.push(error);
                }

                self.0.registry.lifetime().cancel();
                errors.into_result()
            })
            .clone()
    }

    pub fn is_closed(&self) -> bool {
        self.0.closed.get().is_some()
    }

    /// Lifetime of the container, cancelled once it is closed
    pub fn done(&self) -> Lifetime {
        self.0.registry.lifetime().clone()
    }

    /// Checks the factories for missing, duplicated and circular dependencies
    pub fn validate(&self) -> Result<(), Error> {
        self.0.registry.validate_factories()
    }

    /// All factories in declaration order, including the internal ones
    pub fn factories(&self) -> Vec<Factory> {
        self.0.registry.factories()
    }

    /// Spawned factories in instantiation order
    pub fn spawned_factories(&self) -> Vec<Factory> {
        self.0.registry.spawned_factories()
    }

    /// Produced services in instantiation order, empty once closed
    pub fn services(&self) -> Vec<Instance> {
        if self.is_closed() {
            return Vec::new();
        }
        self.0.registry.services()
    }

    pub fn events(&self) -> Option<Events> {
        (!self.is_closed()).then(|| self.0.events.clone())
    }

    pub fn resolver(&self) -> Option<Resolver> {
        (!self.is_closed()).then(|| self.0.resolver.clone())
    }

    pub fn invoker(&self) -> Option<Invoker> {
        (!self.is_closed()).then(|| self.0.invoker.clone())
    }

    /// Resolves a service, spawning its factory and dependencies if needed
    pub fn resolve<T: Inject>(&self) -> Result<T, Error> {
        self.0.resolver.resolve()
    }

    pub fn invoke<Args, F: Invocable<Args>>(&self, f: F) -> Result<InvokeResult<F::Output>, Error> {
        self.0.invoker.invoke(f)
    }
}

/// Publishes panics as [`UNHANDLED_PANIC`] before resuming them
fn guard_panics<R>(events: &Events, f: impl FnOnce() -> R) -> R {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            let backtrace = Backtrace::force_capture().to_string();
            tracing::error!("Unhandled panic in container: {}", message);

            let event = Event::new(UNHANDLED_PANIC)
                .with_arg(message)
                .with_arg(backtrace);
            if let Err(error) = events.trigger(&event) {
                tracing::warn!("Failed to publish panic: {}", error);
            }

            panic::resume_unwind(payload)
        }
    }
}
