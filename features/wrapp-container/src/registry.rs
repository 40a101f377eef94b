use std::{
    cell::Cell,
    collections::HashMap,
    sync::{Arc, Condvar, Mutex, PoisonError},
    thread::{self, ThreadId},
};

use crate::{
    dependency_graph::DependencyGraph,
    errors::{Error, Errors},
    factories::Factory,
    lifetime::Lifetime,
    resolver::Scope,
    service_fn::{ServiceFn, ServiceHandle},
    types::{lock, Dependency, DependencyKind, Instance, OutputKind, TypeInfo},
};

/// Default maximum depth of nested factory spawns
pub const DEFAULT_STACK_LIMIT: usize = 100;

thread_local! {
    /// Depth of the factory currently running on this thread
    static AMBIENT_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Depth to start from when resolving outside of a [`Scope`]
pub(crate) fn ambient_depth() -> usize {
    AMBIENT_DEPTH.with(Cell::get)
}

struct AmbientDepth {
    previous: usize,
}
impl AmbientDepth {
    fn enter(depth: usize) -> Self {
        AmbientDepth {
            previous: AMBIENT_DEPTH.with(|ambient| ambient.replace(depth)),
        }
    }
}
impl Drop for AmbientDepth {
    fn drop(&mut self) {
        AMBIENT_DEPTH.with(|ambient| ambient.set(self.previous));
    }
}

/// Result of [`Scope::resolve_dependency`]
#[derive(Debug, Clone)]
pub enum Resolved {
    Single(Instance),
    Optional(Option<Instance>),
    Multiple(Vec<Instance>),
    Lifetime(Lifetime),
}
impl Resolved {
    fn variant(&self) -> &'static str {
        match self {
            Resolved::Single(_) => "Resolved::Single",
            Resolved::Optional(_) => "Resolved::Optional",
            Resolved::Multiple(_) => "Resolved::Multiple",
            Resolved::Lifetime(_) => "Resolved::Lifetime",
        }
    }

    fn mismatch(self, required: &'static str) -> Error {
        Error::DowncastFailed {
            required,
            actual: self.variant(),
        }
    }

    pub fn into_single(self) -> Result<Instance, Error> {
        match self {
            Resolved::Single(instance) => Ok(instance),
            other => Err(other.mismatch("Resolved::Single")),
        }
    }

    pub fn into_optional(self) -> Result<Option<Instance>, Error> {
        match self {
            Resolved::Optional(instance) => Ok(instance),
            other => Err(other.mismatch("Resolved::Optional")),
        }
    }

    pub fn into_multiple(self) -> Result<Vec<Instance>, Error> {
        match self {
            Resolved::Multiple(instances) => Ok(instances),
            other => Err(other.mismatch("Resolved::Multiple")),
        }
    }

    pub fn into_lifetime(self) -> Result<Lifetime, Error> {
        match self {
            Resolved::Lifetime(lifetime) => Ok(lifetime),
            other => Err(other.mismatch("Resolved::Lifetime")),
        }
    }
}

/// A produced value and the interfaces it was declared to implement
#[derive(Debug, Clone)]
pub(crate) struct Output {
    pub(crate) value: Instance,
    views: Vec<Instance>,
}
impl Output {
    fn matching(&self, type_info: &TypeInfo) -> Option<Instance> {
        if self.value.info == *type_info {
            return Some(self.value.clone());
        }

        self.views
            .iter()
            .find(|view| view.info == *type_info)
            .cloned()
    }
}

enum SpawnState {
    Idle,
    Spawning(ThreadId),
    Spawned(Arc<[Output]>),
}

struct FactoryEntry {
    factory: Factory,
    lifetime: Lifetime,
    state: Mutex<SpawnState>,
    ready: Condvar,
}
impl FactoryEntry {
    fn state(&self) -> std::sync::MutexGuard<'_, SpawnState> {
        lock(&self.state)
    }

    fn outputs(&self) -> Option<Arc<[Output]>> {
        match &*self.state() {
            SpawnState::Spawned(outputs) => Some(outputs.clone()),
            _ => None,
        }
    }
}

/// Which thread spawns which factory, and which factory each blocked thread waits for.
///
/// Always locked after a factory state, never before one.
#[derive(Default)]
struct WaitGraph {
    owners: HashMap<usize, ThreadId>,
    waiting: HashMap<ThreadId, usize>,
}
impl WaitGraph {
    /// Registers `thread` as waiting for `index`, unless the owner of `index`
    /// is already waiting, directly or through other threads, for `thread`.
    fn wait_for(&mut self, thread: ThreadId, index: usize) -> Result<(), ()> {
        let mut owner = self.owners.get(&index).copied();
        for _ in 0..=self.waiting.len() {
            let Some(current) = owner else {
                break;
            };
            if current == thread {
                return Err(());
            }
            owner = self
                .waiting
                .get(&current)
                .and_then(|blocked_on| self.owners.get(blocked_on))
                .copied();
        }

        self.waiting.insert(thread, index);
        Ok(())
    }
}

/// Resets a claimed factory to idle unless the spawn completed, also when unwinding
struct Claim<'a> {
    entry: &'a FactoryEntry,
    index: usize,
    waits: &'a Mutex<WaitGraph>,
    done: bool,
}
impl Claim<'_> {
    fn complete(mut self, outputs: Arc<[Output]>) {
        let mut state = self.entry.state();
        *state = SpawnState::Spawned(outputs);
        lock(self.waits).owners.remove(&self.index);
        drop(state);
        self.entry.ready.notify_all();
        self.done = true;
    }
}
impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if !self.done {
            let mut state = self.entry.state();
            *state = SpawnState::Idle;
            lock(self.waits).owners.remove(&self.index);
            drop(state);
            self.entry.ready.notify_all();
        }
    }
}

/// All factories of a container and the services they produced
pub(crate) struct Registry {
    factories: Vec<FactoryEntry>,
    /// Indices of spawned factories, in instantiation order
    sequence: Mutex<Vec<usize>>,
    waits: Mutex<WaitGraph>,
    lifetime: Lifetime,
    stack_limit: usize,
}

impl Registry {
    pub(crate) fn new(lifetime: Lifetime, stack_limit: usize) -> Self {
        Registry {
            factories: Vec::new(),
            sequence: Mutex::new(Vec::new()),
            waits: Mutex::new(WaitGraph::default()),
            lifetime,
            stack_limit,
        }
    }

    pub(crate) fn register_factory(&mut self, factory: Factory) -> Result<(), Error> {
        let lifetime = factory.load(&self.lifetime)?;
        tracing::debug!(
            "Registered {} from {} with {} dependencies",
            factory.name(),
            factory.source(),
            factory.dependencies().len()
        );

        self.factories.push(FactoryEntry {
            factory,
            lifetime,
            state: Mutex::new(SpawnState::Idle),
            ready: Condvar::new(),
        });
        Ok(())
    }

    pub(crate) fn lifetime(&self) -> &Lifetime {
        &self.lifetime
    }

    /// All factories in declaration order
    pub(crate) fn factories(&self) -> Vec<Factory> {
        self.factories
            .iter()
            .map(|entry| entry.factory.clone())
            .collect()
    }

    /// Spawned factories in instantiation order
    pub(crate) fn spawned_factories(&self) -> Vec<Factory> {
        let sequence = lock(&self.sequence).clone();
        sequence
            .into_iter()
            .map(|index| self.factories[index].factory.clone())
            .collect()
    }

    pub(crate) fn is_spawned(&self, index: usize) -> bool {
        self.factories
            .get(index)
            .is_some_and(|entry| entry.outputs().is_some())
    }

    /// Produced services in instantiation order
    pub(crate) fn services(&self) -> Vec<Instance> {
        let sequence = lock(&self.sequence).clone();
        sequence
            .into_iter()
            .filter_map(|index| self.factories[index].outputs())
            .flat_map(|outputs| outputs.iter().map(|output| output.value.clone()).collect::<Vec<_>>())
            .collect()
    }

    pub(crate) fn validate_factories(&self) -> Result<(), Error> {
        tracing::debug!("Validating {} factories", self.factories.len());
        DependencyGraph::from_factories(self.factories.iter().map(|entry| &entry.factory))
            .check()
            .map_err(Error::Joined)
    }

    /// Resolves a dependency according to its kind, lifetimes are those of the resolving scope
    pub(crate) fn resolve_service(
        &self,
        dependency: &Dependency,
        lifetime: &Lifetime,
        depth: usize,
    ) -> Result<Resolved, Error> {
        let type_info = dependency.type_info;
        let resolved = match dependency.kind {
            DependencyKind::Required => Resolved::Single(self.resolve_regular(type_info, depth)?),
            DependencyKind::Optional => {
                Resolved::Optional(self.resolve_optional(type_info, depth)?)
            }
            DependencyKind::Multiple => {
                Resolved::Multiple(self.resolve_multiple(type_info, depth)?)
            }
            DependencyKind::Lifetime => Resolved::Lifetime(lifetime.clone()),
        };
        Ok(resolved)
    }

    /// First match wins, even for interfaces with several implementations
    pub(crate) fn resolve_regular(&self, type_info: TypeInfo, depth: usize) -> Result<Instance, Error> {
        self.resolve_by_type(type_info, depth)?
            .into_iter()
            .next()
            .ok_or(Error::ServiceNotResolved(type_info))
    }

    pub(crate) fn resolve_optional(
        &self,
        type_info: TypeInfo,
        depth: usize,
    ) -> Result<Option<Instance>, Error> {
        Ok(self.resolve_by_type(type_info, depth)?.into_iter().next())
    }

    pub(crate) fn resolve_multiple(
        &self,
        type_info: TypeInfo,
        depth: usize,
    ) -> Result<Vec<Instance>, Error> {
        self.resolve_by_type(type_info, depth)
    }

    /// Spawns every factory producing the type and collects the matching outputs
    fn resolve_by_type(&self, type_info: TypeInfo, depth: usize) -> Result<Vec<Instance>, Error> {
        let mut matches = Vec::new();
        for (index, entry) in self.factories.iter().enumerate() {
            let produces = entry
                .factory
                .outputs()
                .iter()
                .any(|output| output.provides(&type_info));
            if !produces {
                continue;
            }

            let outputs = self.spawn_factory(index, depth)?;
            matches.extend(outputs.iter().filter_map(|output| output.matching(&type_info)));
        }

        Ok(matches)
    }

    /// Spawns every factory in declaration order, dependencies are spawned on demand
    pub(crate) fn spawn_factories(&self) -> Result<(), Error> {
        let depth = ambient_depth();
        let mut errors = Errors::default();
        for index in 0..self.factories.len() {
            if let Err(error) = self.spawn_factory(index, depth) {
                errors.push(error);
            }
        }

        errors.into_result()
    }

    /// Invokes the factory at most once and returns its outputs
    pub(crate) fn spawn_factory(&self, index: usize, depth: usize) -> Result<Arc<[Output]>, Error> {
        let entry = &self.factories[index];
        self.try_spawn(entry, index, depth).map_err(|error| {
            tracing::debug!("Failed to spawn {}: {}", entry.factory.name(), error);
            Error::Spawn {
                factory: entry.factory.name().to_string(),
                origin: entry.factory.source().to_string(),
                error: Box::new(error),
            }
        })
    }

    fn try_spawn(
        &self,
        entry: &FactoryEntry,
        index: usize,
        depth: usize,
    ) -> Result<Arc<[Output]>, Error> {
        if depth > self.stack_limit {
            return Err(Error::StackLimitReached(self.stack_limit));
        }

        let current = thread::current().id();
        let mut state = entry.state();
        let reentrant = loop {
            match &*state {
                SpawnState::Spawned(outputs) => return Ok(outputs.clone()),
                // The factory needs itself, keep going until the stack limit trips
                SpawnState::Spawning(owner) if *owner == current => break true,
                SpawnState::Spawning(_) => {}
                SpawnState::Idle => break false,
            }

            // Threads spawning each other's dependencies would wait forever
            if lock(&self.waits).wait_for(current, index).is_err() {
                tracing::warn!("Circular wait on {} between threads", entry.factory.name());
                return Err(Error::CircularDependency {
                    factory: entry.factory.name().to_string(),
                    origin: entry.factory.source().to_string(),
                });
            }

            tracing::trace!("Waiting for {} to be spawned", entry.factory.name());
            state = entry.ready.wait(state).unwrap_or_else(PoisonError::into_inner);
            lock(&self.waits).waiting.remove(&current);
        };

        let claim = if reentrant {
            None
        } else {
            *state = SpawnState::Spawning(current);
            lock(&self.waits).owners.insert(index, current);
            Some(Claim {
                entry,
                index,
                waits: &self.waits,
                done: false,
            })
        };
        drop(state);

        let outputs = self.invoke(entry, depth)?;

        if let Some(claim) = claim {
            lock(&self.sequence).push(index);
            claim.complete(outputs.clone());
            tracing::debug!("Spawned {}", entry.factory.name());
        }

        Ok(outputs)
    }

    fn invoke(&self, entry: &FactoryEntry, depth: usize) -> Result<Arc<[Output]>, Error> {
        let factory = &entry.factory;
        let scope = Scope::new(self, &entry.lifetime, depth + 1);
        let instances = {
            let _ambient = AmbientDepth::enter(depth + 1);
            factory.construct(&scope)?
        };

        let mut outputs = Vec::with_capacity(instances.len());
        for (info, instance) in factory.outputs().iter().zip(instances) {
            let value = match info.kind {
                OutputKind::Value => instance,
                OutputKind::BackgroundTask => start_service_fn(factory, &instance)?,
            };
            outputs.push(Output {
                value,
                views: Vec::new(),
            });
        }

        for view in factory.views() {
            let Some(output) = outputs.get(view.output) else {
                continue;
            };
            if let Some(instance) = (view.cast)(&output.value) {
                outputs[view.output].views.push(instance);
            }
        }

        Ok(outputs.into())
    }

    /// Cancels and closes every spawned factory, in reverse instantiation order
    pub(crate) fn close_factories(&self) -> Result<(), Error> {
        let sequence = lock(&self.sequence).clone();
        tracing::debug!("Closing {} factories", sequence.len());

        let mut errors = Errors::default();
        for &index in sequence.iter().rev() {
            let entry = &self.factories[index];
            entry.lifetime.cancel();

            let Some(outputs) = entry.outputs() else {
                continue;
            };

            for (position, output) in outputs.iter().enumerate() {
                let service = output.value.service();
                if let Err(error) = service.try_close() {
                    tracing::warn!(
                        "Failed to close {} of {}: {}",
                        output.value.info,
                        entry.factory.name(),
                        error
                    );
                    errors.push(Error::Close {
                        output: output.value.info,
                        index: position,
                        factory: entry.factory.name().to_string(),
                        origin: entry.factory.source().to_string(),
                        error: Arc::from(error),
                    });
                }
                service.close();
            }
        }

        errors.into_result()
    }
}

/// Starts a declared service function and returns the handle stored in its place
fn start_service_fn(factory: &Factory, instance: &Instance) -> Result<Instance, Error> {
    let service_fn = instance
        .downcast::<ServiceFn>()
        .map_err(|actual| Error::DowncastFailed {
            required: std::any::type_name::<ServiceFn>(),
            actual,
        })?;

    let body = service_fn.take().ok_or_else(|| Error::InvalidFactory {
        factory: factory.name().to_string(),
        reason: "service function was already started".to_string(),
    })?;

    tracing::debug!("Starting service function of {}", factory.name());
    Ok(Instance::new(ServiceHandle::spawn(factory.name(), body)?))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::{errors::ErrorKind, resolver::Multiple, types::Service};

    trait Plugin: Send + Sync {
        fn id(&self) -> u8;
    }
    struct First;
    struct Second;
    impl Service for First {}
    impl Service for Second {}
    impl Plugin for First {
        fn id(&self) -> u8 {
            1
        }
    }
    impl Plugin for Second {
        fn id(&self) -> u8 {
            2
        }
    }

    fn registry(factories: Vec<Factory>) -> Registry {
        let mut registry = Registry::new(Lifetime::new(), DEFAULT_STACK_LIMIT);
        for factory in factories {
            registry.register_factory(factory).unwrap();
        }
        registry
    }

    #[test]
    fn spawns_dependencies_first() {
        let registry = registry(vec![
            Factory::new(|number: Arc<i32>| number.to_string()),
            Factory::new(|| 7_i32),
        ]);

        registry.spawn_factories().unwrap();

        let names: Vec<String> = registry
            .spawned_factories()
            .iter()
            .map(|factory| factory.name().to_string())
            .collect();
        assert_eq!(names, vec!["Factory[fn() -> i32]", "Factory[fn(Arc<i32>) -> String]"]);
    }

    #[test]
    fn spawns_each_factory_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let registry = registry(vec![Factory::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            5_u8
        })]);

        for _ in 0..3 {
            registry.resolve_regular(TypeInfo::of::<u8>(), 0).unwrap();
        }
        registry.spawn_factories().unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn resolves_by_kind() {
        let registry = registry(vec![
            Factory::new(|| First).implements::<First, dyn Plugin>(|p| p as Arc<dyn Plugin>),
            Factory::new(|| Second).implements::<Second, dyn Plugin>(|p| p as Arc<dyn Plugin>),
        ]);

        let scope = Lifetime::new();
        let resolve = |dependency: Dependency| registry.resolve_service(&dependency, &scope, 0);

        let missing = resolve(Dependency::optional::<String>()).unwrap();
        assert!(matches!(missing, Resolved::Optional(None)));

        let error = resolve(Dependency::required::<String>()).unwrap_err();
        assert!(error.is(ErrorKind::ServiceNotResolved));

        let first = resolve(Dependency::required::<dyn Plugin>())
            .unwrap()
            .into_single()
            .unwrap();
        assert_eq!(first.downcast::<dyn Plugin>().unwrap().id(), 1);

        let lifetime = resolve(Dependency::lifetime()).unwrap().into_lifetime().unwrap();
        scope.cancel();
        assert!(lifetime.is_cancelled());
        assert!(!registry.lifetime().is_cancelled());

        let error = resolve(Dependency::lifetime()).unwrap().into_single().unwrap_err();
        assert!(error.is(ErrorKind::DowncastFailed));

        let all = resolve(Dependency::multiple::<dyn Plugin>())
            .unwrap()
            .into_multiple()
            .unwrap();
        let ids: Vec<u8> = all
            .iter()
            .map(|instance| instance.downcast::<dyn Plugin>().unwrap().id())
            .collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn empty_multiple_is_not_an_error() {
        let registry = registry(vec![Factory::new(|plugins: Multiple<dyn Plugin>| plugins.len())]);
        let count = registry.resolve_regular(TypeInfo::of::<usize>(), 0).unwrap();
        assert_eq!(*count.downcast::<usize>().unwrap(), 0);
    }

    #[test]
    fn stack_limit_stops_cycles() {
        let mut registry = Registry::new(Lifetime::new(), 10);
        registry
            .register_factory(Factory::new(|_: Arc<u16>| 1_u8))
            .unwrap();
        registry
            .register_factory(Factory::new(|_: Arc<u8>| 1_u16))
            .unwrap();

        let error = registry.spawn_factories().unwrap_err();
        assert!(error.is(ErrorKind::StackLimitReached));
        assert!(registry.spawned_factories().is_empty());
    }

    #[test]
    fn close_cancels_every_factory_lifetime() {
        let registry = registry(vec![
            Factory::new(|lifetime: Lifetime| lifetime.is_cancelled()),
            Factory::new(|_: Arc<bool>, lifetime: Lifetime| lifetime.is_cancelled().to_string()),
        ]);
        registry.spawn_factories().unwrap();
        assert!(!registry.lifetime().is_cancelled());

        registry.close_factories().unwrap();

        assert!(registry
            .factories
            .iter()
            .all(|entry| entry.lifetime.is_cancelled()));
    }
}
