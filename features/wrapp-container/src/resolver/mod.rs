use std::{
    any::type_name,
    sync::{Arc, Weak},
};

use crate::{
    errors::Error,
    lifetime::Lifetime,
    registry::{ambient_depth, Registry, Resolved},
    types::{Dependency, Instance, Service},
};

pub mod arc;
pub mod multiple;
pub mod optional;

pub use multiple::Multiple;
pub use optional::Optional;

/// Allows a type to be used as a factory parameter.
///
/// Implemented for `Arc<T>`, `Option<Arc<T>>`, [`Optional`], [`Multiple`] and [`Lifetime`].
/// Custom implementations resolve what they need through the [`Scope`].
pub trait Inject: Sized + 'static {
    /// What the parameter needs from the registry, used for validation
    fn dependency() -> Dependency;

    fn inject(scope: &Scope<'_>) -> Result<Self, Error>;
}

/// Resolution context of a single factory call, or of a call through the [`Resolver`]
pub struct Scope<'a> {
    registry: &'a Registry,
    lifetime: &'a Lifetime,
    depth: usize,
}

impl<'a> Scope<'a> {
    pub(crate) fn new(registry: &'a Registry, lifetime: &'a Lifetime, depth: usize) -> Self {
        Scope {
            registry,
            lifetime,
            depth,
        }
    }

    pub fn resolve<T: Inject>(&self) -> Result<T, Error> {
        T::inject(self)
    }

    /// Lifetime of the factory being spawned, or of the container outside of factories
    pub fn lifetime(&self) -> &Lifetime {
        self.lifetime
    }

    /// Current resolution depth
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Resolves a dependency without knowing its type.
    ///
    /// Required and optional dependencies resolve to the first producer in declaration order,
    /// multiple ones to every producer. A lifetime dependency gets the lifetime of this scope.
    pub fn resolve_dependency(&self, dependency: &Dependency) -> Result<Resolved, Error> {
        self.registry
            .resolve_service(dependency, self.lifetime, self.depth)
    }

    /// Resolves a factory argument, wrapping the error with its position
    pub(crate) fn argument<T: Inject>(&self, index: usize) -> Result<T, Error> {
        T::inject(self).map_err(|error| Error::Dependency {
            index,
            dependency: T::dependency(),
            error: Box::new(error),
        })
    }
}

pub(crate) fn downcast<T: ?Sized + 'static>(instance: &Instance) -> Result<Arc<T>, Error> {
    instance
        .downcast::<T>()
        .map_err(|actual| Error::DowncastFailed {
            required: type_name::<T>(),
            actual,
        })
}

/// Resolves services from outside of factories, or lazily from inside of them.
///
/// The resolver is registered in its own container, so factories can depend on `Arc<Resolver>`.
/// It does not keep the container alive, and fails with [`Error::ContainerClosed`]
/// once the container is closed or dropped.
#[derive(Clone)]
pub struct Resolver {
    registry: Weak<Registry>,
}
impl Service for Resolver {}
impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("open", &(self.registry.strong_count() > 0))
            .finish()
    }
}

impl Resolver {
    pub(crate) fn new(registry: Weak<Registry>) -> Self {
        Resolver { registry }
    }

    pub fn resolve<T: Inject>(&self) -> Result<T, Error> {
        self.with_scope(|scope| scope.resolve::<T>())
    }

    /// Resolves into an existing value, which is left untouched on failure
    pub fn resolve_into<T: Inject>(&self, target: &mut T) -> Result<(), Error> {
        *target = self.resolve()?;
        Ok(())
    }

    /// Runs `f` with a scope on the container lifetime
    pub fn with_scope<R>(
        &self,
        f: impl FnOnce(&Scope<'_>) -> Result<R, Error>,
    ) -> Result<R, Error> {
        let registry = self.registry.upgrade().ok_or(Error::ContainerClosed)?;
        if registry.lifetime().is_cancelled() {
            return Err(Error::ContainerClosed);
        }

        let scope = Scope::new(&registry, registry.lifetime(), ambient_depth());
        f(&scope)
    }
}
