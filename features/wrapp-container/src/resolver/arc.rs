use std::sync::Arc;

use crate::{
    errors::Error,
    lifetime::Lifetime,
    resolver::{downcast, Inject, Scope},
    types::Dependency,
};

impl<T: ?Sized + Send + Sync + 'static> Inject for Arc<T> {
    fn dependency() -> Dependency {
        Dependency::required::<T>()
    }

    fn inject(scope: &Scope<'_>) -> Result<Self, Error> {
        let instance = scope.resolve_dependency(&Self::dependency())?.into_single()?;
        downcast::<T>(&instance)
    }
}

/// Same as [`crate::Optional`]
impl<T: ?Sized + Send + Sync + 'static> Inject for Option<Arc<T>> {
    fn dependency() -> Dependency {
        Dependency::optional::<T>()
    }

    fn inject(scope: &Scope<'_>) -> Result<Self, Error> {
        scope
            .resolve_dependency(&Self::dependency())?
            .into_optional()?
            .map(|instance| downcast::<T>(&instance))
            .transpose()
    }
}

impl Inject for Lifetime {
    fn dependency() -> Dependency {
        Dependency::lifetime()
    }

    fn inject(scope: &Scope<'_>) -> Result<Self, Error> {
        scope.resolve_dependency(&Self::dependency())?.into_lifetime()
    }
}
