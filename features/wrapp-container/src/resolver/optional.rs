use std::{fmt::Debug, sync::Arc};

use crate::{
    errors::Error,
    resolver::{downcast, Inject, Scope},
    types::Dependency,
};

/// Zero or one `T`, a missing producer is not an error.
///
/// When several factories produce `T`, the first one in declaration order is used.
pub struct Optional<T: ?Sized>(Option<Arc<T>>);

impl<T: ?Sized> Optional<T> {
    pub fn new(value: Option<Arc<T>>) -> Self {
        Optional(value)
    }

    pub fn get(&self) -> Option<&Arc<T>> {
        self.0.as_ref()
    }

    pub fn is_some(&self) -> bool {
        self.0.is_some()
    }

    pub fn is_none(&self) -> bool {
        self.0.is_none()
    }

    pub fn into_inner(self) -> Option<Arc<T>> {
        self.0
    }
}
impl<T: Default> Optional<T> {
    /// The resolved value, or the zero value of `T` when nothing produces it
    pub fn get_or_default(&self) -> Arc<T> {
        self.0.clone().unwrap_or_default()
    }
}
impl<T: ?Sized> Clone for Optional<T> {
    fn clone(&self) -> Self {
        Optional(self.0.clone())
    }
}
impl<T: ?Sized> Default for Optional<T> {
    fn default() -> Self {
        Optional(None)
    }
}
impl<T: ?Sized + Debug> Debug for Optional<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.0 {
            Some(value) => f.debug_tuple("Optional").field(value).finish(),
            None => f.debug_tuple("Optional").field(&"None").finish(),
        }
    }
}

impl<T: ?Sized + Send + Sync + 'static> Inject for Optional<T> {
    fn dependency() -> Dependency {
        Dependency::optional::<T>()
    }

    fn inject(scope: &Scope<'_>) -> Result<Self, Error> {
        let value = scope
            .resolve_dependency(&Self::dependency())?
            .into_optional()?
            .map(|instance| downcast::<T>(&instance))
            .transpose()?;

        Ok(Optional(value))
    }
}
