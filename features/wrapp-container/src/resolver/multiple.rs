use std::{fmt::Debug, ops::Deref, sync::Arc};

use crate::{
    errors::Error,
    resolver::{downcast, Inject, Scope},
    types::Dependency,
};

/// Every produced `T`, in factory declaration order and then output order.
///
/// Mostly used with `T = dyn Trait` to collect all implementations declared with
/// [`crate::Factory::implements`]. No producer results in an empty list.
pub struct Multiple<T: ?Sized>(Vec<Arc<T>>);

impl<T: ?Sized> Multiple<T> {
    pub fn new(values: Vec<Arc<T>>) -> Self {
        Multiple(values)
    }

    pub fn into_inner(self) -> Vec<Arc<T>> {
        self.0
    }
}
impl<T: ?Sized> Deref for Multiple<T> {
    type Target = [Arc<T>];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
impl<T: ?Sized> IntoIterator for Multiple<T> {
    type Item = Arc<T>;
    type IntoIter = std::vec::IntoIter<Arc<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
impl<'a, T: ?Sized> IntoIterator for &'a Multiple<T> {
    type Item = &'a Arc<T>;
    type IntoIter = std::slice::Iter<'a, Arc<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
impl<T: ?Sized> Clone for Multiple<T> {
    fn clone(&self) -> Self {
        Multiple(self.0.clone())
    }
}
impl<T: ?Sized> Default for Multiple<T> {
    fn default() -> Self {
        Multiple(Vec::new())
    }
}
impl<T: ?Sized + Debug> Debug for Multiple<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.0.iter()).finish()
    }
}

impl<T: ?Sized + Send + Sync + 'static> Inject for Multiple<T> {
    fn dependency() -> Dependency {
        Dependency::multiple::<T>()
    }

    fn inject(scope: &Scope<'_>) -> Result<Self, Error> {
        let values = scope
            .resolve_dependency(&Self::dependency())?
            .into_multiple()?
            .iter()
            .map(downcast::<T>)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Multiple(values))
    }
}
