use std::{
    any::{Any, TypeId},
    collections::{BTreeMap, HashMap},
    path::PathBuf,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use crate::{lifetime::Lifetime, service_fn::{ServiceFn, ServiceHandle}};

/// Boxed error returned by user code
pub type DynError = Box<dyn std::error::Error + Send + Sync>;

/// All errors must be clone, so foreign errors are shared
pub type SharedError = Arc<dyn std::error::Error + Send + Sync>;

/// Anything produced by a factory.
///
/// We assume services are shared between threads, so they need to be Send + Sync + 'static.
/// Both hooks are called on close, in reverse instantiation order:
/// first [`Service::try_close`], whose error is collected, then [`Service::close`].
pub trait Service: Send + Sync + 'static {
    /// Shutdown hook which can fail
    fn try_close(&self) -> Result<(), DynError> {
        Ok(())
    }

    /// Shutdown hook without a result
    fn close(&self) {}
}

macro_rules! impl_plain_service {
    ($($ty:ty),* $(,)?) => {
        $(impl Service for $ty {})*
    };
}
impl_plain_service!(
    bool, char, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64,
    String, &'static str, Duration, PathBuf,
);
impl<T: Send + Sync + 'static> Service for Vec<T> {}
impl<K: Send + Sync + 'static, V: Send + Sync + 'static> Service for HashMap<K, V> {}
impl<K: Send + Sync + 'static, V: Send + Sync + 'static> Service for BTreeMap<K, V> {}

/// Instance of a produced service
///
/// The value is stored as an `Arc<T>` inside the `Any`, so interface views
/// like `Arc<dyn Trait>` can be stored next to concrete values.
#[derive(Clone)]
pub struct Instance {
    pub info: TypeInfo,
    value: Arc<dyn Any + Send + Sync>,
    service: Arc<dyn Service>,
}
impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Instance").field(&self.info.type_name).finish()
    }
}

impl Instance {
    pub(crate) fn new<T: Service>(value: T) -> Self {
        Self::from_arc(Arc::new(value))
    }

    pub(crate) fn from_arc<T: Service>(value: Arc<T>) -> Self {
        Instance {
            info: TypeInfo::of::<T>(),
            value: Arc::new(value.clone()),
            service: value,
        }
    }

    /// The same service seen through another type, sharing the close hooks
    pub(crate) fn view<I: ?Sized + Send + Sync + 'static>(&self, value: Arc<I>) -> Instance {
        Instance {
            info: TypeInfo::of::<I>(),
            value: Arc::new(value),
            service: self.service.clone(),
        }
    }

    pub fn downcast<T: ?Sized + 'static>(&self) -> Result<Arc<T>, &'static str> {
        self.value
            .downcast_ref::<Arc<T>>()
            .cloned()
            .ok_or(self.info.type_name)
    }

    pub(crate) fn service(&self) -> &dyn Service {
        self.service.as_ref()
    }
}

/// How a factory parameter is resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DependencyKind {
    /// Exactly one producer must exist, the first one wins
    Required,
    /// Zero or one producer, absence is not an error
    Optional,
    /// Every producer, in declaration order
    Multiple,
    /// The factory's own lifetime, never looked up in the registry
    Lifetime,
}

/// Information about a Factory dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dependency {
    /// The required Type, unwrapped from `Optional` / `Multiple`
    pub type_info: TypeInfo,
    pub kind: DependencyKind,
}
impl Dependency {
    pub fn new(type_info: TypeInfo, kind: DependencyKind) -> Self {
        Dependency { type_info, kind }
    }

    pub fn required<T: ?Sized + 'static>() -> Self {
        Self::new(TypeInfo::of::<T>(), DependencyKind::Required)
    }

    pub fn optional<T: ?Sized + 'static>() -> Self {
        Self::new(TypeInfo::of::<T>(), DependencyKind::Optional)
    }

    pub fn multiple<T: ?Sized + 'static>() -> Self {
        Self::new(TypeInfo::of::<T>(), DependencyKind::Multiple)
    }

    pub fn lifetime() -> Self {
        Self::new(TypeInfo::of::<Lifetime>(), DependencyKind::Lifetime)
    }

    pub fn is_lifetime(&self) -> bool {
        self.kind == DependencyKind::Lifetime
    }

    pub fn is_required(&self) -> bool {
        self.kind == DependencyKind::Required
    }

    /// Inner type if this is an optional dependency
    pub fn optional_of(&self) -> Option<TypeInfo> {
        (self.kind == DependencyKind::Optional).then_some(self.type_info)
    }

    /// Element type if this is a multiple dependency
    pub fn multiple_of(&self) -> Option<TypeInfo> {
        (self.kind == DependencyKind::Multiple).then_some(self.type_info)
    }

    /// The type looked up in the registry, `None` for the lifetime
    pub fn inner(&self) -> Option<TypeInfo> {
        (!self.is_lifetime()).then_some(self.type_info)
    }
}
impl std::fmt::Display for Dependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            DependencyKind::Required | DependencyKind::Lifetime => write!(f, "{}", self.type_info),
            DependencyKind::Optional => write!(f, "Optional<{}>", self.type_info),
            DependencyKind::Multiple => write!(f, "Multiple<{}>", self.type_info),
        }
    }
}

/// What a factory output does once produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputKind {
    /// Stored as a service
    Value,
    /// A [`ServiceFn`], started in the background and stored as a [`ServiceHandle`]
    BackgroundTask,
}

/// Information about a Factory output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputInfo {
    pub type_info: TypeInfo,
    pub kind: OutputKind,
    /// Interfaces this output is also visible as
    pub interfaces: Vec<TypeInfo>,
}
impl OutputInfo {
    pub fn new(type_info: TypeInfo, kind: OutputKind) -> Self {
        OutputInfo {
            type_info,
            kind,
            interfaces: Vec::new(),
        }
    }

    pub fn of<T: Service>() -> Self {
        if TypeId::of::<T>() == TypeId::of::<ServiceFn>() {
            Self::new(TypeInfo::of::<ServiceHandle>(), OutputKind::BackgroundTask)
        } else {
            Self::new(TypeInfo::of::<T>(), OutputKind::Value)
        }
    }

    /// True if a request for `type_info` is satisfied by this output
    pub fn provides(&self, type_info: &TypeInfo) -> bool {
        self.type_info == *type_info || self.interfaces.contains(type_info)
    }

    /// Background handles all share one type, they are never duplicates
    pub fn is_duplicate_exempt(&self) -> bool {
        self.kind == OutputKind::BackgroundTask
    }
}

/// Return type of closures which may fail
pub trait Fallible {
    fn into_result(self) -> Result<(), DynError>;
}
impl Fallible for () {
    fn into_result(self) -> Result<(), DynError> {
        Ok(())
    }
}
impl<E: Into<DynError>> Fallible for Result<(), E> {
    fn into_result(self) -> Result<(), DynError> {
        self.map_err(Into::into)
    }
}

/// Type Name and Type Id
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct TypeInfo {
    pub type_name: &'static str,
    pub type_id: TypeId,
}
impl std::fmt::Display for TypeInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.type_name)
    }
}
impl TypeInfo {
    pub fn of<T: 'static + ?Sized>() -> TypeInfo {
        TypeInfo {
            type_name: std::any::type_name::<T>(),
            type_id: TypeId::of::<T>(),
        }
    }
}

/// Locks a mutex, ignoring poisoning caused by a panicking factory
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Greeter: Send + Sync {
        fn greet(&self) -> String;
    }
    struct English;
    impl Service for English {}
    impl Greeter for English {
        fn greet(&self) -> String {
            "hello".to_string()
        }
    }

    #[test]
    fn instance_downcasts_to_its_own_type() {
        let instance = Instance::new(42_i32);
        assert_eq!(*instance.downcast::<i32>().unwrap(), 42);
        assert_eq!(instance.downcast::<u8>().unwrap_err(), "i32");
    }

    #[test]
    fn view_downcasts_to_interface() {
        let instance = Instance::new(English);
        let concrete = instance.downcast::<English>().unwrap();
        let view = instance.view::<dyn Greeter>(concrete);

        assert_eq!(view.info, TypeInfo::of::<dyn Greeter>());
        assert_eq!(view.downcast::<dyn Greeter>().unwrap().greet(), "hello");
    }

    #[test]
    fn dependency_classification() {
        assert!(Dependency::lifetime().is_lifetime());
        assert_eq!(Dependency::lifetime().inner(), None);
        assert_eq!(
            Dependency::optional::<i32>().optional_of(),
            Some(TypeInfo::of::<i32>())
        );
        assert_eq!(Dependency::optional::<i32>().multiple_of(), None);
        assert_eq!(
            Dependency::multiple::<dyn Greeter>().multiple_of(),
            Some(TypeInfo::of::<dyn Greeter>())
        );
        assert_eq!(Dependency::optional::<u8>().to_string(), "Optional<u8>");
    }

    #[test]
    fn service_fn_output_is_background_task() {
        let output = OutputInfo::of::<ServiceFn>();
        assert_eq!(output.kind, OutputKind::BackgroundTask);
        assert_eq!(output.type_info, TypeInfo::of::<ServiceHandle>());
        assert!(output.is_duplicate_exempt());
        assert!(!OutputInfo::of::<String>().is_duplicate_exempt());
    }
}
