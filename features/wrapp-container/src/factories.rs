use std::{
    any::{type_name, Any},
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use crate::{
    errors::Error,
    lifetime::Lifetime,
    resolver::{Inject, Scope},
    types::{Dependency, DynError, Instance, OutputInfo, Service, TypeInfo},
};

type Constructor = dyn Fn(&Scope<'_>) -> Result<Vec<Instance>, Error> + Send + Sync;
type ViewCast = dyn Fn(&Instance) -> Option<Instance> + Send + Sync;

/// A registered function producing services.
///
/// The parameters of the function are its dependencies, resolved through [`Inject`],
/// and its return value describes its outputs:
/// - any [`Service`] or a tuple of up to six services
/// - `()` for factories only run for their side effects
/// - a `Result` of the above, where an `Err` fails the spawn
///
/// ```rust,ignore
/// let factory = Factory::new(|number: Arc<i32>, flag: Arc<bool>| format!("{number}-{flag}"));
/// ```
#[derive(Clone)]
pub struct Factory {
    name: String,
    source: String,
    dependencies: Vec<Dependency>,
    outputs: Vec<OutputInfo>,
    fallible: bool,
    metadata: FactoryMetadata,
    views: Vec<InterfaceView>,
    problems: Vec<String>,
    constructor: Arc<Constructor>,
    loaded: Arc<AtomicBool>,
}
impl std::fmt::Debug for Factory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Factory")
            .field("name", &self.name)
            .field("source", &self.source)
            .finish()
    }
}

impl Factory {
    /// Wraps a function of up to eight injectable parameters
    pub fn new<Args, F: FactoryFn<Args>>(factory: F) -> Self {
        let outputs = <F::Output as IntoOutputs>::outputs();
        let name = format!(
            "Factory[fn({}) -> {}]",
            F::signature().join(", "),
            short_type_name(type_name::<F::Output>())
        );

        let constructor: Arc<Constructor> = Arc::new(move |scope: &Scope<'_>| {
            factory
                .call(scope)?
                .into_outputs()
                .map_err(|error| Error::FactoryReturnedError(Arc::from(error)))
        });

        Factory {
            name,
            source: source_of(type_name::<F>()),
            dependencies: F::dependencies(),
            fallible: <F::Output as IntoOutputs>::is_fallible(),
            outputs,
            metadata: FactoryMetadata::default(),
            views: Vec::new(),
            problems: Vec::new(),
            constructor,
            loaded: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A factory always returning the given value
    pub fn service<T: Service>(value: T) -> Self {
        Self::shared(Arc::new(value))
    }

    /// A factory always returning the given, already shared, value
    pub fn shared<T: Service>(value: Arc<T>) -> Self {
        let constructor: Arc<Constructor> =
            Arc::new(move |_: &Scope<'_>| Ok(vec![Instance::from_arc(value.clone())]));

        Factory {
            name: format!("Service[{}]", short_type_name(type_name::<T>())),
            source: source_of(type_name::<T>()),
            dependencies: Vec::new(),
            outputs: vec![OutputInfo::of::<T>()],
            fallible: false,
            metadata: FactoryMetadata::default(),
            views: Vec::new(),
            problems: Vec::new(),
            constructor,
            loaded: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Attaches a value the container never looks at
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Any + Send + Sync) -> Self {
        self.metadata.0.insert(key.into(), Arc::new(value));
        self
    }

    /// Makes the output `S` resolvable as `Arc<I>` as well, usually with `I = dyn Trait`.
    ///
    /// An `S` which is not an output of this factory fails registration.
    pub fn implements<S, I>(
        mut self,
        cast: impl Fn(Arc<S>) -> Arc<I> + Send + Sync + 'static,
    ) -> Self
    where
        S: Service,
        I: ?Sized + Send + Sync + 'static,
    {
        let service = TypeInfo::of::<S>();
        let interface = TypeInfo::of::<I>();

        let Some(output) = self.outputs.iter().position(|o| o.type_info == service) else {
            self.problems.push(format!(
                "'{service}' is not an output of the factory, it can not implement '{interface}'"
            ));
            return self;
        };

        self.outputs[output].interfaces.push(interface);
        self.views.push(InterfaceView {
            output,
            cast: Arc::new(move |instance: &Instance| {
                let value = instance.downcast::<S>().ok()?;
                Some(instance.view(cast(value)))
            }),
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Best effort module path of the function
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    pub fn outputs(&self) -> &[OutputInfo] {
        &self.outputs
    }

    /// Whether the function returns a `Result`
    pub fn is_fallible(&self) -> bool {
        self.fallible
    }

    pub fn metadata(&self) -> &FactoryMetadata {
        &self.metadata
    }

    /// Checks the factory once and creates its lifetime
    pub(crate) fn load(&self, parent: &Lifetime) -> Result<Lifetime, Error> {
        if let Some(problem) = self.problems.first() {
            return Err(Error::InvalidFactory {
                factory: self.name.clone(),
                reason: problem.clone(),
            });
        }

        if self.loaded.swap(true, Ordering::SeqCst) {
            return Err(Error::InvalidFactory {
                factory: self.name.clone(),
                reason: "factory already loaded".to_string(),
            });
        }

        Ok(parent.child())
    }

    pub(crate) fn construct(&self, scope: &Scope<'_>) -> Result<Vec<Instance>, Error> {
        (self.constructor)(scope)
    }

    pub(crate) fn views(&self) -> &[InterfaceView] {
        &self.views
    }
}

/// Values attached to a factory at registration
#[derive(Clone, Default)]
pub struct FactoryMetadata(HashMap<String, Arc<dyn Any + Send + Sync>>);
impl FactoryMetadata {
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.0.get(key)?.downcast_ref::<T>()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

/// Turns an output into one of its interfaces
#[derive(Clone)]
pub(crate) struct InterfaceView {
    pub(crate) output: usize,
    pub(crate) cast: Arc<ViewCast>,
}

/// A function which can be used as a factory
pub trait FactoryFn<Args>: Send + Sync + 'static {
    type Output: IntoOutputs;

    fn dependencies() -> Vec<Dependency>;

    /// Short type names of the parameters
    fn signature() -> Vec<String>;

    fn call(&self, scope: &Scope<'_>) -> Result<Self::Output, Error>;
}

macro_rules! impl_factory_fn {
    ($($arg:ident),*) => {
        impl<Func, Out, $($arg,)*> FactoryFn<($($arg,)*)> for Func
        where
            Func: Fn($($arg),*) -> Out + Send + Sync + 'static,
            Out: IntoOutputs,
            $($arg: Inject,)*
        {
            type Output = Out;

            fn dependencies() -> Vec<Dependency> {
                vec![$(<$arg as Inject>::dependency(),)*]
            }

            fn signature() -> Vec<String> {
                vec![$(short_type_name(type_name::<$arg>()),)*]
            }

            #[allow(non_snake_case, unused_mut, unused_variables, unused_assignments)]
            fn call(&self, scope: &Scope<'_>) -> Result<Out, Error> {
                let mut index = 0;
                $(
                    let $arg = scope.argument::<$arg>(index)?;
                    index += 1;
                )*
                Ok((self)($($arg),*))
            }
        }
    };
}
impl_factory_fn!();
impl_factory_fn!(A1);
impl_factory_fn!(A1, A2);
impl_factory_fn!(A1, A2, A3);
impl_factory_fn!(A1, A2, A3, A4);
impl_factory_fn!(A1, A2, A3, A4, A5);
impl_factory_fn!(A1, A2, A3, A4, A5, A6);
impl_factory_fn!(A1, A2, A3, A4, A5, A6, A7);
impl_factory_fn!(A1, A2, A3, A4, A5, A6, A7, A8);

/// The values a factory produces, without a trailing error
pub trait IntoValues: 'static {
    fn outputs() -> Vec<OutputInfo>;

    fn into_instances(self) -> Vec<Instance>;
}
impl<T: Service> IntoValues for T {
    fn outputs() -> Vec<OutputInfo> {
        vec![OutputInfo::of::<T>()]
    }

    fn into_instances(self) -> Vec<Instance> {
        vec![Instance::new(self)]
    }
}
impl IntoValues for () {
    fn outputs() -> Vec<OutputInfo> {
        Vec::new()
    }

    fn into_instances(self) -> Vec<Instance> {
        Vec::new()
    }
}

macro_rules! impl_into_values_tuple {
    ($($value:ident),+) => {
        impl<$($value: Service,)+> IntoValues for ($($value,)+) {
            fn outputs() -> Vec<OutputInfo> {
                vec![$(OutputInfo::of::<$value>(),)+]
            }

            #[allow(non_snake_case)]
            fn into_instances(self) -> Vec<Instance> {
                let ($($value,)+) = self;
                vec![$(Instance::new($value),)+]
            }
        }
    };
}
impl_into_values_tuple!(T1);
impl_into_values_tuple!(T1, T2);
impl_into_values_tuple!(T1, T2, T3);
impl_into_values_tuple!(T1, T2, T3, T4);
impl_into_values_tuple!(T1, T2, T3, T4, T5);
impl_into_values_tuple!(T1, T2, T3, T4, T5, T6);

/// Return type of a factory function
pub trait IntoOutputs: 'static {
    fn outputs() -> Vec<OutputInfo>;

    /// Whether the last value is an error
    fn is_fallible() -> bool;

    fn into_outputs(self) -> Result<Vec<Instance>, DynError>;
}
impl<V: IntoValues> IntoOutputs for V {
    fn outputs() -> Vec<OutputInfo> {
        <V as IntoValues>::outputs()
    }

    fn is_fallible() -> bool {
        false
    }

    fn into_outputs(self) -> Result<Vec<Instance>, DynError> {
        Ok(self.into_instances())
    }
}
impl<V: IntoValues, E: Into<DynError> + 'static> IntoOutputs for Result<V, E> {
    fn outputs() -> Vec<OutputInfo> {
        <V as IntoValues>::outputs()
    }

    fn is_fallible() -> bool {
        true
    }

    fn into_outputs(self) -> Result<Vec<Instance>, DynError> {
        self.map(IntoValues::into_instances).map_err(Into::into)
    }
}

/// Strips module paths from every segment of a type name
///
/// `alloc::sync::Arc<alloc::string::String>` becomes `Arc<String>`
pub(crate) fn short_type_name(full: &str) -> String {
    let mut short = String::with_capacity(full.len());
    let mut segment = String::new();

    for c in full.chars() {
        match c {
            '<' | '>' | ',' | '(' | ')' | '[' | ']' | ';' | ' ' | '&' | '*' => {
                short.push_str(last_segment(&segment));
                segment.clear();
                short.push(c);
            }
            _ => segment.push(c),
        }
    }
    short.push_str(last_segment(&segment));
    short
}

fn last_segment(path: &str) -> &str {
    path.rsplit("::").next().unwrap_or(path)
}

/// Module path of a function or type name
///
/// Closure segments and the item name are removed, generic arguments are never split.
pub(crate) fn source_of(full: &str) -> String {
    let mut segments = Vec::new();
    let mut depth = 0_usize;
    let mut start = 0;
    let bytes = full.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'<' => depth += 1,
            b'>' => depth = depth.saturating_sub(1),
            b':' if depth == 0 && bytes.get(i + 1) == Some(&b':') => {
                segments.push(&full[start..i]);
                i += 2;
                start = i;
                continue;
            }
            _ => {}
        }
        i += 1;
    }
    segments.push(&full[start..]);

    while segments.last().is_some_and(|s| s.starts_with("{{")) {
        segments.pop();
    }
    segments.pop();

    segments.join("::")
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::{resolver::Optional, types::OutputKind};

    trait Named: Send + Sync {
        fn name(&self) -> &str;
    }
    struct Db;
    impl Service for Db {}
    impl Named for Db {
        fn name(&self) -> &str {
            "db"
        }
    }

    #[rstest]
    #[case("alloc::sync::Arc<alloc::string::String>", "Arc<String>")]
    #[case("core::option::Option<(i32, bool)>", "Option<(i32, bool)>")]
    #[case("alloc::sync::Arc<dyn core::fmt::Debug>", "Arc<dyn Debug>")]
    #[case("&'static str", "&'static str")]
    fn shortens_type_names(#[case] full: &str, #[case] expected: &str) {
        assert_eq!(short_type_name(full), expected);
    }

    #[rstest]
    #[case("app::db::connect", "app::db")]
    #[case("app::main::{{closure}}", "app")]
    #[case("app::main::{{closure}}::{{closure}}", "app")]
    #[case("app::Store<app::db::Db>", "app")]
    #[case("i32", "")]
    fn extracts_source(#[case] full: &str, #[case] expected: &str) {
        assert_eq!(source_of(full), expected);
    }

    #[test]
    fn describes_closure_shape() {
        let factory = Factory::new(|number: Arc<i32>, _flag: Optional<bool>, _: Lifetime| {
            Ok::<_, std::io::Error>((number.to_string(), 1_u8))
        });

        assert_eq!(
            factory.dependencies(),
            &[
                Dependency::required::<i32>(),
                Dependency::optional::<bool>(),
                Dependency::lifetime()
            ]
        );
        assert_eq!(
            factory.outputs(),
            &[OutputInfo::of::<String>(), OutputInfo::of::<u8>()]
        );
        assert!(factory.is_fallible());
        assert!(factory.name().starts_with("Factory[fn(Arc<i32>, Optional<bool>, Lifetime) -> Result<(String, u8)"));
        assert!(factory.source().starts_with("wrapp_container::factories::tests"));
    }

    #[test]
    fn service_factory_has_no_dependencies() {
        let factory = Factory::service(String::from("config"));
        assert_eq!(factory.name(), "Service[String]");
        assert!(factory.dependencies().is_empty());
        assert_eq!(factory.outputs()[0].kind, OutputKind::Value);
        assert!(!factory.is_fallible());
    }

    #[test]
    fn metadata_is_typed() {
        let factory = Factory::new(|| 1_u8)
            .with_metadata("name", "one")
            .with_metadata("weight", 10_u32);

        assert_eq!(factory.metadata().get::<&'static str>("name"), Some(&"one"));
        assert_eq!(factory.metadata().get::<u32>("weight"), Some(&10));
        assert_eq!(factory.metadata().get::<u64>("weight"), None);
        assert!(!factory.metadata().contains_key("missing"));
    }

    #[test]
    fn implements_adds_interface() {
        let factory = Factory::new(|| Db).implements::<Db, dyn Named>(|db| db as Arc<dyn Named>);

        assert_eq!(factory.outputs()[0].interfaces, vec![TypeInfo::of::<dyn Named>()]);
        assert!(factory.outputs()[0].provides(&TypeInfo::of::<dyn Named>()));
        assert!(factory.load(&Lifetime::new()).is_ok());
    }

    #[test]
    fn implements_unknown_output_fails_load() {
        let factory = Factory::new(|| 1_u8).implements::<Db, dyn Named>(|db| db as Arc<dyn Named>);
        let error = factory.load(&Lifetime::new()).unwrap_err();
        assert!(matches!(error, Error::InvalidFactory { .. }));
    }

    #[test]
    fn load_twice_fails() {
        let factory = Factory::new(|| 1_u8);
        let clone = factory.clone();
        let parent = Lifetime::new();

        let lifetime = factory.load(&parent).unwrap();
        assert!(clone.load(&parent).is_err());

        parent.cancel();
        assert!(lifetime.is_cancelled());
    }
}
