use std::{
    any::{type_name, Any},
    collections::HashMap,
    ops::Deref,
    sync::{Arc, PoisonError, RwLock},
};

use crate::{
    errors::{Error, Errors},
    types::{DynError, Service},
};

/// Fired before the container starts spawning factories
pub const CONTAINER_STARTING: &str = "ContainerStarting";
/// Fired after start, with an `Option<Error>` argument
pub const CONTAINER_STARTED: &str = "ContainerStarted";
/// Fired before the container closes its factories
pub const CONTAINER_CLOSING: &str = "ContainerClosing";
/// Fired after close, with an `Option<Error>` argument
pub const CONTAINER_CLOSED: &str = "ContainerClosed";
/// Fired when the container caught a panic, with the message and a backtrace as `String`s
pub const UNHANDLED_PANIC: &str = "UnhandledPanic";

/// A single typed event argument
#[derive(Clone)]
pub struct EventArg {
    type_name: &'static str,
    value: Arc<dyn Any + Send + Sync>,
}
impl std::fmt::Debug for EventArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("EventArg").field(&self.type_name).finish()
    }
}
impl EventArg {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        EventArg {
            type_name: type_name::<T>(),
            value: Arc::new(value),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }
}

/// Named notification with positional arguments, `None` being an untyped nil
#[derive(Clone, Debug)]
pub struct Event {
    name: String,
    args: Vec<Option<EventArg>>,
}
impl Event {
    pub fn new(name: impl Into<String>) -> Self {
        Event {
            name: name.into(),
            args: Vec::new(),
        }
    }

    pub fn with_arg<T: Any + Send + Sync>(mut self, value: T) -> Self {
        self.args.push(Some(EventArg::new(value)));
        self
    }

    pub fn with_nil(mut self) -> Self {
        self.args.push(None);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[Option<EventArg>] {
        &self.args
    }
}

/// All arguments of an event, received by variadic handlers
#[derive(Clone, Debug)]
pub struct EventArgs(Vec<Option<EventArg>>);
impl EventArgs {
    /// Typed argument at `index`, `None` if missing, nil or of another type
    pub fn get<T: Any>(&self, index: usize) -> Option<&T> {
        self.0.get(index)?.as_ref()?.downcast_ref::<T>()
    }

    pub fn is_nil(&self, index: usize) -> bool {
        matches!(self.0.get(index), Some(None))
    }
}
impl Deref for EventArgs {
    type Target = [Option<EventArg>];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Position of a handler parameter within the event arguments
pub enum ArgSlot<'a> {
    /// The event has fewer arguments
    Missing,
    Nil,
    Value(&'a EventArg),
}
impl ArgSlot<'_> {
    fn type_name(&self) -> &'static str {
        match self {
            ArgSlot::Missing => "missing",
            ArgSlot::Nil => "nil",
            ArgSlot::Value(arg) => arg.type_name(),
        }
    }
}

/// A type usable as a parameter of a fixed parameter event handler.
///
/// Missing arguments become the zero value. Nil is only accepted by nilable
/// parameters, `Option<T>` and `Vec<T>`.
pub trait HandlerArg: Sized + 'static {
    /// `None` if the argument can not be converted
    fn from_slot(slot: ArgSlot<'_>) -> Option<Self>;
}

macro_rules! impl_handler_arg {
    ($($ty:ty),* $(,)?) => {
        $(
            impl HandlerArg for $ty {
                fn from_slot(slot: ArgSlot<'_>) -> Option<Self> {
                    match slot {
                        ArgSlot::Missing => Some(Default::default()),
                        ArgSlot::Nil => None,
                        ArgSlot::Value(arg) => arg.downcast_ref::<$ty>().cloned(),
                    }
                }
            }
        )*
    };
}
impl_handler_arg!(
    bool, char, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64,
    String, &'static str,
);

impl<T: Clone + Send + Sync + 'static> HandlerArg for Option<T> {
    fn from_slot(slot: ArgSlot<'_>) -> Option<Self> {
        match slot {
            ArgSlot::Missing | ArgSlot::Nil => Some(None),
            ArgSlot::Value(arg) => arg
                .downcast_ref::<Option<T>>()
                .cloned()
                .or_else(|| arg.downcast_ref::<T>().map(|value| Some(value.clone()))),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> HandlerArg for Vec<T> {
    fn from_slot(slot: ArgSlot<'_>) -> Option<Self> {
        match slot {
            ArgSlot::Missing | ArgSlot::Nil => Some(Vec::new()),
            ArgSlot::Value(arg) => arg.downcast_ref::<Vec<T>>().cloned(),
        }
    }
}

fn convert<T: HandlerArg>(event: &Event, index: usize) -> Result<T, Error> {
    let slot = match event.args.get(index) {
        None => ArgSlot::Missing,
        Some(None) => ArgSlot::Nil,
        Some(Some(arg)) => ArgSlot::Value(arg),
    };
    let actual = slot.type_name();

    T::from_slot(slot).ok_or_else(|| Error::HandlerArgTypeMismatch {
        event: event.name.clone(),
        index,
        expected: type_name::<T>(),
        actual,
    })
}

/// Return type of event handlers
pub trait HandlerOutput {
    fn into_handler_result(self, event: &str) -> Result<(), Error>;
}
impl HandlerOutput for () {
    fn into_handler_result(self, _: &str) -> Result<(), Error> {
        Ok(())
    }
}
impl<E: Into<DynError>> HandlerOutput for Result<(), E> {
    fn into_handler_result(self, event: &str) -> Result<(), Error> {
        self.map_err(|error| Error::Handler {
            event: event.to_string(),
            error: Arc::from(error.into()),
        })
    }
}

#[doc(hidden)]
pub struct Variadic;
#[doc(hidden)]
pub struct Fixed;

/// A function which can subscribe to events.
///
/// Either `Fn(EventArgs)` receiving every argument, or a function of up to six
/// [`HandlerArg`] parameters. Both may return `()` or `Result<(), E>`.
pub trait EventHandler<Marker>: Send + Sync + 'static {
    fn handle(&self, event: &Event) -> Result<(), Error>;
}

impl<Func, Out> EventHandler<(Variadic, Out)> for Func
where
    Func: Fn(EventArgs) -> Out + Send + Sync + 'static,
    Out: HandlerOutput,
{
    fn handle(&self, event: &Event) -> Result<(), Error> {
        (self)(EventArgs(event.args.clone())).into_handler_result(&event.name)
    }
}

macro_rules! impl_event_handler {
    ($($arg:ident),*) => {
        impl<Func, Out, $($arg,)*> EventHandler<(Fixed, Out, $($arg,)*)> for Func
        where
            Func: Fn($($arg),*) -> Out + Send + Sync + 'static,
            Out: HandlerOutput,
            $($arg: HandlerArg,)*
        {
            #[allow(non_snake_case, unused_mut, unused_variables, unused_assignments)]
            fn handle(&self, event: &Event) -> Result<(), Error> {
                let mut index = 0;
                $(
                    let $arg = convert::<$arg>(event, index)?;
                    index += 1;
                )*
                (self)($($arg),*).into_handler_result(&event.name)
            }
        }
    };
}
impl_event_handler!();
impl_event_handler!(A1);
impl_event_handler!(A1, A2);
impl_event_handler!(A1, A2, A3);
impl_event_handler!(A1, A2, A3, A4);
impl_event_handler!(A1, A2, A3, A4, A5);
impl_event_handler!(A1, A2, A3, A4, A5, A6);

type Handler = Arc<dyn Fn(&Event) -> Result<(), Error> + Send + Sync>;

/// Publish / subscribe broker for lifecycle and user events
#[derive(Clone, Default)]
pub struct Events(Arc<EventsInner>);
#[derive(Default)]
struct EventsInner {
    handlers: RwLock<HashMap<String, Vec<Handler>>>,
}
impl Service for Events {}
impl std::fmt::Debug for Events {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.0.handlers.read().unwrap_or_else(PoisonError::into_inner);
        let mut map = f.debug_map();
        for (name, list) in handlers.iter() {
            map.entry(name, &list.len());
        }
        map.finish()
    }
}

impl Events {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a handler, called after all handlers subscribed before it
    pub fn subscribe<Marker, H: EventHandler<Marker>>(&self, name: impl Into<String>, handler: H) {
        let name = name.into();
        tracing::debug!("Subscribed handler to {}", name);

        let handler: Handler = Arc::new(move |event: &Event| handler.handle(event));
        self.0
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name)
            .or_default()
            .push(handler);
    }

    /// Calls every handler of the event, a failing handler does not stop the others
    pub fn trigger(&self, event: &Event) -> Result<(), Error> {
        let handlers = self
            .0
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event.name)
            .cloned()
            .unwrap_or_default();

        let mut errors = Errors::default();
        for handler in handlers {
            if let Err(error) = handler(event) {
                tracing::warn!("Handler for {} failed: {}", event.name, error);
                errors.push(error);
            }
        }

        errors.into_result()
    }

    pub fn handler_count(&self, name: &str) -> usize {
        self.0
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use rstest::rstest;

    use super::*;
    use crate::errors::ErrorKind;

    type Log = Arc<Mutex<Vec<String>>>;

    fn log() -> Log {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[test]
    fn handlers_run_in_subscription_order() {
        let events = Events::new();
        let calls = log();
        for name in ["first", "second", "third"] {
            let calls = calls.clone();
            events.subscribe("test", move || calls.lock().unwrap().push(name.to_string()));
        }

        events.trigger(&Event::new("test")).unwrap();
        events.trigger(&Event::new("other")).unwrap();

        assert_eq!(*calls.lock().unwrap(), vec!["first", "second", "third"]);
        assert_eq!(events.handler_count("test"), 3);
    }

    #[test]
    fn variadic_handler_receives_all_args() {
        let events = Events::new();
        let calls = log();
        let seen = calls.clone();
        events.subscribe("test", move |args: EventArgs| {
            let mut seen = seen.lock().unwrap();
            seen.push(args.len().to_string());
            seen.push(args.get::<i32>(0).map(ToString::to_string).unwrap_or_default());
            seen.push(args.is_nil(1).to_string());
        });

        events
            .trigger(&Event::new("test").with_arg(7_i32).with_nil().with_arg("x"))
            .unwrap();

        assert_eq!(*calls.lock().unwrap(), vec!["3", "7", "true"]);
    }

    #[test]
    fn typed_handler_converts_args() {
        let events = Events::new();
        let calls = log();
        let seen = calls.clone();
        events.subscribe(
            "test",
            move |number: i32, text: String, maybe: Option<u8>, list: Vec<u8>, missing: bool| {
                seen.lock()
                    .unwrap()
                    .push(format!("{number} {text} {maybe:?} {list:?} {missing}"));
            },
        );

        events
            .trigger(
                &Event::new("test")
                    .with_arg(1_i32)
                    .with_arg("a".to_string())
                    .with_nil()
                    .with_nil(),
            )
            .unwrap();
        events
            .trigger(&Event::new("test").with_arg(2_i32).with_arg("b".to_string()).with_arg(3_u8))
            .unwrap();

        assert_eq!(
            *calls.lock().unwrap(),
            vec!["1 a None [] false", "2 b Some(3) [] false"]
        );
    }

    #[rstest]
    #[case::wrong_type(Event::new("test").with_arg("text"))]
    #[case::nil_for_plain_value(Event::new("test").with_nil())]
    fn mismatch_is_reported_and_others_still_run(#[case] event: Event) {
        let events = Events::new();
        let calls = log();
        let seen = calls.clone();
        events.subscribe("test", |_: i32| {});
        events.subscribe("test", move || seen.lock().unwrap().push("ran".to_string()));

        let error = events.trigger(&event).unwrap_err();

        assert!(error.is(ErrorKind::HandlerArgTypeMismatch));
        assert_eq!(*calls.lock().unwrap(), vec!["ran"]);
    }

    #[test]
    fn handler_errors_are_joined() {
        let events = Events::new();
        events.subscribe("test", || Err::<(), _>(std::io::Error::other("first")));
        events.subscribe("test", || Err::<(), _>(std::io::Error::other("second")));

        let error = events.trigger(&Event::new("test")).unwrap_err();

        assert!(error.is(ErrorKind::HandlerFailed));
        assert!(matches!(&error, Error::Joined(errors) if errors.len() == 2));
    }

    #[test]
    fn handlers_may_subscribe_while_triggered() {
        let events = Events::new();
        let inner = events.clone();
        events.subscribe("test", move || inner.subscribe("test", || {}));

        events.trigger(&Event::new("test")).unwrap();
        assert_eq!(events.handler_count("test"), 2);
    }
}
