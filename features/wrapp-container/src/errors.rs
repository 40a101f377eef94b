use std::any::Any;

use thiserror::Error;

use crate::types::{Dependency, SharedError, TypeInfo};

/// Sentinel kinds, matchable through any amount of wrapping with [`Error::is`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidFactory,
    ServiceNotResolved,
    ServiceDuplicated,
    CircularDependency,
    FactoryReturnedError,
    StackLimitReached,
    HandlerArgTypeMismatch,
    HandlerFailed,
    CloseFailed,
    ServiceFunctionFailed,
    DowncastFailed,
    ContainerClosed,
}

#[derive(Error, Debug, Clone)]
pub enum Error {
    /// The factory can not be registered
    #[error("invalid factory '{factory}': {reason}")]
    InvalidFactory { factory: String, reason: String },

    /// No factory produces the required type
    #[error("service not resolved: '{0}'")]
    ServiceNotResolved(TypeInfo),

    #[error("failed to validate argument '{dependency}' (index {index}) of factory '{factory}' from '{origin}': service not resolved")]
    UnresolvedArgument {
        factory: String,
        origin: String,
        index: usize,
        dependency: TypeInfo,
    },

    #[error("failed to validate output '{output}' (index {index}) of factory '{factory}' from '{origin}': service duplicated")]
    ServiceDuplicated {
        factory: String,
        origin: String,
        index: usize,
        output: TypeInfo,
    },

    #[error("failed to validate factory '{factory}' from '{origin}': circular dependency")]
    CircularDependency { factory: String, origin: String },

    /// The factory itself returned an error
    #[error("factory returned error: {0}")]
    FactoryReturnedError(SharedError),

    /// Resolution went deeper than the configured limit, most likely a cycle
    #[error("stack limit reached: resolution depth exceeded {0}")]
    StackLimitReached(usize),

    #[error("failed to spawn factory '{factory}' from '{origin}': {error}")]
    Spawn {
        factory: String,
        origin: String,
        #[source]
        error: Box<Error>,
    },

    #[error("failed to resolve argument '{dependency}' (index {index}): {error}")]
    Dependency {
        index: usize,
        dependency: Dependency,
        #[source]
        error: Box<Error>,
    },

    #[error("failed to close service '{output}' (index {index}) of factory '{factory}' from '{origin}': {error}")]
    Close {
        output: TypeInfo,
        index: usize,
        factory: String,
        origin: String,
        error: SharedError,
    },

    #[error("failed to convert argument (index {index}) of event '{event}': expected '{expected}', got '{actual}'")]
    HandlerArgTypeMismatch {
        event: String,
        index: usize,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("handler for event '{event}' failed: {error}")]
    Handler { event: String, error: SharedError },

    #[error("Failed to downcast, required: '{required}' actual: '{actual}'")]
    DowncastFailed {
        required: &'static str,
        actual: &'static str,
    },

    /// The container was closed or dropped
    #[error("container is closed")]
    ContainerClosed,

    /// A background service function failed or panicked
    #[error("service function failed: {0}")]
    ServiceFunction(SharedError),

    #[error("{context}: {error}")]
    Context {
        context: String,
        #[source]
        error: Box<Error>,
    },

    #[error(transparent)]
    Joined(#[from] Errors),
}

impl Error {
    pub(crate) fn context(self, context: impl Into<String>) -> Self {
        Error::Context {
            context: context.into(),
            error: Box::new(self),
        }
    }

    /// The kind of this error itself, `None` for wrappers
    fn own_kind(&self) -> Option<ErrorKind> {
        let kind = match self {
            Error::InvalidFactory { .. } => ErrorKind::InvalidFactory,
            Error::ServiceNotResolved(_) | Error::UnresolvedArgument { .. } => {
                ErrorKind::ServiceNotResolved
            }
            Error::ServiceDuplicated { .. } => ErrorKind::ServiceDuplicated,
            Error::CircularDependency { .. } => ErrorKind::CircularDependency,
            Error::FactoryReturnedError(_) => ErrorKind::FactoryReturnedError,
            Error::StackLimitReached(_) => ErrorKind::StackLimitReached,
            Error::Close { .. } => ErrorKind::CloseFailed,
            Error::HandlerArgTypeMismatch { .. } => ErrorKind::HandlerArgTypeMismatch,
            Error::Handler { .. } => ErrorKind::HandlerFailed,
            Error::DowncastFailed { .. } => ErrorKind::DowncastFailed,
            Error::ContainerClosed => ErrorKind::ContainerClosed,
            Error::ServiceFunction(_) => ErrorKind::ServiceFunctionFailed,
            Error::Spawn { .. }
            | Error::Dependency { .. }
            | Error::Context { .. }
            | Error::Joined(_) => return None,
        };
        Some(kind)
    }

    /// Walks wrapped and joined errors looking for the given kind
    pub fn is(&self, kind: ErrorKind) -> bool {
        if self.own_kind() == Some(kind) {
            return true;
        }

        match self {
            Error::Spawn { error, .. }
            | Error::Dependency { error, .. }
            | Error::Context { error, .. } => error.is(kind),
            Error::Joined(errors) => errors.iter().any(|error| error.is(kind)),
            Error::FactoryReturnedError(error)
            | Error::Close { error, .. }
            | Error::Handler { error, .. }
            | Error::ServiceFunction(error) => error
                .downcast_ref::<Error>()
                .is_some_and(|error| error.is(kind)),
            _ => false,
        }
    }

    /// Kind of the innermost error, `None` if several errors are joined
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Error::Spawn { error, .. }
            | Error::Dependency { error, .. }
            | Error::Context { error, .. } => error.kind(),
            Error::Joined(errors) => match errors.errors.as_slice() {
                [single] => single.kind(),
                _ => None,
            },
            other => other.own_kind(),
        }
    }
}

/// Several independent errors, reported together
#[derive(Error, Debug, Clone, Default)]
pub struct Errors {
    pub errors: Vec<Error>,
}
impl std::fmt::Display for Errors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let display: Vec<String> = self.errors.iter().map(ToString::to_string).collect();
        f.write_str(&display.join("\n"))
    }
}
impl Errors {
    pub fn push(&mut self, error: Error) {
        self.errors.push(error);
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Error> {
        self.errors.iter()
    }

    /// `Ok` when empty, the error itself when there is just one
    pub fn into_result(mut self) -> Result<(), Error> {
        match self.errors.len() {
            0 => Ok(()),
            1 => Err(self.errors.remove(0)),
            _ => Err(Error::Joined(self)),
        }
    }
}
impl From<Vec<Error>> for Errors {
    fn from(errors: Vec<Error>) -> Self {
        Errors { errors }
    }
}

#[derive(Error, Debug)]
#[error("panic: {0}")]
pub(crate) struct PanicError(pub(crate) String);

/// Extracts the message of a caught panic
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn spawn_error(error: Error) -> Error {
        Error::Spawn {
            factory: "Factory[fn() -> i32]".to_string(),
            origin: "app".to_string(),
            error: Box::new(error),
        }
    }

    #[test]
    fn is_walks_wrappers() {
        let error = spawn_error(Error::Dependency {
            index: 0,
            dependency: Dependency::required::<bool>(),
            error: Box::new(spawn_error(Error::StackLimitReached(100))),
        });

        assert!(error.is(ErrorKind::StackLimitReached));
        assert!(!error.is(ErrorKind::CircularDependency));
        assert_eq!(error.kind(), Some(ErrorKind::StackLimitReached));
    }

    #[test]
    fn is_walks_joined_and_shared_errors() {
        let close = Error::Close {
            output: TypeInfo::of::<String>(),
            index: 0,
            factory: "Factory[fn() -> String]".to_string(),
            origin: "app".to_string(),
            error: Arc::new(Error::ServiceFunction(Arc::new(PanicError("boom".into())))),
        };
        let joined = Errors::from(vec![Error::ContainerClosed, close]).into_result();
        let joined = joined.unwrap_err();

        assert!(joined.is(ErrorKind::ContainerClosed));
        assert!(joined.is(ErrorKind::CloseFailed));
        assert!(joined.is(ErrorKind::ServiceFunctionFailed));
        assert_eq!(joined.kind(), None);
    }

    #[test]
    fn into_result_unwraps_single_error() {
        assert!(Errors::default().into_result().is_ok());
        let single = Errors::from(vec![Error::ContainerClosed]).into_result();
        assert!(matches!(single, Err(Error::ContainerClosed)));
    }

    #[test]
    fn spawn_message_chains_inner_error() {
        let error = spawn_error(Error::ServiceNotResolved(TypeInfo::of::<bool>()));
        assert_eq!(
            error.to_string(),
            "failed to spawn factory 'Factory[fn() -> i32]' from 'app': service not resolved: 'bool'"
        );
    }

    #[test]
    fn panic_message_reads_str_and_string() {
        let payload: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(payload.as_ref()), "static");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
    }
}
