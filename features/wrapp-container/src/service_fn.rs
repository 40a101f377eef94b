use std::{
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Mutex, OnceLock},
    thread,
};

use futures_channel::oneshot;

use crate::{
    errors::{panic_message, Error, PanicError},
    types::{lock, DynError, Fallible, Service},
};

type ServiceBody = Box<dyn FnOnce() -> Result<(), DynError> + Send>;

/// A background task returned by a factory.
///
/// Instead of being stored, the function is started on its own thread as soon as
/// its factory is spawned. The container stores a [`ServiceHandle`] in its place,
/// which waits for the function to return when the container closes.
///
/// ```rust,ignore
/// Factory::new(|lifetime: Lifetime| {
///     ServiceFn::new(move || {
///         lifetime.wait();
///         Ok::<_, std::io::Error>(())
///     })
/// })
/// ```
pub struct ServiceFn {
    body: Mutex<Option<ServiceBody>>,
}
impl std::fmt::Debug for ServiceFn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceFn")
            .field("started", &lock(&self.body).is_none())
            .finish()
    }
}
impl Service for ServiceFn {}

impl ServiceFn {
    pub fn new<F, R>(body: F) -> Self
    where
        F: FnOnce() -> R + Send + 'static,
        R: Fallible,
    {
        ServiceFn {
            body: Mutex::new(Some(Box::new(move || body().into_result()))),
        }
    }

    /// Takes the function out, it can only be started once
    pub(crate) fn take(&self) -> Option<ServiceBody> {
        lock(&self.body).take()
    }
}

/// Handle to a running [`ServiceFn`]
pub struct ServiceHandle {
    result: OnceLock<Result<(), Error>>,
    rx: Mutex<Option<oneshot::Receiver<Result<(), Error>>>>,
}
impl std::fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceHandle")
            .field("result", &self.result.get())
            .finish()
    }
}

impl ServiceHandle {
    pub(crate) fn spawn(name: &str, body: ServiceBody) -> Result<Self, Error> {
        let (tx, rx) = oneshot::channel();

        thread::Builder::new()
            .name(format!("service:{name}"))
            .spawn(move || {
                let result = match panic::catch_unwind(AssertUnwindSafe(body)) {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(error)) => Err(Error::ServiceFunction(Arc::from(error))),
                    Err(payload) => {
                        let message = panic_message(payload.as_ref());
                        tracing::error!("Service function panicked: {}", message);
                        Err(Error::ServiceFunction(Arc::new(PanicError(message))))
                    }
                };
                let _ = tx.send(result);
            })
            .map_err(|error| Error::ServiceFunction(Arc::new(error)))?;

        Ok(ServiceHandle {
            result: OnceLock::new(),
            rx: Mutex::new(Some(rx)),
        })
    }

    /// Blocks until the service function returned
    pub fn wait(&self) -> Result<(), Error> {
        if let Some(result) = self.result.get() {
            return result.clone();
        }

        // Lock receiver, so result is not taken out while we wait
        let mut rx = lock(&self.rx);
        if let Some(result) = self.result.get() {
            return result.clone();
        }

        let result = match rx.take() {
            Some(rx) => futures::executor::block_on(rx).unwrap_or_else(|_| {
                Err(Error::ServiceFunction(Arc::new(PanicError(
                    "service function exited without a result".to_string(),
                ))))
            }),
            None => Ok(()),
        };

        self.result.get_or_init(|| result).clone()
    }

    /// True once the service function returned
    pub fn is_finished(&self) -> bool {
        if self.result.get().is_some() {
            return true;
        }

        let mut guard = lock(&self.rx);
        let Some(rx) = guard.as_mut() else {
            return self.result.get().is_some();
        };

        match rx.try_recv() {
            Ok(Some(result)) => {
                let _ = self.result.set(result);
                *guard = None;
                true
            }
            Ok(None) => false,
            Err(_) => true,
        }
    }
}
impl Service for ServiceHandle {
    fn try_close(&self) -> Result<(), DynError> {
        self.wait().map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io,
        sync::atomic::{AtomicBool, Ordering},
        time::Duration,
    };

    use super::*;
    use crate::errors::ErrorKind;

    #[test]
    fn service_fn_can_only_be_taken_once() {
        let service = ServiceFn::new(|| ());
        assert!(service.take().is_some());
        assert!(service.take().is_none());
    }

    #[test]
    fn handle_waits_for_result() {
        let done = Arc::new(AtomicBool::new(false));
        let flag = done.clone();
        let body = ServiceFn::new(move || {
            thread::sleep(Duration::from_millis(20));
            flag.store(true, Ordering::SeqCst);
            Err::<(), _>(io::Error::other("stopped"))
        });

        let handle = ServiceHandle::spawn("test", body.take().unwrap()).unwrap();
        let error = handle.wait().unwrap_err();

        assert!(done.load(Ordering::SeqCst));
        assert!(handle.is_finished());
        assert!(error.is(ErrorKind::ServiceFunctionFailed));
        assert!(error.to_string().contains("stopped"));
        // Second wait replays the stored result
        assert!(handle.wait().is_err());
    }

    #[test]
    fn handle_reports_panics() {
        let body = ServiceFn::new::<_, ()>(|| panic!("service exploded"));
        let handle = ServiceHandle::spawn("panicking", body.take().unwrap()).unwrap();

        let error = handle.try_close().unwrap_err();
        assert!(error.to_string().contains("service exploded"));
    }
}
