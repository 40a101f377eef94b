use std::future::Future;

use tokio_util::sync::CancellationToken;

/// Cancellable signal owned by the container and by every factory.
///
/// Each factory gets a child of the container lifetime, cancelled at that factory's
/// turn during close. Inject it as a factory parameter to learn when to shut down.
#[derive(Clone, Default)]
pub struct Lifetime(CancellationToken);
impl std::fmt::Debug for Lifetime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lifetime")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl Lifetime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a lifetime which is cancelled together with this one, but can be cancelled on its own
    pub fn child(&self) -> Lifetime {
        Lifetime(self.0.child_token())
    }

    /// Cancels this lifetime and all of its children. Calling it twice does nothing.
    pub fn cancel(&self) {
        self.0.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }

    /// Resolves once the lifetime is cancelled
    pub fn cancelled(&self) -> impl Future<Output = ()> + Send + 'static {
        self.0.clone().cancelled_owned()
    }

    /// Blocks the current thread until the lifetime is cancelled
    pub fn wait(&self) {
        futures::executor::block_on(self.0.cancelled())
    }

    /// The underlying token, for code running on an async runtime
    pub fn token(&self) -> &CancellationToken {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use std::{thread, time::Duration};

    use super::*;

    #[test]
    fn cancel_is_idempotent() {
        let lifetime = Lifetime::new();
        assert!(!lifetime.is_cancelled());
        lifetime.cancel();
        lifetime.cancel();
        assert!(lifetime.is_cancelled());
    }

    #[test]
    fn cancel_cascades_to_children_only() {
        let parent = Lifetime::new();
        let first = parent.child();
        let second = parent.child();

        first.cancel();
        assert!(first.is_cancelled());
        assert!(!parent.is_cancelled());
        assert!(!second.is_cancelled());

        parent.cancel();
        assert!(second.is_cancelled());
        assert!(parent.child().is_cancelled());
    }

    #[test]
    fn wait_returns_after_cancel_from_other_thread() {
        let lifetime = Lifetime::new();
        let remote = lifetime.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            remote.cancel();
        });

        lifetime.wait();
        assert!(lifetime.is_cancelled());
        handle.join().unwrap();
    }

    #[test]
    fn cancelled_future_is_ready_when_already_cancelled() {
        let lifetime = Lifetime::new();
        lifetime.cancel();
        futures::executor::block_on(lifetime.cancelled());
    }

    #[test]
    fn cancelled_future_outlives_the_lifetime_handle() {
        let lifetime = Lifetime::new();
        let cancelled = lifetime.cancelled();
        let remote = lifetime.clone();
        drop(lifetime);

        remote.cancel();
        futures::executor::block_on(cancelled);
    }
}
