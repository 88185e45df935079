//! Task spawning abstraction for the long-lived pipeline workers.
//!
//! Core services spawn background work (the reader loop, the packager, the
//! scheduler, inference calls) through [`TaskSpawner`] rather than calling
//! `tokio::spawn` directly, so tests can drive workers on their own runtime
//! and embedders can supply a different executor.

use std::future::Future;

/// Abstraction for spawning background tasks.
///
/// Implementations must ensure spawned tasks keep running after the spawner
/// itself is dropped; workers are stopped cooperatively via cancellation
/// tokens, not by dropping handles.
pub trait TaskSpawner: Send + Sync {
    /// Spawns a future as a detached background task.
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static;
}

/// Tokio-based spawner used by the standalone server.
#[derive(Clone)]
pub struct TokioSpawner {
    handle: tokio::runtime::Handle,
}

impl TokioSpawner {
    /// Creates a spawner bound to the given runtime handle.
    #[must_use]
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Creates a spawner using the current runtime's handle.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime context.
    #[must_use]
    pub fn current() -> Self {
        Self {
            handle: tokio::runtime::Handle::current(),
        }
    }
}

impl TaskSpawner for TokioSpawner {
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(future);
    }
}
