//! Task spawning abstraction.

use std::future::Future;
use std::pin::Pin;

/// A boxed, sendable future.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Schedules provisioning work to run concurrently with the caller.
///
/// # Implementations
///
/// - **Production**: `TokioSpawner` - one Tokio task per call
///
/// The harness spawns one task per container replica, so every replica of
/// every group in a world is created in parallel.
pub trait TaskSpawner: Send + Sync + 'static {
    /// Spawns a detached background task.
    ///
    /// `name` identifies the task in logs. The task must run to completion
    /// even if nobody is waiting for it.
    fn spawn(&self, name: &str, future: BoxFuture<()>);
}
