//! Runtime context trait for streaming sessions.

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;

/// The clock and task spawner a session runs on.
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time` and `tokio::spawn`
///
/// Tests use the same `TokioContext` under a paused tokio clock, so every
/// duration below is virtual there.
#[async_trait]
pub trait StreamContext: Send + Sync + 'static {
    /// Returns the monotonic time since context creation.
    ///
    /// The session loop computes its tick deadlines from this value.
    fn now(&self) -> Duration;

    /// Suspends execution for the given duration.
    ///
    /// Must be cancel-safe: the session drops a pending sleep when it
    /// shuts down.
    async fn sleep(&self, duration: Duration);

    /// Spawns a background task and returns its handle.
    fn spawn<F>(&self, name: &str, future: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static;
}
