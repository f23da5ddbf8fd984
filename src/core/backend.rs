//! Execution backend contracts.
//!
//! A [`Backend`] decides *where* actors run (on the run-loop, on dedicated
//! threads, on a remote cluster). The scheduler only ever talks to it through
//! these traits.

use std::sync::Arc;

use async_trait::async_trait;

use super::{ActorFactory, ExecutionError, SchedulerError, TaskFailure};

/// Handle to one started worker.
#[async_trait]
pub trait RunningWorker<A, R>: Send
where
    A: Send + 'static,
    R: Send + 'static,
{
    /// Run one task argument on this worker.
    async fn execute(&mut self, argument: A) -> Result<R, ExecutionError>;

    /// Tear the worker down. Called exactly once, after the last `execute`.
    async fn stop(&mut self);
}

/// Pluggable execution backend.
#[async_trait]
pub trait Backend<A, R>: Send + Sync + 'static
where
    A: Send + 'static,
    R: Send + 'static,
{
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Start a worker running an actor built by `factory`.
    ///
    /// # Errors
    ///
    /// Returns an error when the actor or its execution context cannot be created.
    async fn start_worker(
        &self,
        factory: Arc<dyn ActorFactory<A, R>>,
    ) -> Result<Box<dyn RunningWorker<A, R>>, SchedulerError>;

    /// Whether `error` should count as a retryable attempt.
    fn is_transient(&self, error: &ExecutionError) -> bool {
        error.is_retryable()
    }

    /// Translate a raw execution error into a portable failure payload.
    fn parse_failure(&self, error: &ExecutionError, attempts: u32) -> TaskFailure {
        TaskFailure::from_error(error, attempts)
    }

    /// Full backend shutdown, called once after every worker has stopped.
    fn join(&self) {}
}
