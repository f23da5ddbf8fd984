//! Worker-side traits: what user code implements.

use async_trait::async_trait;

use super::{ExecutionError, SchedulerError};

/// A provisioned worker that consumes task arguments.
///
/// One actor instance is created per running worker and lives until that
/// worker is torn down, so it may hold expensive state (a loaded model, a
/// database connection) across tasks.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use prometheus_capability_scheduler::core::{Actor, ExecutionError};
///
/// struct Embedder { model: Model }
///
/// #[async_trait]
/// impl Actor<String, Vec<f32>> for Embedder {
///     async fn consume(&mut self, text: String) -> Result<Vec<f32>, ExecutionError> {
///         self.model.embed(&text).map_err(|e| ExecutionError::fail(e.to_string()))
///     }
/// }
/// ```
#[async_trait]
pub trait Actor<A, R>: Send + 'static
where
    A: Send + 'static,
    R: Send + 'static,
{
    /// Execute one task argument.
    ///
    /// Return [`ExecutionError::Fail`] for failures worth retrying,
    /// [`ExecutionError::Fatal`] to fail the task at once.
    async fn consume(&mut self, argument: A) -> Result<R, ExecutionError>;
}

/// Creates actors for one actor set.
///
/// Any `Fn() -> impl Actor` closure is a factory.
pub trait ActorFactory<A, R>: Send + Sync + 'static
where
    A: Send + 'static,
    R: Send + 'static,
{
    /// Build a fresh actor instance.
    ///
    /// # Errors
    ///
    /// Returns an error if the actor cannot be provisioned; the resize that
    /// requested it fails with that error.
    fn create(&self) -> Result<Box<dyn Actor<A, R>>, SchedulerError>;
}

impl<A, R, F, T> ActorFactory<A, R> for F
where
    A: Send + 'static,
    R: Send + 'static,
    F: Fn() -> T + Send + Sync + 'static,
    T: Actor<A, R>,
{
    fn create(&self) -> Result<Box<dyn Actor<A, R>>, SchedulerError> {
        Ok(Box::new(self()))
    }
}
