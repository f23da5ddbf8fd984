//! Backend running actors directly on the engine run-loop.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{debug, warn};

use crate::core::{Actor, ActorFactory, Backend, ExecutionError, RunningWorker, SchedulerError};

use super::panic_message;

/// Runs every actor as a task on the engine's own runtime.
///
/// Cheap to start and stop; suited to I/O-bound actors and tests. A panicking
/// actor is caught and reported as a lost worker.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineBackend;

struct InlineWorker<A, R> {
    actor: Option<Box<dyn Actor<A, R>>>,
}

#[async_trait]
impl<A, R> RunningWorker<A, R> for InlineWorker<A, R>
where
    A: Send + 'static,
    R: Send + 'static,
{
    async fn execute(&mut self, argument: A) -> Result<R, ExecutionError> {
        let Some(actor) = self.actor.as_mut() else {
            return Err(ExecutionError::worker_lost("inline worker already stopped"));
        };
        match AssertUnwindSafe(actor.consume(argument)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                warn!(%reason, "inline actor panicked");
                self.actor = None;
                Err(ExecutionError::worker_lost(reason))
            }
        }
    }

    async fn stop(&mut self) {
        if self.actor.take().is_some() {
            debug!("inline worker stopped");
        }
    }
}

#[async_trait]
impl<A, R> Backend<A, R> for InlineBackend
where
    A: Send + 'static,
    R: Send + 'static,
{
    fn name(&self) -> &'static str {
        "inline"
    }

    async fn start_worker(
        &self,
        factory: Arc<dyn ActorFactory<A, R>>,
    ) -> Result<Box<dyn RunningWorker<A, R>>, SchedulerError> {
        let actor = factory.create()?;
        Ok(Box::new(InlineWorker { actor: Some(actor) }))
    }
}
