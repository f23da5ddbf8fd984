//! Backend giving every worker its own OS thread.
//!
//! Each thread builds a single-threaded tokio runtime and creates its actor
//! there, so CPU/GPU-bound actors never block the engine run-loop. Jobs travel
//! over a crossbeam channel; answers come back on a tokio oneshot.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use async_trait::async_trait;
use crossbeam_channel::{bounded, Receiver, Sender};
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use crate::core::{ActorFactory, Backend, ExecutionError, RunningWorker, SchedulerError};

/// Default worker thread stack size (2 MiB).
pub const DEFAULT_STACK_SIZE: usize = 2 * 1024 * 1024;

const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

struct Job<A, R> {
    argument: A,
    reply: oneshot::Sender<Result<R, ExecutionError>>,
}

/// One dedicated OS thread per worker.
#[derive(Debug)]
pub struct ThreadBackend {
    stack_size: usize,
    next_id: AtomicUsize,
}

impl Default for ThreadBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadBackend {
    /// Backend with the default stack size.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            stack_size: DEFAULT_STACK_SIZE,
            next_id: AtomicUsize::new(0),
        }
    }

    /// Set the stack size of worker threads.
    #[must_use]
    pub const fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = stack_size;
        self
    }
}

struct ThreadWorker<A, R> {
    id: usize,
    jobs: Option<Sender<Job<A, R>>>,
    thread: Option<JoinHandle<()>>,
}

fn worker_main<A, R>(
    worker_id: usize,
    factory: Arc<dyn ActorFactory<A, R>>,
    jobs: Receiver<Job<A, R>>,
    ready: oneshot::Sender<Result<(), SchedulerError>>,
) where
    A: Send + 'static,
    R: Send + 'static,
{
    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(worker_id, error = %e, "failed to create worker runtime");
            let _ = ready.send(Err(SchedulerError::Backend(format!(
                "worker {worker_id} runtime: {e}"
            ))));
            return;
        }
    };
    let mut actor = match factory.create() {
        Ok(actor) => actor,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    if ready.send(Ok(())).is_err() {
        return;
    }
    debug!(worker_id, "worker thread started");

    // Blocks until a job arrives; exits once the sender is dropped.
    while let Ok(job) = jobs.recv() {
        let outcome = rt.block_on(actor.consume(job.argument));
        if job.reply.send(outcome).is_err() {
            debug!(worker_id, "task result receiver dropped");
        }
    }
    debug!(worker_id, "worker channel closed, exiting");
}

#[async_trait]
impl<A, R> RunningWorker<A, R> for ThreadWorker<A, R>
where
    A: Send + 'static,
    R: Send + 'static,
{
    async fn execute(&mut self, argument: A) -> Result<R, ExecutionError> {
        let Some(jobs) = self.jobs.as_ref() else {
            return Err(ExecutionError::worker_lost(format!(
                "worker {} already stopped",
                self.id
            )));
        };
        let (reply, answer) = oneshot::channel();
        // At most one job is outstanding, so the slot is free unless the thread died.
        jobs.try_send(Job { argument, reply }).map_err(|_| {
            ExecutionError::worker_lost(format!("worker {} thread is gone", self.id))
        })?;
        answer.await.map_err(|_| {
            ExecutionError::worker_lost(format!("worker {} died while running a task", self.id))
        })?
    }

    async fn stop(&mut self) {
        self.jobs.take();
        let Some(thread) = self.thread.take() else {
            return;
        };
        let worker_id = self.id;
        match tokio::time::timeout(JOIN_TIMEOUT, tokio::task::spawn_blocking(move || thread.join()))
            .await
        {
            Ok(Ok(Ok(()))) => debug!(worker_id, "worker joined"),
            Ok(Ok(Err(_))) => warn!(worker_id, "worker thread panicked"),
            Ok(Err(e)) => warn!(worker_id, error = %e, "worker join task failed"),
            Err(_) => warn!(worker_id, "worker did not exit within timeout, detaching"),
        }
    }
}

impl<A, R> Drop for ThreadWorker<A, R> {
    fn drop(&mut self) {
        if self.thread.is_some() {
            debug!(worker_id = self.id, "worker dropped without stop, detaching thread");
        }
    }
}

#[async_trait]
impl<A, R> Backend<A, R> for ThreadBackend
where
    A: Send + 'static,
    R: Send + 'static,
{
    fn name(&self) -> &'static str {
        "threads"
    }

    async fn start_worker(
        &self,
        factory: Arc<dyn ActorFactory<A, R>>,
    ) -> Result<Box<dyn RunningWorker<A, R>>, SchedulerError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (job_tx, job_rx) = bounded(1);
        let (ready_tx, ready_rx) = oneshot::channel();

        let thread = thread::Builder::new()
            .name(format!("capsched-worker-{id}"))
            .stack_size(self.stack_size)
            .spawn(move || worker_main(id, factory, job_rx, ready_tx))
            .map_err(|e| SchedulerError::Backend(format!("failed to spawn worker {id}: {e}")))?;

        match ready_rx.await {
            Ok(Ok(())) => Ok(Box::new(ThreadWorker {
                id,
                jobs: Some(job_tx),
                thread: Some(thread),
            })),
            Ok(Err(e)) => {
                let _ = tokio::task::spawn_blocking(move || thread.join()).await;
                Err(e)
            }
            Err(_) => Err(SchedulerError::Backend(format!(
                "worker {id} exited during startup"
            ))),
        }
    }
}
