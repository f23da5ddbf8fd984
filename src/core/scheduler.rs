//! Public scheduler facade.
//!
//! The [`Scheduler`] owns the engine handle, the shared result channel and the
//! resource exchange. Every method is blocking and callable from any thread;
//! draining (`drain`, `process`, `join`) is serialized internally.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, error, warn};

use crate::config::BackendKind;
use crate::infra::select_backend;
use crate::runtime::engine::EngineHandle;
use crate::util::telemetry::lifecycle;

use super::{
    ActorFactory, Backend, CapabilitySet, CapsetExchange, ResourceExchange, ResourceLimits,
    SchedulerError, Task, TaskResult,
};

/// Default wait before a silent drain checks for stalled work.
pub const DEFAULT_STALL_CHECK: Duration = Duration::from_millis(500);

/// Actor factory per provisioned capability set.
pub type Blueprint<A, R> = BTreeMap<CapabilitySet, Arc<dyn ActorFactory<A, R>>>;

/// Point-in-time view of queues and workers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStatus {
    /// Unclaimed tasks per queue key.
    pub queued: BTreeMap<CapabilitySet, usize>,
    /// Tasks currently being executed.
    pub in_flight: usize,
    /// Running workers per actor set.
    pub running: BTreeMap<CapabilitySet, usize>,
}

impl SchedulerStatus {
    /// Unclaimed tasks across all queues.
    #[must_use]
    pub fn queued_total(&self) -> usize {
        self.queued.values().sum()
    }

    /// Tasks not yet turned into a result: queued plus in flight.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queued_total() + self.in_flight
    }

    /// Running workers across all actor sets.
    #[must_use]
    pub fn running_total(&self) -> usize {
        self.running.values().sum()
    }

    /// Backlog of one queue (0 if it does not exist).
    #[must_use]
    pub fn queue_size(&self, key: &CapabilitySet) -> usize {
        self.queued.get(key).copied().unwrap_or(0)
    }

    /// Nothing queued and nothing in flight.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.pending() == 0
    }
}

/// Capability-aware worker-pool scheduler.
///
/// ```rust,ignore
/// let mut blueprint: Blueprint<Job, Output> = BTreeMap::new();
/// blueprint.insert(CapabilitySet::of(["gpu", "cpu"]), Arc::new(|| GpuActor::default()));
///
/// let scheduler = Scheduler::new(
///     blueprint,
///     ResourceLimits::new().with_limit("gpu", 1.0),
///     BackendKind::Threads,
///     false,
/// )?;
/// scheduler.submit(jobs.into_iter().map(|j| Task::new(j).requires(CapabilitySet::of(["gpu"]))))?;
/// for result in scheduler.drain(0)? {
///     println!("{:?}", result?.outcome);
/// }
/// scheduler.join()?;
/// ```
pub struct Scheduler<A, R>
where
    A: Clone + Send + 'static,
    R: Send + 'static,
{
    engine: EngineHandle<A>,
    results: Receiver<TaskResult<R>>,
    exchange: Mutex<Box<dyn ResourceExchange>>,
    backend: Arc<dyn Backend<A, R>>,
    actor_capsets: Vec<CapabilitySet>,
    serial: Mutex<()>,
    stopped: AtomicBool,
    verbose: bool,
    stall_check: Duration,
}

impl<A, R> Scheduler<A, R>
where
    A: Clone + Send + 'static,
    R: Send + 'static,
{
    /// Build a scheduler with the built-in exchange and backend `kind`.
    ///
    /// # Errors
    ///
    /// Fails with [`SchedulerError::InvalidConfig`] on an empty blueprint or
    /// invalid limits, before any thread is started.
    pub fn new(
        blueprint: Blueprint<A, R>,
        limits: ResourceLimits,
        kind: BackendKind,
        verbose: bool,
    ) -> Result<Self, SchedulerError> {
        Self::with_backend(blueprint, limits, select_backend(kind), verbose)
    }

    /// Build a scheduler on a custom backend.
    ///
    /// # Errors
    ///
    /// Same as [`Scheduler::new`].
    pub fn with_backend(
        blueprint: Blueprint<A, R>,
        limits: ResourceLimits,
        backend: Arc<dyn Backend<A, R>>,
        verbose: bool,
    ) -> Result<Self, SchedulerError> {
        limits.validate().map_err(SchedulerError::InvalidConfig)?;
        let exchange = CapsetExchange::new(blueprint.keys().cloned(), limits);
        Self::with_exchange(blueprint, Box::new(exchange), backend, verbose)
    }

    /// Build a scheduler on a custom exchange and backend.
    ///
    /// # Errors
    ///
    /// Fails on an empty blueprint, or if the engine thread cannot start.
    pub fn with_exchange(
        blueprint: Blueprint<A, R>,
        exchange: Box<dyn ResourceExchange>,
        backend: Arc<dyn Backend<A, R>>,
        verbose: bool,
    ) -> Result<Self, SchedulerError> {
        if blueprint.is_empty() {
            return Err(SchedulerError::InvalidConfig(
                "blueprint must provision at least one capability set".to_string(),
            ));
        }
        let actor_capsets: Vec<_> = blueprint.keys().cloned().collect();
        let (results_tx, results_rx) = crossbeam_channel::unbounded();
        let engine = EngineHandle::spawn(blueprint, Arc::clone(&backend), results_tx, verbose)?;

        lifecycle!(
            verbose,
            actor_sets = actor_capsets.len(),
            backend = backend.name(),
            "scheduler started"
        );
        Ok(Self {
            engine,
            results: results_rx,
            exchange: Mutex::new(exchange),
            backend,
            actor_capsets,
            serial: Mutex::new(()),
            stopped: AtomicBool::new(false),
            verbose,
            stall_check: DEFAULT_STALL_CHECK,
        })
    }

    /// Override how long a drain waits in silence before checking for stalls.
    #[must_use]
    pub fn with_stall_check(mut self, stall_check: Duration) -> Self {
        self.stall_check = stall_check;
        self
    }

    /// Capability sets this scheduler provisions workers for.
    #[must_use]
    pub fn actor_capsets(&self) -> &[CapabilitySet] {
        &self.actor_capsets
    }

    /// Enqueue tasks and rebalance if anything is queued.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::NotEnoughResources`] if the backlog cannot be served
    /// (the scheduler is torn down), or any resize error.
    pub fn submit(&self, tasks: impl IntoIterator<Item = Task<A>>) -> Result<(), SchedulerError> {
        self.enqueue(tasks.into_iter().collect())
    }

    fn enqueue(&self, tasks: Vec<Task<A>>) -> Result<(), SchedulerError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(SchedulerError::EngineStopped);
        }
        let submitted = tasks.len();
        let queued = self.engine.submit(tasks)?;
        debug!(submitted, queued, "submission accepted");
        if queued > 0 {
            self.reorganize()?;
        }
        Ok(())
    }

    /// Lazily yield results until at most `target` tasks remain pending.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::DrainInProgress`] if another drain is active.
    pub fn drain(&self, target: usize) -> Result<Drain<'_, A, R>, SchedulerError> {
        let guard = self.serial.try_lock().ok_or(SchedulerError::DrainInProgress)?;
        Ok(Drain {
            scheduler: self,
            _guard: guard,
            cursor: DrainCursor::new(target),
        })
    }

    /// Backpressured produce/submit/drain loop.
    ///
    /// `producer` is only called again once at most `min_queue_size` tasks
    /// are pending. An empty batch flushes everything; an empty batch while
    /// idle ends the loop after a final rebalance.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::DrainInProgress`] if another drain is active.
    pub fn process<F>(
        &self,
        producer: F,
        min_queue_size: usize,
    ) -> Result<Process<'_, A, R, F>, SchedulerError>
    where
        F: FnMut() -> Vec<Task<A>>,
    {
        let guard = self.serial.try_lock().ok_or(SchedulerError::DrainInProgress)?;
        Ok(Process {
            scheduler: self,
            _guard: guard,
            producer,
            min_queue_size,
            cursor: None,
            done: false,
        })
    }

    /// Drain everything, stop every worker and shut the backend down.
    ///
    /// A second call returns an empty vector.
    ///
    /// # Errors
    ///
    /// Any error raised while draining; the scheduler is torn down regardless.
    pub fn join(&self) -> Result<Vec<TaskResult<R>>, SchedulerError> {
        let _guard = self.serial.try_lock().ok_or(SchedulerError::DrainInProgress)?;
        if self.stopped.load(Ordering::Acquire) {
            return Ok(Vec::new());
        }

        let mut cursor = DrainCursor::new(0);
        let mut results = Vec::new();
        while let Some(item) = cursor.advance(self) {
            match item {
                Ok(result) => results.push(result),
                Err(err) => {
                    self.teardown(false);
                    return Err(err);
                }
            }
        }
        self.teardown(false);
        results.extend(self.results.try_iter());
        Ok(results)
    }

    /// Snapshot of queues and workers.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::EngineStopped`] after teardown.
    pub fn status(&self) -> Result<SchedulerStatus, SchedulerError> {
        self.engine.status()
    }

    /// Unclaimed tasks across all queues.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::EngineStopped`] after teardown.
    pub fn queued_task_count(&self) -> Result<usize, SchedulerError> {
        Ok(self.status()?.queued_total())
    }

    /// Running workers across all actor sets.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::EngineStopped`] after teardown.
    pub fn running_worker_count(&self) -> Result<usize, SchedulerError> {
        Ok(self.status()?.running_total())
    }

    /// Nothing queued and nothing in flight.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::EngineStopped`] after teardown.
    pub fn is_idle(&self) -> Result<bool, SchedulerError> {
        Ok(self.status()?.is_idle())
    }

    /// No task is waiting in any queue.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::EngineStopped`] after teardown.
    pub fn is_empty(&self) -> Result<bool, SchedulerError> {
        Ok(self.status()?.queued_total() == 0)
    }

    fn reorganize(&self) -> Result<(), SchedulerError> {
        let status = self.engine.status()?;
        let (ideals, idle) = {
            let mut exchange = self.exchange.lock();
            let ideals = exchange.set_values(&status.queued);
            (ideals, exchange.is_idle())
        };
        lifecycle!(
            self.verbose,
            need = ?status.queued,
            from = ?status.running,
            to = ?ideals,
            queued = status.queued_total(),
            working = status.in_flight,
            "reorganizing"
        );
        self.engine.resize(ideals)?;

        let remaining = status.queued_total();
        if remaining > 0 && idle {
            error!(remaining, "not enough resources to continue");
            self.teardown(false);
            return Err(SchedulerError::NotEnoughResources { remaining });
        }
        Ok(())
    }

    fn teardown(&self, discard_backlog: bool) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.engine.shutdown(discard_backlog);
        self.backend.join();
        lifecycle!(self.verbose, backend = self.backend.name(), "scheduler stopped");
    }
}

impl<A, R> Drop for Scheduler<A, R>
where
    A: Clone + Send + 'static,
    R: Send + 'static,
{
    fn drop(&mut self) {
        if !self.stopped.load(Ordering::Acquire) {
            debug!("scheduler dropped without join, discarding backlog");
        }
        self.teardown(true);
    }
}

/// Shared state of one drain-to-target pass.
struct DrainCursor {
    target: usize,
    finished: bool,
    deferred: Option<SchedulerError>,
}

impl DrainCursor {
    const fn new(target: usize) -> Self {
        Self {
            target,
            finished: false,
            deferred: None,
        }
    }

    fn fail<R>(&mut self, err: SchedulerError) -> Option<Result<TaskResult<R>, SchedulerError>> {
        self.finished = true;
        Some(Err(err))
    }

    fn advance<A, R>(
        &mut self,
        scheduler: &Scheduler<A, R>,
    ) -> Option<Result<TaskResult<R>, SchedulerError>>
    where
        A: Clone + Send + 'static,
        R: Send + 'static,
    {
        if self.finished {
            return None;
        }
        if let Some(err) = self.deferred.take() {
            return self.fail(err);
        }

        let result = loop {
            let status = match scheduler.engine.status() {
                Ok(status) => status,
                Err(err) => return self.fail(err),
            };
            if status.pending() <= self.target {
                if let Ok(result) = scheduler.results.try_recv() {
                    break result;
                }
                self.finished = true;
                return None;
            }
            match scheduler.results.recv_timeout(scheduler.stall_check) {
                Ok(result) => break result,
                Err(RecvTimeoutError::Timeout) => {
                    if let Err(err) = self.check_stall(scheduler) {
                        return self.fail(err);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return self.fail(SchedulerError::EngineStopped)
                }
            }
        };

        // Demand shape changed: this queue is done but others still wait.
        match scheduler.engine.status() {
            Ok(after) if after.queue_size(&result.source) == 0 && after.queued_total() > 0 => {
                if let Err(err) = scheduler.reorganize() {
                    self.deferred = Some(err);
                }
            }
            Ok(_) => {}
            Err(err) => self.deferred = Some(err),
        }
        Some(Ok(result))
    }

    fn check_stall<A, R>(&self, scheduler: &Scheduler<A, R>) -> Result<(), SchedulerError>
    where
        A: Clone + Send + 'static,
        R: Send + 'static,
    {
        let status = scheduler.engine.status()?;
        if status.queued_total() > 0 && status.running_total() == 0 {
            warn!(
                queued = status.queued_total(),
                target = self.target,
                "backlog with no running workers, forcing a rebalance"
            );
            scheduler.reorganize()?;
        }
        Ok(())
    }
}

/// Iterator returned by [`Scheduler::drain`].
pub struct Drain<'a, A, R>
where
    A: Clone + Send + 'static,
    R: Send + 'static,
{
    scheduler: &'a Scheduler<A, R>,
    _guard: MutexGuard<'a, ()>,
    cursor: DrainCursor,
}

impl<A, R> Iterator for Drain<'_, A, R>
where
    A: Clone + Send + 'static,
    R: Send + 'static,
{
    type Item = Result<TaskResult<R>, SchedulerError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.cursor.advance(self.scheduler)
    }
}

impl<A, R> std::iter::FusedIterator for Drain<'_, A, R>
where
    A: Clone + Send + 'static,
    R: Send + 'static,
{
}

/// Iterator returned by [`Scheduler::process`].
pub struct Process<'a, A, R, F>
where
    A: Clone + Send + 'static,
    R: Send + 'static,
{
    scheduler: &'a Scheduler<A, R>,
    _guard: MutexGuard<'a, ()>,
    producer: F,
    min_queue_size: usize,
    cursor: Option<DrainCursor>,
    done: bool,
}

impl<A, R, F> Process<'_, A, R, F>
where
    A: Clone + Send + 'static,
    R: Send + 'static,
    F: FnMut() -> Vec<Task<A>>,
{
    fn stop_with(&mut self, err: SchedulerError) -> Option<Result<TaskResult<R>, SchedulerError>> {
        self.done = true;
        Some(Err(err))
    }
}

impl<A, R, F> Iterator for Process<'_, A, R, F>
where
    A: Clone + Send + 'static,
    R: Send + 'static,
    F: FnMut() -> Vec<Task<A>>,
{
    type Item = Result<TaskResult<R>, SchedulerError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            if let Some(cursor) = self.cursor.as_mut() {
                match cursor.advance(self.scheduler) {
                    Some(Ok(result)) => return Some(Ok(result)),
                    Some(Err(err)) => return self.stop_with(err),
                    None => self.cursor = None,
                }
                continue;
            }

            let batch = (self.producer)();
            let status = match self.scheduler.status() {
                Ok(status) => status,
                Err(err) => return self.stop_with(err),
            };
            let scheduler = self.scheduler;
            if batch.is_empty() && status.is_idle() && scheduler.results.is_empty() {
                lifecycle!(scheduler.verbose, "empty batch while idle, finishing");
                self.done = true;
                return scheduler.reorganize().err().map(Err);
            }

            let target = if batch.is_empty() {
                lifecycle!(scheduler.verbose, pending = status.pending(), "empty batch");
                0
            } else {
                lifecycle!(scheduler.verbose, size = batch.len(), pending = status.pending(), "new batch");
                if let Err(err) = scheduler.enqueue(batch) {
                    return self.stop_with(err);
                }
                self.min_queue_size
            };
            self.cursor = Some(DrainCursor::new(target));
        }
    }
}

impl<A, R, F> std::iter::FusedIterator for Process<'_, A, R, F>
where
    A: Clone + Send + 'static,
    R: Send + 'static,
    F: FnMut() -> Vec<Task<A>>,
{
}
