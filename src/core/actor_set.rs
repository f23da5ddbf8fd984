//! Homogeneous worker pool for one capability set.
//!
//! Every running worker is driven by a *listener*: a task on the run-loop that
//! waits for work on all eligible queues, hands it to the backend and turns
//! the outcome into a result or a requeue.
//!
//! Worker lifecycle:
//!
//! ```text
//! absent ─grow─► starting ─handle─► listening ─task─► processing ─┐
//!                   ▲                   ▲  │                       │
//!                   │                   └──┼───── done / retry ────┘
//!                   │   worker lost        │ poison pill
//!                   └────────────────── draining ─► stopped ─► absent
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_channel::Sender;
use futures::future::{join_all, select_all};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::util::telemetry::lifecycle;

use super::{
    ActorFactory, Backend, CapabilitySet, ExecutionError, RunningWorker, SchedulerError, Task,
    TaskQueue, TaskResult,
};

/// Every task queue known to the scheduler, keyed by requirement set.
pub(crate) type QueueMap<A> = RwLock<BTreeMap<CapabilitySet, Arc<TaskQueue<Task<A>>>>>;

/// Tells exactly one listener to shut down.
pub(crate) struct PoisonPill;

enum Next<A> {
    Task(Task<A>, Arc<TaskQueue<Task<A>>>),
    Poison,
    Cancelled,
}

/// State shared between the actor set and its listeners.
struct Shared<A, R> {
    provision: CapabilitySet,
    factory: Arc<dyn ActorFactory<A, R>>,
    backend: Arc<dyn Backend<A, R>>,
    queues: Arc<QueueMap<A>>,
    results: Sender<TaskResult<R>>,
    poison: TaskQueue<PoisonPill>,
    listeners: Mutex<HashMap<String, JoinHandle<()>>>,
    in_flight: AtomicUsize,
    teardowns: mpsc::UnboundedSender<String>,
    verbose: bool,
}

/// Pool of workers provisioned with one capability set.
pub(crate) struct ActorSet<A, R> {
    shared: Arc<Shared<A, R>>,
    teardowns: mpsc::UnboundedReceiver<String>,
}

impl<A, R> ActorSet<A, R>
where
    A: Clone + Send + 'static,
    R: Send + 'static,
{
    /// Create an empty actor set. No worker runs until the first resize.
    pub(crate) fn new(
        provision: CapabilitySet,
        factory: Arc<dyn ActorFactory<A, R>>,
        backend: Arc<dyn Backend<A, R>>,
        queues: Arc<QueueMap<A>>,
        results: Sender<TaskResult<R>>,
        verbose: bool,
    ) -> Self {
        let (teardown_tx, teardown_rx) = mpsc::unbounded_channel();
        let poison = TaskQueue::new(CapabilitySet::empty());
        Self {
            shared: Arc::new(Shared {
                provision,
                factory,
                backend,
                queues,
                results,
                poison,
                listeners: Mutex::new(HashMap::new()),
                in_flight: AtomicUsize::new(0),
                teardowns: teardown_tx,
                verbose,
            }),
            teardowns: teardown_rx,
        }
    }

    pub(crate) fn provision(&self) -> &CapabilitySet {
        &self.shared.provision
    }

    pub(crate) fn running_count(&self) -> usize {
        self.shared.listeners.lock().len()
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::Acquire)
    }

    /// Wake this set's listeners so they rebuild their wait-set.
    pub(crate) fn notify_topology_change(&self) {
        self.shared.poison.reset();
    }

    /// Grow or shrink to `target` running workers.
    ///
    /// Shrinking is strictly sequential: one poison pill at a time, each
    /// confirmed by the listener's teardown before the next is sent.
    /// Growth starts all new workers concurrently; the first start error is
    /// returned once every start has settled.
    pub(crate) async fn set_running_count(&mut self, target: usize) -> Result<(), SchedulerError> {
        let current = self.running_count();
        lifecycle!(
            self.shared.verbose,
            capset = %self.shared.provision,
            from = current,
            to = target,
            "setting running actor count"
        );
        if target < current {
            self.drain_to(target).await
        } else if target > current {
            self.grow_by(target - current).await
        } else {
            Ok(())
        }
    }

    async fn drain_to(&mut self, target: usize) -> Result<(), SchedulerError> {
        // Teardowns reported outside of a drain are stale by now.
        while self.teardowns.try_recv().is_ok() {}

        let mut poisoned = 0usize;
        while self.running_count() > target {
            if self.shared.poison.is_empty() {
                self.shared.poison.put(PoisonPill);
                poisoned += 1;
            }
            match self.teardowns.recv().await {
                Some(name) => debug!(capset = %self.shared.provision, listener = %name, "teardown confirmed"),
                None => return Err(SchedulerError::EngineStopped),
            }
        }
        // A listener that died on its own may have left our last pill unclaimed.
        self.shared.poison.clear();
        debug!(capset = %self.shared.provision, poisoned, "drained actor set");
        Ok(())
    }

    async fn grow_by(&self, count: usize) -> Result<(), SchedulerError> {
        let starts = (0..count).map(|_| {
            self.shared
                .backend
                .start_worker(Arc::clone(&self.shared.factory))
        });
        let mut first_error = None;
        for outcome in join_all(starts).await {
            match outcome {
                Ok(worker) => Arc::clone(&self.shared).spawn_listener(worker),
                Err(err) => {
                    error!(capset = %self.shared.provision, error = %err, "failed to start worker");
                    if first_error.is_none() {
                        first_error = Some(SchedulerError::WorkerStart {
                            capset: self.shared.provision.clone(),
                            reason: err.to_string(),
                        });
                    }
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Cancel the poison queue and abort every listener. Used for full teardown.
    pub(crate) fn abort_all(&self) {
        self.shared.poison.cancel();
        let listeners: Vec<_> = self.shared.listeners.lock().drain().collect();
        for (name, handle) in listeners {
            debug!(capset = %self.shared.provision, listener = %name, "aborting listener");
            handle.abort();
        }
    }
}

impl<A, R> Shared<A, R>
where
    A: Clone + Send + 'static,
    R: Send + 'static,
{
    fn spawn_listener(self: Arc<Self>, worker: Box<dyn RunningWorker<A, R>>) {
        let name = Uuid::new_v4().simple().to_string();
        lifecycle!(
            self.verbose,
            capset = %self.provision,
            listener = %name,
            backend = self.backend.name(),
            "adding consumer"
        );
        // Registration happens under the lock so the listener cannot retire first.
        let mut listeners = self.listeners.lock();
        let handle = tokio::spawn(Arc::clone(&self).listen(name.clone(), worker));
        listeners.insert(name, handle);
    }

    async fn listen(self: Arc<Self>, name: String, mut worker: Box<dyn RunningWorker<A, R>>) {
        debug!(capset = %self.provision, listener = %name, "consumer listening");
        let deliberate = loop {
            let (task, source) = match self.next_task().await {
                Next::Task(task, source) => (task, source),
                Next::Poison => break true,
                Next::Cancelled => break false,
            };

            self.in_flight.fetch_add(1, Ordering::AcqRel);
            let lost = self.process_task(worker.as_mut(), task, &source).await;
            self.in_flight.fetch_sub(1, Ordering::AcqRel);

            if let Some(reason) = lost {
                warn!(capset = %self.provision, listener = %name, %reason, "stopping consumer");
                worker.stop().await;
                match self.backend.start_worker(Arc::clone(&self.factory)).await {
                    Ok(fresh) => {
                        lifecycle!(self.verbose, capset = %self.provision, listener = %name, "restarting consumer");
                        worker = fresh;
                    }
                    Err(err) => {
                        error!(capset = %self.provision, listener = %name, error = %err, "consumer restart failed");
                        self.retire(&name);
                        return;
                    }
                }
            }
        };

        lifecycle!(
            self.verbose,
            capset = %self.provision,
            listener = %name,
            poisoned = deliberate,
            "stopping consumer"
        );
        worker.stop().await;
        self.retire(&name);
    }

    fn retire(&self, name: &str) {
        self.listeners.lock().remove(name);
        let _ = self.teardowns.send(name.to_string());
    }

    /// Queues this set may serve, most specific first.
    fn eligible_queues(&self) -> Vec<Arc<TaskQueue<Task<A>>>> {
        self.queues
            .read()
            .iter()
            .rev()
            .filter(|(key, _)| self.provision.satisfies(key))
            .map(|(_, queue)| Arc::clone(queue))
            .collect()
    }

    async fn next_task(&self) -> Next<A> {
        loop {
            let queues = self.eligible_queues();

            // Register before looking, so a put between look and wait is not missed.
            let mut signals = Vec::with_capacity(queues.len() * 2 + 2);
            for queue in &queues {
                signals.push(Box::pin(queue.ready()));
                signals.push(Box::pin(queue.topology_changed()));
            }
            signals.push(Box::pin(self.poison.ready()));
            signals.push(Box::pin(self.poison.topology_changed()));

            if self.poison.is_cancelled() {
                return Next::Cancelled;
            }
            for queue in &queues {
                if let Some(task) = queue.pop() {
                    return Next::Task(task, Arc::clone(queue));
                }
            }
            if self.poison.pop().is_some() {
                return Next::Poison;
            }

            select_all(signals).await;
        }
    }

    /// Run one task. Returns the reason if the worker was lost mid-task.
    async fn process_task(
        &self,
        worker: &mut dyn RunningWorker<A, R>,
        mut task: Task<A>,
        source: &TaskQueue<Task<A>>,
    ) -> Option<String> {
        debug!(capset = %self.provision, task_id = %task.id(), queue = %source.key(), "processing task");
        match worker.execute(task.argument.clone()).await {
            Ok(value) => {
                self.emit(TaskResult::ok(value, source.key().clone()));
                None
            }
            Err(ExecutionError::WorkerLost { reason }) => {
                source.put(task);
                Some(reason)
            }
            Err(err) if self.backend.is_transient(&err) => {
                warn!(
                    capset = %self.provision,
                    task_id = %task.id(),
                    error = %err,
                    attempt = task.attempt_count() + 1,
                    "remote consumption error"
                );
                if task.record_failure() {
                    let failure = self.backend.parse_failure(&err, task.attempt_count());
                    self.emit(TaskResult::failed(failure, source.key().clone()));
                } else {
                    source.put(task);
                }
                None
            }
            Err(err) => {
                warn!(capset = %self.provision, task_id = %task.id(), error = %err, "task failed fatally");
                let failure = self.backend.parse_failure(&err, task.attempt_count());
                self.emit(TaskResult::failed(failure, source.key().clone()));
                None
            }
        }
    }

    fn emit(&self, result: TaskResult<R>) {
        if self.results.send(result).is_err() {
            debug!(capset = %self.provision, "result receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Actor, ActorFactory};
    use crate::infra::InlineBackend;
    use async_trait::async_trait;
    use std::time::Duration;

    struct Doubler;

    #[async_trait]
    impl Actor<u32, u32> for Doubler {
        async fn consume(&mut self, argument: u32) -> Result<u32, ExecutionError> {
            tokio::task::yield_now().await;
            Ok(argument * 2)
        }
    }

    fn make_set(
        provision: CapabilitySet,
        queues: &Arc<QueueMap<u32>>,
    ) -> (ActorSet<u32, u32>, crossbeam_channel::Receiver<TaskResult<u32>>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let factory: Arc<dyn ActorFactory<u32, u32>> = Arc::new(|| Doubler);
        let set = ActorSet::new(
            provision,
            factory,
            Arc::new(InlineBackend),
            Arc::clone(queues),
            tx,
            false,
        );
        (set, rx)
    }

    fn add_queue(queues: &QueueMap<u32>, key: CapabilitySet) -> Arc<TaskQueue<Task<u32>>> {
        let queue = Arc::new(TaskQueue::new(key.clone()));
        queues.write().insert(key, Arc::clone(&queue));
        queue
    }

    async fn recv(rx: &crossbeam_channel::Receiver<TaskResult<u32>>) -> TaskResult<u32> {
        for _ in 0..200 {
            if let Ok(result) = rx.try_recv() {
                return result;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("no result within timeout");
    }

    #[tokio::test]
    async fn test_grow_and_shrink() {
        let queues: Arc<QueueMap<u32>> = Arc::new(RwLock::new(BTreeMap::new()));
        let (mut set, _rx) = make_set(CapabilitySet::of(["cpu"]), &queues);

        set.set_running_count(3).await.unwrap();
        assert_eq!(set.running_count(), 3);

        set.set_running_count(1).await.unwrap();
        assert_eq!(set.running_count(), 1);

        set.set_running_count(0).await.unwrap();
        assert_eq!(set.running_count(), 0);
        assert!(set.shared.poison.is_empty());
    }

    #[tokio::test]
    async fn test_shrink_keeps_at_most_one_pill_pending() {
        let queues: Arc<QueueMap<u32>> = Arc::new(RwLock::new(BTreeMap::new()));
        let (mut set, _rx) = make_set(CapabilitySet::of(["cpu"]), &queues);
        set.set_running_count(3).await.unwrap();

        let poison_depth = Arc::new(AtomicUsize::new(0));
        let watcher = {
            let shared = Arc::clone(&set.shared);
            let depth = Arc::clone(&poison_depth);
            tokio::spawn(async move {
                loop {
                    depth.fetch_max(shared.poison.size(), Ordering::SeqCst);
                    tokio::task::yield_now().await;
                }
            })
        };

        set.set_running_count(0).await.unwrap();
        watcher.abort();

        assert_eq!(set.running_count(), 0);
        assert!(poison_depth.load(Ordering::SeqCst) <= 1);
    }

    #[tokio::test]
    async fn test_worker_only_takes_eligible_work() {
        let queues: Arc<QueueMap<u32>> = Arc::new(RwLock::new(BTreeMap::new()));
        let gpu = add_queue(&queues, CapabilitySet::of(["gpu"]));
        let net = add_queue(&queues, CapabilitySet::of(["net"]));
        let (mut set, rx) = make_set(CapabilitySet::of(["gpu", "cpu"]), &queues);

        net.put(Task::new(1).requires(CapabilitySet::of(["net"])));
        gpu.put(Task::new(21).requires(CapabilitySet::of(["gpu"])));
        set.set_running_count(1).await.unwrap();

        let result = recv(&rx).await;
        assert_eq!(result.value(), Some(&42));
        assert_eq!(result.source, CapabilitySet::of(["gpu"]));
        assert_eq!(net.size(), 1);

        set.set_running_count(0).await.unwrap();
    }

    #[tokio::test]
    async fn test_prefers_most_specific_queue() {
        let queues: Arc<QueueMap<u32>> = Arc::new(RwLock::new(BTreeMap::new()));
        let generic = add_queue(&queues, CapabilitySet::empty());
        let specific = add_queue(&queues, CapabilitySet::of(["gpu"]));
        let (mut set, rx) = make_set(CapabilitySet::of(["gpu"]), &queues);

        generic.put(Task::new(1));
        specific.put(Task::new(2).requires(CapabilitySet::of(["gpu"])));
        set.set_running_count(1).await.unwrap();

        assert_eq!(recv(&rx).await.value(), Some(&4));
        assert_eq!(recv(&rx).await.value(), Some(&2));

        set.set_running_count(0).await.unwrap();
    }

    #[tokio::test]
    async fn test_new_queue_wakes_blocked_listener() {
        let queues: Arc<QueueMap<u32>> = Arc::new(RwLock::new(BTreeMap::new()));
        let (mut set, rx) = make_set(CapabilitySet::of(["gpu", "cpu"]), &queues);
        set.set_running_count(1).await.unwrap();
        tokio::task::yield_now().await;

        // The listener is blocked with no eligible queues at all.
        let late = add_queue(&queues, CapabilitySet::of(["gpu", "cpu"]));
        set.notify_topology_change();
        late.put(Task::new(5).requires(CapabilitySet::of(["gpu", "cpu"])));

        assert_eq!(recv(&rx).await.value(), Some(&10));
        set.set_running_count(0).await.unwrap();
    }
}
