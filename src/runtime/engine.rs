//! Single-owner run-loop.
//!
//! All queues, actor sets and listeners live on one dedicated thread driving a
//! current-thread tokio runtime. Callers talk to it through [`EngineHandle`]
//! with request/response messages and block on a crossbeam reply channel, so
//! the public scheduler API needs no async context.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Sender};
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::util::telemetry::lifecycle;

use crate::core::actor_set::{ActorSet, QueueMap};
use crate::core::{
    Backend, Blueprint, CapabilitySet, SchedulerError, SchedulerStatus, Task, TaskQueue,
    TaskResult,
};

const ENGINE_THREAD_NAME: &str = "capsched-engine";
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Requests handled by the run-loop.
pub(crate) enum Command<A> {
    /// Enqueue tasks; replies with the total queued count afterwards.
    Submit {
        tasks: Vec<Task<A>>,
        reply: Sender<usize>,
    },
    /// Snapshot queue depths and worker counts.
    Status { reply: Sender<SchedulerStatus> },
    /// Apply ideal running counts to every actor set concurrently.
    Resize {
        targets: BTreeMap<CapabilitySet, usize>,
        reply: Sender<Result<(), SchedulerError>>,
    },
    /// Stop every worker, cancel every queue and leave the loop. With
    /// `discard_backlog` the queued tasks are dropped first, so only the
    /// in-flight ones finish before the workers take their poison pills.
    Shutdown {
        discard_backlog: bool,
        reply: Sender<()>,
    },
}

struct Engine<A, R> {
    queues: Arc<QueueMap<A>>,
    actor_sets: BTreeMap<CapabilitySet, ActorSet<A, R>>,
    verbose: bool,
}

impl<A, R> Engine<A, R>
where
    A: Clone + Send + 'static,
    R: Send + 'static,
{
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command<A>>) {
        debug!(actor_sets = self.actor_sets.len(), "engine started");
        while let Some(command) = commands.recv().await {
            match command {
                Command::Submit { tasks, reply } => {
                    let queued = self.submit(tasks);
                    let _ = reply.send(queued);
                }
                Command::Status { reply } => {
                    let _ = reply.send(self.status());
                }
                Command::Resize { targets, reply } => {
                    let _ = reply.send(self.resize(&targets).await);
                }
                Command::Shutdown {
                    discard_backlog,
                    reply,
                } => {
                    self.shutdown(discard_backlog).await;
                    let _ = reply.send(());
                    return;
                }
            }
        }
        warn!("engine command channel closed, tearing down");
        self.shutdown(true).await;
    }

    fn submit(&self, tasks: Vec<Task<A>>) -> usize {
        let count = tasks.len();
        for task in tasks {
            self.queue_for(&task.requirements).put(task);
        }
        let queued = self.queues.read().values().map(|q| q.size()).sum();
        debug!(submitted = count, queued, "tasks submitted");
        queued
    }

    /// Queue for `key`, created on first use.
    ///
    /// A new queue must wake every listener able to serve it: listeners
    /// blocked on a strict-superset queue, and any listener whose provision
    /// covers the key.
    fn queue_for(&self, key: &CapabilitySet) -> Arc<TaskQueue<Task<A>>> {
        if let Some(queue) = self.queues.read().get(key) {
            return Arc::clone(queue);
        }

        let queue = Arc::new(TaskQueue::new(key.clone()));
        {
            let mut queues = self.queues.write();
            queues.insert(key.clone(), Arc::clone(&queue));
            for (other_key, other) in queues.iter() {
                if key.is_strict_subset(other_key) {
                    other.reset();
                }
            }
        }
        for set in self.actor_sets.values() {
            if set.provision().satisfies(key) {
                set.notify_topology_change();
            }
        }
        debug!(queue = %key, "created task queue");
        queue
    }

    fn status(&self) -> SchedulerStatus {
        let queued = self
            .queues
            .read()
            .iter()
            .map(|(key, queue)| (key.clone(), queue.size()))
            .collect();
        let running = self
            .actor_sets
            .iter()
            .map(|(capset, set)| (capset.clone(), set.running_count()))
            .collect();
        let in_flight = self.actor_sets.values().map(ActorSet::in_flight).sum();
        SchedulerStatus {
            queued,
            in_flight,
            running,
        }
    }

    async fn resize(&mut self, targets: &BTreeMap<CapabilitySet, usize>) -> Result<(), SchedulerError> {
        let outcomes = join_all(self.actor_sets.iter_mut().map(|(capset, set)| {
            let target = targets.get(capset).copied().unwrap_or(0);
            set.set_running_count(target)
        }))
        .await;
        outcomes.into_iter().find(Result::is_err).unwrap_or(Ok(()))
    }

    async fn shutdown(&mut self, discard_backlog: bool) {
        lifecycle!(self.verbose, actor_sets = self.actor_sets.len(), "stopping all actor sets");
        if discard_backlog {
            let dropped: usize = self.queues.read().values().map(|q| q.clear()).sum();
            if dropped > 0 {
                warn!(dropped, "discarding queued tasks on shutdown");
            }
        }
        if let Err(err) = self.resize(&BTreeMap::new()).await {
            error!(error = %err, "failed to stop workers cleanly");
        }
        for set in self.actor_sets.values() {
            set.abort_all();
        }
        for queue in self.queues.read().values() {
            queue.cancel();
        }
        debug!("engine stopped");
    }
}

/// Caller-side handle to the run-loop thread.
pub(crate) struct EngineHandle<A> {
    commands: mpsc::UnboundedSender<Command<A>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl<A> EngineHandle<A>
where
    A: Clone + Send + 'static,
{
    /// Start the run-loop thread with one empty actor set per blueprint entry.
    pub(crate) fn spawn<R: Send + 'static>(
        blueprint: Blueprint<A, R>,
        backend: Arc<dyn Backend<A, R>>,
        results: Sender<TaskResult<R>>,
        verbose: bool,
    ) -> Result<Self, SchedulerError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| SchedulerError::Backend(format!("failed to build engine runtime: {e}")))?;

        let queues: Arc<QueueMap<A>> = Arc::new(RwLock::new(BTreeMap::new()));
        let actor_sets = blueprint
            .into_iter()
            .map(|(capset, factory)| {
                let set = ActorSet::new(
                    capset.clone(),
                    factory,
                    Arc::clone(&backend),
                    Arc::clone(&queues),
                    results.clone(),
                    verbose,
                );
                (capset, set)
            })
            .collect();
        let engine = Engine {
            queues,
            actor_sets,
            verbose,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let thread = thread::Builder::new()
            .name(ENGINE_THREAD_NAME.to_string())
            .spawn(move || {
                runtime.block_on(engine.run(rx));
                runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);
            })
            .map_err(|e| SchedulerError::Backend(format!("failed to spawn engine thread: {e}")))?;

        Ok(Self {
            commands: tx,
            thread: Mutex::new(Some(thread)),
        })
    }

    fn request<T>(&self, make: impl FnOnce(Sender<T>) -> Command<A>) -> Result<T, SchedulerError> {
        let (reply, response) = bounded(1);
        self.commands
            .send(make(reply))
            .map_err(|_| SchedulerError::EngineStopped)?;
        response.recv().map_err(|_| SchedulerError::EngineStopped)
    }

    pub(crate) fn submit(&self, tasks: Vec<Task<A>>) -> Result<usize, SchedulerError> {
        self.request(|reply| Command::Submit { tasks, reply })
    }

    pub(crate) fn status(&self) -> Result<SchedulerStatus, SchedulerError> {
        self.request(|reply| Command::Status { reply })
    }

    pub(crate) fn resize(&self, targets: BTreeMap<CapabilitySet, usize>) -> Result<(), SchedulerError> {
        self.request(|reply| Command::Resize { targets, reply })?
    }

    /// Stop the run-loop and wait for its thread. Safe to call more than once.
    pub(crate) fn shutdown(&self, discard_backlog: bool) {
        let stopped = self.request(|reply| Command::Shutdown {
            discard_backlog,
            reply,
        });
        if stopped.is_err() {
            debug!("engine already stopped");
        }
        if let Some(thread) = self.thread.lock().take() {
            if thread.join().is_err() {
                error!("engine thread panicked");
            }
        }
    }
}
