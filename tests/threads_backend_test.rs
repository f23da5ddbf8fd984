//! Integration tests for the dedicated-thread backend
//!
//! Covers:
//! - Actors running on named worker threads, off the engine thread
//! - Actor state living for the whole worker lifetime
//! - Panicking worker threads surfacing as lost workers
//! - Direct backend use from an async context

use async_trait::async_trait;
use prometheus_capability_scheduler::builders::SchedulerBuilder;
use prometheus_capability_scheduler::config::{BackendKind, SchedulerConfig};
use prometheus_capability_scheduler::core::{
    Actor, ActorFactory, Backend, CapabilitySet, ExecutionError, Task,
};
use prometheus_capability_scheduler::infra::ThreadBackend;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// TEST ACTORS
// ============================================================================

/// Reports the thread it runs on and how many tasks it has seen.
#[derive(Default)]
struct ThreadReporter {
    seen: usize,
}

#[async_trait]
impl Actor<u64, (String, usize)> for ThreadReporter {
    async fn consume(&mut self, millis: u64) -> Result<(String, usize), ExecutionError> {
        // Blocking work is fine here: this thread belongs to the worker.
        std::thread::sleep(Duration::from_millis(millis));
        self.seen += 1;
        let name = std::thread::current()
            .name()
            .unwrap_or("unnamed")
            .to_string();
        Ok((name, self.seen))
    }
}

struct CrashOnce {
    crashed: Arc<AtomicBool>,
}

#[async_trait]
impl Actor<u64, u64> for CrashOnce {
    async fn consume(&mut self, argument: u64) -> Result<u64, ExecutionError> {
        if !self.crashed.swap(true, Ordering::SeqCst) {
            panic!("worker thread crash");
        }
        Ok(argument + 1)
    }
}

fn threads_config() -> SchedulerConfig {
    SchedulerConfig {
        backend: BackendKind::Threads,
        max_workers: 2,
        ..SchedulerConfig::default()
    }
}

// ============================================================================
// SCHEDULER ON THREADS
// ============================================================================

#[test]
fn test_actors_run_on_worker_threads() {
    let scheduler = SchedulerBuilder::from_config(threads_config())
        .actor(CapabilitySet::of(["cpu"]), ThreadReporter::default)
        .build()
        .expect("scheduler");

    scheduler.submit((0..6).map(|_| Task::new(5))).expect("submit");
    let results = scheduler.join().expect("join");

    assert_eq!(results.len(), 6);
    for result in &results {
        let (thread, _) = result.value().expect("ok");
        assert!(thread.starts_with("capsched-worker-"), "ran on {thread}");
    }
    // Two workers share six tasks, so at least one actor saw several.
    let max_seen = results
        .iter()
        .filter_map(|r| r.value().map(|(_, seen)| *seen))
        .max()
        .unwrap();
    assert!(max_seen >= 3);
}

#[test]
fn test_thread_panic_requeues_and_restarts() {
    let crashed = Arc::new(AtomicBool::new(false));
    let created = Arc::new(AtomicUsize::new(0));
    let scheduler = {
        let crashed = Arc::clone(&crashed);
        let created = Arc::clone(&created);
        SchedulerBuilder::from_config(SchedulerConfig {
            max_workers: 1,
            ..threads_config()
        })
        .actor(CapabilitySet::of(["cpu"]), move || {
            created.fetch_add(1, Ordering::SeqCst);
            CrashOnce {
                crashed: Arc::clone(&crashed),
            }
        })
        .build()
        .expect("scheduler")
    };

    scheduler.submit([Task::new(41)]).expect("submit");
    let results = scheduler.join().expect("join");

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].value(), Some(&42));
    assert_eq!(created.load(Ordering::SeqCst), 2);
}

// ============================================================================
// BACKEND DIRECTLY
// ============================================================================

#[tokio::test]
async fn test_backend_worker_lifecycle() {
    let backend = ThreadBackend::new();
    let factory: Arc<dyn ActorFactory<u64, (String, usize)>> =
        Arc::new(ThreadReporter::default);

    let mut worker = backend.start_worker(factory).await.expect("start");
    let (_, first) = worker.execute(0).await.expect("first");
    let (name, second) = worker.execute(0).await.expect("second");
    assert_eq!((first, second), (1, 2));
    assert!(name.starts_with("capsched-worker-"));

    worker.stop().await;
    let err = worker.execute(0).await.expect_err("stopped worker");
    assert_eq!(err.as_label(), "worker_lost");
}

#[tokio::test]
async fn test_backend_reports_crash_as_worker_lost() {
    let backend = ThreadBackend::new().with_stack_size(512 * 1024);
    let crashed = Arc::new(AtomicBool::new(false));
    let factory: Arc<dyn ActorFactory<u64, u64>> = {
        let crashed = Arc::clone(&crashed);
        Arc::new(move || CrashOnce {
            crashed: Arc::clone(&crashed),
        })
    };

    let mut worker = backend.start_worker(factory).await.expect("start");
    let err = worker.execute(1).await.expect_err("crash");
    assert_eq!(err.as_label(), "worker_lost");
    assert!(!err.is_retryable());
    worker.stop().await;
}

#[tokio::test]
async fn test_backend_start_fails_when_factory_fails() {
    struct NoActor;

    impl ActorFactory<u64, u64> for NoActor {
        fn create(
            &self,
        ) -> Result<Box<dyn Actor<u64, u64>>, prometheus_capability_scheduler::SchedulerError> {
            Err(prometheus_capability_scheduler::SchedulerError::Backend(
                "device busy".into(),
            ))
        }
    }

    let backend = ThreadBackend::new();
    let err = backend
        .start_worker(Arc::new(NoActor))
        .await
        .err()
        .expect("start failure");
    assert!(err.to_string().contains("device busy"));
}
