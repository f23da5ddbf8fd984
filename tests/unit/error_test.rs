//! Tests for error types and failure payloads

use prometheus_capability_scheduler::core::{
    CapabilitySet, ExecutionError, SchedulerError, TaskFailure,
};

#[test]
fn test_scheduler_error_display() {
    let err = SchedulerError::NotEnoughResources { remaining: 3 };
    assert!(err.to_string().contains("3 tasks remaining"));
    assert_eq!(err.as_label(), "not_enough_resources");

    let err = SchedulerError::WorkerStart {
        capset: CapabilitySet::of(["gpu"]),
        reason: "no device".into(),
    };
    assert_eq!(err.to_string(), "failed to start worker for {gpu}: no device");
}

#[test]
fn test_execution_error_display() {
    assert_eq!(
        ExecutionError::fail("timeout").to_string(),
        "execution failed: timeout"
    );
    assert_eq!(
        ExecutionError::fatal("bad input").to_string(),
        "fatal error (no retry): bad input"
    );
    assert_eq!(
        ExecutionError::worker_lost("oom").to_string(),
        "worker lost: oom"
    );
}

#[test]
fn test_anyhow_context_is_kept() {
    let source = anyhow::anyhow!("connection reset").context("fetching shard 4");
    let err = ExecutionError::from(source);
    assert!(err.is_retryable());
    assert_eq!(err.as_message(), "fetching shard 4: connection reset");
}

#[test]
fn test_task_failure_from_error() {
    let failure = TaskFailure::from_error(&ExecutionError::fail("flaky"), 3);
    assert_eq!(failure.kind, "task_failed");
    assert_eq!(failure.message, "flaky");
    assert_eq!(failure.attempts, 3);
    assert_eq!(failure.to_string(), "task_failed after 3 attempts: flaky");
}

#[test]
fn test_task_failure_serializes() {
    let failure = TaskFailure::from_error(&ExecutionError::fatal("nope"), 0);
    let json = serde_json::to_value(&failure).expect("serialize");
    assert_eq!(json["kind"], "task_fatal");
    assert_eq!(json["attempts"], 0);
}
