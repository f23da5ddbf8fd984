//! Error types for scheduler operations and task executions.

use thiserror::Error;

use super::CapabilitySet;

/// Errors produced by the scheduler itself.
///
/// Per-task failures never show up here; they travel inside
/// [`TaskResult`](crate::core::TaskResult) values.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Backlog remains but the exchange cannot launch any more actors.
    #[error("not enough resources to continue: {remaining} tasks remaining and no launchable actors")]
    NotEnoughResources {
        /// Tasks still queued when the dead end was detected.
        remaining: usize,
    },
    /// Blueprint or configuration rejected before the engine started.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// A worker could not be started while resizing an actor set.
    #[error("failed to start worker for {capset}: {reason}")]
    WorkerStart {
        /// Provision of the actor set being resized.
        capset: CapabilitySet,
        /// Backend-reported reason.
        reason: String,
    },
    /// The run-loop is gone (joined, torn down after a fatal error, or crashed).
    #[error("scheduler engine stopped")]
    EngineStopped,
    /// Another caller is already draining results from this scheduler.
    #[error("another drain is already in progress")]
    DrainInProgress,
    /// Backend-specific failure with context.
    #[error("backend error: {0}")]
    Backend(String),
}

impl SchedulerError {
    /// Short stable label for logs.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::NotEnoughResources { .. } => "not_enough_resources",
            Self::InvalidConfig(_) => "invalid_config",
            Self::WorkerStart { .. } => "worker_start",
            Self::EngineStopped => "engine_stopped",
            Self::DrainInProgress => "drain_in_progress",
            Self::Backend(_) => "backend",
        }
    }
}

/// Outcome of a failed execution attempt, as reported by a backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecutionError {
    /// Execution failed but may succeed if retried; counts against `max_attempts`.
    #[error("execution failed: {error}")]
    Fail {
        /// Underlying error message.
        error: String,
    },
    /// Non-recoverable failure; the task fails without further attempts.
    #[error("fatal error (no retry): {error}")]
    Fatal {
        /// Underlying error message.
        error: String,
    },
    /// The worker died or was torn down while holding the task.
    /// The task is requeued unchanged and the worker is restarted.
    #[error("worker lost: {reason}")]
    WorkerLost {
        /// Why the worker went away.
        reason: String,
    },
}

impl ExecutionError {
    /// Retryable failure.
    pub fn fail(error: impl Into<String>) -> Self {
        Self::Fail { error: error.into() }
    }

    /// Non-retryable failure.
    pub fn fatal(error: impl Into<String>) -> Self {
        Self::Fatal { error: error.into() }
    }

    /// Worker crash.
    pub fn worker_lost(reason: impl Into<String>) -> Self {
        Self::WorkerLost {
            reason: reason.into(),
        }
    }

    /// Short stable label (snake_case) for logs and failure payloads.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::Fail { .. } => "task_failed",
            Self::Fatal { .. } => "task_fatal",
            Self::WorkerLost { .. } => "worker_lost",
        }
    }

    /// Message without the variant prefix.
    #[must_use]
    pub fn as_message(&self) -> &str {
        match self {
            Self::Fail { error } | Self::Fatal { error } => error,
            Self::WorkerLost { reason } => reason,
        }
    }

    /// `true` only for [`ExecutionError::Fail`].
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Fail { .. })
    }
}

impl From<anyhow::Error> for ExecutionError {
    fn from(err: anyhow::Error) -> Self {
        Self::Fail {
            error: format!("{err:#}"),
        }
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
