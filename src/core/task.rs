//! Task and result types.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::{CapabilitySet, ExecutionError};

/// Default number of retries a transiently failing task gets.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;

/// A unit of work tagged with the capabilities it needs.
///
/// A task failing transiently is executed at most `max_attempts + 1` times.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task<A> {
    id: Uuid,
    /// Opaque payload handed to the actor.
    pub argument: A,
    /// Capabilities a worker must provide to take this task.
    pub requirements: CapabilitySet,
    /// Ordered scheduling hints. Carried along, never interpreted by the scheduler.
    pub properties: Vec<Value>,
    /// Number of transient failures tolerated before the task is reported failed.
    pub max_attempts: u32,
    attempt_count: u32,
}

impl<A> Task<A> {
    /// New task without requirements.
    pub fn new(argument: A) -> Self {
        Self {
            id: Uuid::new_v4(),
            argument,
            requirements: CapabilitySet::empty(),
            properties: Vec::new(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            attempt_count: 0,
        }
    }

    /// Set the requirement set.
    #[must_use]
    pub fn requires(mut self, requirements: CapabilitySet) -> Self {
        self.requirements = requirements;
        self
    }

    /// Append a scheduling hint.
    #[must_use]
    pub fn with_property(mut self, property: impl Into<Value>) -> Self {
        self.properties.push(property.into());
        self
    }

    /// Override the retry budget.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Task identifier, stable across retries.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Transient failures recorded so far.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Record one transient failure. Returns `true` once the budget is spent.
    pub(crate) fn record_failure(&mut self) -> bool {
        self.attempt_count += 1;
        self.attempt_count > self.max_attempts
    }
}

/// Portable description of a task that reached a terminal failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    /// Stable label of the last error, see [`ExecutionError::as_label`].
    pub kind: String,
    /// Human-readable message of the last error.
    pub message: String,
    /// Transient failures recorded before giving up.
    pub attempts: u32,
}

impl TaskFailure {
    /// Translate a raw execution error.
    #[must_use]
    pub fn from_error(error: &ExecutionError, attempts: u32) -> Self {
        Self {
            kind: error.as_label().to_string(),
            message: error.as_message().to_string(),
            attempts,
        }
    }
}

impl std::fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} after {} attempts: {}", self.kind, self.attempts, self.message)
    }
}

/// Terminal outcome of one task, emitted exactly once.
#[derive(Debug, Clone)]
pub struct TaskResult<R> {
    /// Success payload or parsed failure.
    pub outcome: Result<R, TaskFailure>,
    /// Key of the queue the task was taken from.
    pub source: CapabilitySet,
}

impl<R> TaskResult<R> {
    pub(crate) fn ok(value: R, source: CapabilitySet) -> Self {
        Self {
            outcome: Ok(value),
            source,
        }
    }

    pub(crate) fn failed(failure: TaskFailure, source: CapabilitySet) -> Self {
        Self {
            outcome: Err(failure),
            source,
        }
    }

    /// Whether the task succeeded.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Success value, if any.
    pub fn value(&self) -> Option<&R> {
        self.outcome.as_ref().ok()
    }

    /// Consume into the bare outcome.
    pub fn into_outcome(self) -> Result<R, TaskFailure> {
        self.outcome
    }
}
