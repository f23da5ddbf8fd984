//! Core scheduling abstractions: capabilities, tasks, queues, actor sets and
//! the scheduler facade.

pub mod actor;
pub(crate) mod actor_set;
pub mod backend;
pub mod capability;
pub mod error;
pub mod exchange;
pub mod queue;
pub mod scheduler;
pub mod task;

pub use actor::{Actor, ActorFactory};
pub use backend::{Backend, RunningWorker};
pub use capability::{Capability, CapabilitySet};
pub use error::{AppResult, ExecutionError, SchedulerError};
pub use exchange::{CapsetExchange, ResourceExchange, ResourceLimits};
pub use queue::TaskQueue;
pub use scheduler::{Blueprint, Drain, Process, Scheduler, SchedulerStatus, DEFAULT_STALL_CHECK};
pub use task::{Task, TaskFailure, TaskResult, DEFAULT_MAX_ATTEMPTS};
