//! Configuration models for the scheduler and its backends.

pub mod scheduler;

pub use scheduler::{BackendKind, SchedulerConfig, ENV_PREFIX};
