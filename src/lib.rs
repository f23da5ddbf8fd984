//! # Prometheus Capability Scheduler
//!
//! A capability-aware worker-pool scheduler for heterogeneous AI workloads.
//!
//! Tasks declare the capabilities they need (`{gpu}`, `{gpu, cuda12}`, `{net}`),
//! worker pools ("actor sets") declare the capabilities they are provisioned
//! with, and the scheduler routes each task to a worker whose provision covers
//! its requirement. Worker counts per pool are rebalanced continuously from the
//! current backlog, within finite resource limits.
//!
//! ## Core Problem Solved
//!
//! - **Heterogeneous hardware**: a task needing a GPU must never land on a CPU-only
//!   worker, yet a GPU worker may pick up plain work when it would otherwise idle
//! - **Expensive workers**: actors hold loaded models or connections, so they are
//!   long-lived and only started or stopped when demand shifts
//! - **Finite resources**: `gpu = 2` means at most two GPU-provisioned workers at once
//! - **Flaky execution**: transient failures are retried up to a bound, lost workers
//!   are restarted and their task requeued
//!
//! ## Key Features
//!
//! - **Subset routing**: a worker provisioned with `P` serves every queue `K ⊆ P`,
//!   most specific queue first
//! - **Backlog-driven rebalancing** through a pluggable [`core::ResourceExchange`]
//! - **Graceful shrink**: workers are retired one poison pill at a time
//! - **Backpressure**: [`core::Scheduler::process`] only asks for more work once the
//!   buffer is low
//! - **Pluggable backends**: run actors on the engine loop or on dedicated OS threads
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use prometheus_capability_scheduler::builders::SchedulerBuilder;
//! use prometheus_capability_scheduler::config::BackendKind;
//! use prometheus_capability_scheduler::core::{CapabilitySet, Task};
//!
//! let scheduler = SchedulerBuilder::new()
//!     .actor(CapabilitySet::of(["gpu", "cpu"]), || Embedder::load())
//!     .actor(CapabilitySet::of(["cpu"]), || Tokenizer::default())
//!     .limit("gpu", 1.0)
//!     .build()?;
//!
//! let mut batches = documents.chunks(64).map(|c| c.to_vec());
//! let producer = move || {
//!     batches
//!         .next()
//!         .map(|docs| docs.into_iter().map(|d| Task::new(d).requires(CapabilitySet::of(["gpu"]))).collect())
//!         .unwrap_or_default()
//! };
//! for result in scheduler.process(producer, 16)? {
//!     let result = result?;
//!     match result.outcome {
//!         Ok(embedding) => store(embedding),
//!         Err(failure) => tracing::warn!(%failure, "document failed"),
//!     }
//! }
//! scheduler.join()?;
//! ```
//!
//! For complete examples, see:
//! - `tests/scheduler_test.rs` - End-to-end scheduling scenarios
//! - `tests/threads_backend_test.rs` - Thread backend behavior

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Configuration models for the scheduler and its backends.
pub mod config;
/// Core scheduling abstractions: capabilities, tasks, queues and the scheduler.
pub mod core;
/// Builders to construct schedulers from configuration.
pub mod builders;
/// Execution backends.
pub mod infra;
pub(crate) mod runtime;
/// Shared utilities.
pub mod util;

pub use crate::core::{
    Actor, ActorFactory, Blueprint, Capability, CapabilitySet, ExecutionError, Scheduler,
    SchedulerError, Task, TaskResult,
};
