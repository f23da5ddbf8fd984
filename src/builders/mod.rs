//! Builders wiring configuration, blueprints and backends into a scheduler.

pub mod scheduler_builder;

pub use scheduler_builder::{build_scheduler, SchedulerBuilder};
