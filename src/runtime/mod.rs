//! Engine run-loop hosting queues, actor sets and listeners.

pub(crate) mod engine;
