//! Unit tests for individual components

mod capability_test;
mod config_test;
mod error_test;
mod exchange_test;
