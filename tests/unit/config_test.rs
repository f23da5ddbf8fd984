//! Tests for configuration parsing, env loading and validation

use std::collections::HashMap;

use prometheus_capability_scheduler::config::{BackendKind, SchedulerConfig};
use prometheus_capability_scheduler::core::Capability;

fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    move |key: &str| vars.get(key).cloned()
}

#[test]
fn test_default_config_is_valid() {
    let cfg = SchedulerConfig::default();
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.backend, BackendKind::Inline);
    assert_eq!(cfg.stall_check_ms, 500);
    assert!(cfg.max_workers >= 1);
}

#[test]
fn test_from_json_str_with_defaults() {
    let cfg = SchedulerConfig::from_json_str(
        r#"{ "resource_limits": { "gpu": 2, "cpu": 8.5 }, "backend": "threads" }"#,
    )
    .expect("valid json");

    assert_eq!(cfg.resource_limits["gpu"], 2.0);
    assert_eq!(cfg.resource_limits["cpu"], 8.5);
    assert_eq!(cfg.backend, BackendKind::Threads);
    assert!(!cfg.verbose);
    assert_eq!(cfg.stall_check_ms, 500);
}

#[test]
fn test_from_json_str_rejects_negative_limit() {
    let err = SchedulerConfig::from_json_str(r#"{ "resource_limits": { "gpu": -1 } }"#)
        .expect_err("negative limit");
    assert!(err.contains("gpu"));
}

#[test]
fn test_from_json_str_rejects_unknown_backend() {
    let err = SchedulerConfig::from_json_str(r#"{ "backend": "cluster" }"#).expect_err("bad backend");
    assert!(err.starts_with("parse error"));
}

#[test]
fn test_zero_max_workers_invalid() {
    let cfg = SchedulerConfig {
        max_workers: 0,
        ..SchedulerConfig::default()
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn test_zero_stall_check_invalid() {
    let cfg = SchedulerConfig {
        stall_check_ms: 0,
        ..SchedulerConfig::default()
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn test_from_lookup_reads_every_key() {
    let cfg = SchedulerConfig::from_lookup(lookup(&[
        ("CAPSCHED_RESOURCE_LIMITS", "gpu=1, cpu=4"),
        ("CAPSCHED_CAPABILITY_COSTS", "gpu=0.5"),
        ("CAPSCHED_MAX_WORKERS", "6"),
        ("CAPSCHED_BACKEND", "threads"),
        ("CAPSCHED_VERBOSE", "true"),
        ("CAPSCHED_STALL_CHECK_MS", "250"),
    ]))
    .expect("valid env");

    assert_eq!(cfg.resource_limits.len(), 2);
    assert_eq!(cfg.resource_limits["cpu"], 4.0);
    assert_eq!(cfg.capability_costs["gpu"], 0.5);
    assert_eq!(cfg.max_workers, 6);
    assert_eq!(cfg.backend, BackendKind::Threads);
    assert!(cfg.verbose);
    assert_eq!(cfg.stall_check().as_millis(), 250);
}

#[test]
fn test_from_lookup_empty_keeps_defaults() {
    let cfg = SchedulerConfig::from_lookup(lookup(&[])).expect("defaults");
    assert_eq!(cfg, SchedulerConfig::default());
}

#[test]
fn test_from_lookup_reports_bad_key() {
    let err = SchedulerConfig::from_lookup(lookup(&[("CAPSCHED_RESOURCE_LIMITS", "gpu")]))
        .expect_err("missing value");
    assert!(err.contains("CAPSCHED_RESOURCE_LIMITS"));

    let err = SchedulerConfig::from_lookup(lookup(&[("CAPSCHED_VERBOSE", "maybe")]))
        .expect_err("bad bool");
    assert!(err.contains("CAPSCHED_VERBOSE"));
}

#[test]
fn test_resource_limits_conversion() {
    let cfg = SchedulerConfig::from_json_str(
        r#"{ "resource_limits": { "gpu": 2 }, "capability_costs": { "gpu": 0.5 }, "max_workers": 3 }"#,
    )
    .expect("valid json");
    let limits = cfg.resource_limits();

    assert_eq!(limits.limits[&Capability::new("gpu")], 2.0);
    assert_eq!(limits.cost_of(&Capability::new("gpu")), 0.5);
    assert_eq!(limits.cost_of(&Capability::new("cpu")), 1.0);
    assert_eq!(limits.max_workers, Some(3));
}

#[test]
fn test_backend_kind_from_str() {
    assert_eq!("Threads".parse::<BackendKind>(), Ok(BackendKind::Threads));
    assert_eq!(" inline ".parse::<BackendKind>(), Ok(BackendKind::Inline));
    assert!("ray".parse::<BackendKind>().is_err());
    assert_eq!(BackendKind::Threads.to_string(), "threads");
}
