//! Tests for the greedy resource exchange

use std::collections::BTreeMap;

use prometheus_capability_scheduler::core::{
    CapabilitySet, CapsetExchange, ResourceExchange, ResourceLimits,
};

fn caps(items: &[&str]) -> CapabilitySet {
    CapabilitySet::of(items.iter().copied())
}

#[test]
fn test_specific_work_goes_to_capable_set() {
    let mut ex = CapsetExchange::new(
        [caps(&["cpu"]), caps(&["gpu", "cpu"])],
        ResourceLimits::new().with_limit("gpu", 2.0),
    );
    let backlog = BTreeMap::from([(caps(&["gpu"]), 4)]);
    let ideal = ex.set_values(&backlog);

    assert_eq!(ideal[&caps(&["cpu"])], 0);
    assert_eq!(ideal[&caps(&["gpu", "cpu"])], 2);
}

#[test]
fn test_generic_work_spreads_over_all_sets() {
    let mut ex = CapsetExchange::new(
        [caps(&["cpu"]), caps(&["gpu"])],
        ResourceLimits::new()
            .with_limit("cpu", 1.0)
            .with_limit("gpu", 1.0),
    );
    let backlog = BTreeMap::from([(caps(&[]), 10)]);
    let ideal = ex.set_values(&backlog);

    assert_eq!(ideal[&caps(&["cpu"])], 1);
    assert_eq!(ideal[&caps(&["gpu"])], 1);
}

#[test]
fn test_never_more_workers_than_servable_backlog() {
    let mut ex = CapsetExchange::new([caps(&["cpu"])], ResourceLimits::new());
    let backlog = BTreeMap::from([(caps(&["cpu"]), 2), (caps(&["gpu"]), 9)]);
    let ideal = ex.set_values(&backlog);

    assert_eq!(ideal[&caps(&["cpu"])], 2);
    assert!(!ex.is_idle());
}

#[test]
fn test_shared_capability_budget() {
    // Both sets draw on the same "mem" pool.
    let limits = ResourceLimits::new()
        .with_limit("mem", 4.0)
        .with_cost("mem", 2.0);
    let mut ex = CapsetExchange::new([caps(&["mem", "a"]), caps(&["mem", "b"])], limits);
    let backlog = BTreeMap::from([(caps(&["a"]), 5), (caps(&["b"]), 5)]);
    let ideal = ex.set_values(&backlog);

    assert_eq!(ideal[&caps(&["mem", "a"])], 1);
    assert_eq!(ideal[&caps(&["mem", "b"])], 1);
}

#[test]
fn test_idle_tracks_last_allocation() {
    let mut ex = CapsetExchange::new([caps(&["cpu"])], ResourceLimits::new());
    assert!(ex.is_idle());

    ex.set_values(&BTreeMap::from([(caps(&[]), 1)]));
    assert!(!ex.is_idle());

    ex.set_values(&BTreeMap::from([(caps(&[]), 0)]));
    assert!(ex.is_idle());
}

#[test]
fn test_limits_roundtrip_through_json() {
    let limits = ResourceLimits::new()
        .with_limit("gpu", 1.0)
        .with_max_workers(4);
    let json = serde_json::to_string(&limits).expect("serialize");
    let back: ResourceLimits = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(back, limits);
}
