//! Tests for capability sets and tasks

use prometheus_capability_scheduler::core::{Capability, CapabilitySet, Task, DEFAULT_MAX_ATTEMPTS};

#[test]
fn test_collect_into_set() {
    let set: CapabilitySet = ["gpu", "cuda12", "gpu"].into_iter().collect();
    assert_eq!(set.len(), 2);
    assert!(set.contains(&Capability::new("cuda12")));
    assert!(!set.contains(&Capability::new("cpu")));
}

#[test]
fn test_requirement_satisfaction() {
    let provision = CapabilitySet::of(["gpu", "cpu", "net"]);
    assert!(provision.satisfies(&CapabilitySet::empty()));
    assert!(provision.satisfies(&CapabilitySet::of(["gpu", "net"])));
    assert!(!provision.satisfies(&CapabilitySet::of(["gpu", "disk"])));
}

#[test]
fn test_specific_sets_sort_last() {
    let mut sets = vec![
        CapabilitySet::of(["a", "b", "c"]),
        CapabilitySet::of(["z"]),
        CapabilitySet::of(["a", "b"]),
        CapabilitySet::of(["a"]),
    ];
    sets.sort();
    let lens: Vec<_> = sets.iter().map(CapabilitySet::len).collect();
    assert_eq!(lens, vec![1, 1, 2, 3]);
    assert_eq!(sets[0], CapabilitySet::of(["a"]));
}

#[test]
fn test_set_serializes_as_list() {
    let set = CapabilitySet::of(["gpu", "cpu"]);
    let json = serde_json::to_string(&set).expect("serialize");
    assert_eq!(json, r#"["cpu","gpu"]"#);
    let back: CapabilitySet = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(back, set);
}

#[test]
fn test_task_builder() {
    let task = Task::new("payload")
        .requires(CapabilitySet::of(["gpu"]))
        .with_property("priority:high")
        .with_property(serde_json::json!({ "batch": 7 }))
        .with_max_attempts(5);

    assert_eq!(task.requirements, CapabilitySet::of(["gpu"]));
    assert_eq!(
        task.properties,
        vec![serde_json::json!("priority:high"), serde_json::json!({ "batch": 7 })]
    );
    assert_eq!(task.max_attempts, 5);
    assert_eq!(task.attempt_count(), 0);
}

#[test]
fn test_task_defaults() {
    let a = Task::new(1);
    let b = Task::new(1);
    assert_eq!(a.max_attempts, DEFAULT_MAX_ATTEMPTS);
    assert!(a.requirements.is_empty());
    assert_ne!(a.id(), b.id());
}
