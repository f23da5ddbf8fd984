//! Capabilities and capability sets.
//!
//! A [`CapabilitySet`] is used twice: as the *requirement* of a task and as the
//! *provision* of an actor set. Routing relies on the subset relation
//! (`requirement ⊆ provision`), queue priority relies on the total order.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// One resource or skill dimension, e.g. `"gpu"` or `"db-write"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capability(String);

impl Capability {
    /// Create a capability from its name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Capability name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Capability {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Capability {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable set of capabilities.
///
/// # Ordering
///
/// Two orders are defined:
///
/// - the partial order of [`is_subset`](Self::is_subset), which decides which
///   workers may take which tasks;
/// - the total order of [`Ord`]: by cardinality first, then lexicographically
///   over the sorted members. The empty set is the smallest set, and larger
///   (more specific) sets always sort after smaller ones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    /// The empty set. Every task without requirements lands here.
    #[must_use]
    pub fn empty() -> Self {
        Self(BTreeSet::new())
    }

    /// Build a set from anything convertible into capabilities.
    pub fn of<I, C>(items: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Capability>,
    {
        Self(items.into_iter().map(Into::into).collect())
    }

    /// `self ⊆ other`.
    #[must_use]
    pub fn is_subset(&self, other: &Self) -> bool {
        self.0.is_subset(&other.0)
    }

    /// `self ⊂ other`.
    #[must_use]
    pub fn is_strict_subset(&self, other: &Self) -> bool {
        self.0.len() < other.0.len() && self.is_subset(other)
    }

    /// True when a worker provisioned with `self` may take a task requiring `requirement`.
    #[must_use]
    pub fn satisfies(&self, requirement: &Self) -> bool {
        requirement.is_subset(self)
    }

    /// Whether the set contains `capability`.
    #[must_use]
    pub fn contains(&self, capability: &Capability) -> bool {
        self.0.contains(capability)
    }

    /// Number of capabilities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True for the empty set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over members in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.0.iter()
    }
}

impl PartialOrd for CapabilitySet {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CapabilitySet {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0
            .len()
            .cmp(&other.0.len())
            .then_with(|| self.0.iter().cmp(other.0.iter()))
    }
}

impl<C: Into<Capability>> FromIterator<C> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = C>>(iter: I) -> Self {
        Self::of(iter)
    }
}

impl fmt::Display for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (idx, cap) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str(",")?;
            }
            write!(f, "{cap}")?;
        }
        f.write_str("}")
    }
}
