//! Resource exchange: turns queue backlog into ideal worker counts.
//!
//! The scheduler only relies on the [`ResourceExchange`] trait. [`CapsetExchange`]
//! is the reference allocator shipped with the crate.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::trace;

use super::{Capability, CapabilitySet};

const LIMIT_EPSILON: f64 = 1e-9;

/// Decides how many workers each actor set should run.
pub trait ResourceExchange: Send {
    /// Feed the current backlog per queue key and get back the ideal running
    /// count per actor capability set.
    fn set_values(
        &mut self,
        backlog: &BTreeMap<CapabilitySet, usize>,
    ) -> BTreeMap<CapabilitySet, usize>;

    /// True when the last allocation granted no workers at all.
    fn is_idle(&self) -> bool;
}

/// Finite resources shared by all workers.
///
/// Each worker of an actor set consumes `cost_of(c)` units of every capability
/// `c` in its set. Capabilities without a limit are unconstrained.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Available quantity per capability.
    pub limits: BTreeMap<Capability, f64>,
    /// Per-worker cost per capability (default 1.0).
    #[serde(default)]
    pub costs: BTreeMap<Capability, f64>,
    /// Cap on the total number of running workers.
    #[serde(default)]
    pub max_workers: Option<usize>,
}

impl ResourceLimits {
    /// No limits at all.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Limit `capability` to `quantity` units.
    #[must_use]
    pub fn with_limit(mut self, capability: impl Into<Capability>, quantity: f64) -> Self {
        self.limits.insert(capability.into(), quantity);
        self
    }

    /// Set the per-worker cost of `capability`.
    #[must_use]
    pub fn with_cost(mut self, capability: impl Into<Capability>, cost: f64) -> Self {
        self.costs.insert(capability.into(), cost);
        self
    }

    /// Cap the total number of running workers.
    #[must_use]
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = Some(max_workers);
        self
    }

    /// Per-worker cost of `capability`.
    #[must_use]
    pub fn cost_of(&self, capability: &Capability) -> f64 {
        self.costs.get(capability).copied().unwrap_or(1.0)
    }

    /// Validate quantities and costs.
    ///
    /// # Errors
    ///
    /// Returns a message naming the first negative or non-finite value.
    pub fn validate(&self) -> Result<(), String> {
        for (capability, quantity) in &self.limits {
            if !quantity.is_finite() || *quantity < 0.0 {
                return Err(format!(
                    "resource limit for '{capability}' must be finite and non-negative, got {quantity}"
                ));
            }
        }
        for (capability, cost) in &self.costs {
            if !cost.is_finite() || *cost < 0.0 {
                return Err(format!(
                    "cost of '{capability}' must be finite and non-negative, got {cost}"
                ));
            }
        }
        Ok(())
    }
}

/// `(unserved backlog, max ratio, sum of ratios)`; lower is better.
#[derive(Debug, Clone, Copy)]
struct Score {
    unserved: usize,
    max_ratio: f64,
    sum_ratio: f64,
}

impl Score {
    fn compare(&self, other: &Self) -> Ordering {
        self.unserved
            .cmp(&other.unserved)
            .then_with(|| self.max_ratio.total_cmp(&other.max_ratio))
            .then_with(|| self.sum_ratio.total_cmp(&other.sum_ratio))
    }
}

/// Greedy reference allocator.
///
/// Every call recomputes from zero: it repeatedly adds the single worker that
/// strictly improves the score most, until no addition helps or fits.
#[derive(Debug, Clone)]
pub struct CapsetExchange {
    capsets: Vec<CapabilitySet>,
    limits: ResourceLimits,
    last_total: usize,
}

impl CapsetExchange {
    /// Allocator over the given actor capability sets.
    pub fn new(capsets: impl IntoIterator<Item = CapabilitySet>, limits: ResourceLimits) -> Self {
        let mut capsets: Vec<_> = capsets.into_iter().collect();
        capsets.sort();
        capsets.dedup();
        Self {
            capsets,
            limits,
            last_total: 0,
        }
    }

    /// Limits this exchange allocates within.
    #[must_use]
    pub const fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    fn score(&self, backlog: &BTreeMap<CapabilitySet, usize>, alloc: &[usize]) -> Score {
        let mut score = Score {
            unserved: 0,
            max_ratio: 0.0,
            sum_ratio: 0.0,
        };
        for (key, &queued) in backlog {
            if queued == 0 {
                continue;
            }
            let workers: usize = self
                .capsets
                .iter()
                .zip(alloc)
                .filter(|(capset, _)| capset.satisfies(key))
                .map(|(_, count)| count)
                .sum();
            if workers == 0 {
                score.unserved += queued;
            } else {
                #[allow(clippy::cast_precision_loss)]
                let ratio = queued as f64 / workers as f64;
                score.max_ratio = score.max_ratio.max(ratio);
                score.sum_ratio += ratio;
            }
        }
        score
    }

    fn fits(&self, usage: &BTreeMap<&Capability, f64>, capset: &CapabilitySet) -> bool {
        capset.iter().all(|capability| {
            self.limits.limits.get(capability).is_none_or(|limit| {
                let used = usage.get(capability).copied().unwrap_or(0.0);
                used + self.limits.cost_of(capability) <= limit + LIMIT_EPSILON
            })
        })
    }
}

impl ResourceExchange for CapsetExchange {
    fn set_values(
        &mut self,
        backlog: &BTreeMap<CapabilitySet, usize>,
    ) -> BTreeMap<CapabilitySet, usize> {
        let servable: Vec<usize> = self
            .capsets
            .iter()
            .map(|capset| {
                backlog
                    .iter()
                    .filter(|(key, _)| capset.satisfies(key))
                    .map(|(_, queued)| queued)
                    .sum()
            })
            .collect();

        let mut alloc = vec![0usize; self.capsets.len()];
        let mut usage: BTreeMap<&Capability, f64> = BTreeMap::new();
        let mut total = 0usize;
        let mut current = self.score(backlog, &alloc);

        loop {
            if self.limits.max_workers.is_some_and(|max| total >= max) {
                break;
            }
            let mut best: Option<(usize, Score)> = None;
            for (idx, capset) in self.capsets.iter().enumerate() {
                if alloc[idx] >= servable[idx] || !self.fits(&usage, capset) {
                    continue;
                }
                alloc[idx] += 1;
                let candidate = self.score(backlog, &alloc);
                alloc[idx] -= 1;

                let improves = candidate.compare(&current) == Ordering::Less;
                let beats_best = best
                    .as_ref()
                    .is_none_or(|(_, best_score)| candidate.compare(best_score) == Ordering::Less);
                if improves && beats_best {
                    best = Some((idx, candidate));
                }
            }
            let Some((idx, score)) = best else { break };

            alloc[idx] += 1;
            total += 1;
            for capability in self.capsets[idx].iter() {
                *usage.entry(capability).or_insert(0.0) += self.limits.cost_of(capability);
            }
            current = score;
        }

        trace!(total, unserved = current.unserved, "exchange allocation computed");
        self.last_total = total;
        self.capsets.iter().cloned().zip(alloc).collect()
    }

    fn is_idle(&self) -> bool {
        self.last_total == 0
    }
}
