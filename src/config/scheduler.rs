//! Scheduler configuration: resource limits, backend selection and timings.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{Capability, ResourceLimits};

/// Prefix of every environment variable read by [`SchedulerConfig::from_env`].
pub const ENV_PREFIX: &str = "CAPSCHED_";

/// Built-in execution backend selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Actors run on the engine run-loop.
    #[default]
    Inline,
    /// One dedicated OS thread per worker.
    Threads,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Inline => "inline",
            Self::Threads => "threads",
        })
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inline" => Ok(Self::Inline),
            "threads" | "thread" => Ok(Self::Threads),
            other => Err(format!("unknown backend `{other}` (expected inline or threads)")),
        }
    }
}

fn default_max_workers() -> usize {
    num_cpus::get()
}

const fn default_stall_check_ms() -> u64 {
    500
}

/// Root scheduler configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Available quantity per capability.
    #[serde(default)]
    pub resource_limits: BTreeMap<String, f64>,
    /// Per-worker cost per capability; unlisted capabilities cost 1.0.
    #[serde(default)]
    pub capability_costs: BTreeMap<String, f64>,
    /// Cap on the total number of running workers.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Execution backend.
    #[serde(default)]
    pub backend: BackendKind,
    /// Log lifecycle events at `info` instead of `debug`.
    #[serde(default)]
    pub verbose: bool,
    /// Silent drain interval before checking for stalled work.
    #[serde(default = "default_stall_check_ms")]
    pub stall_check_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            resource_limits: BTreeMap::new(),
            capability_costs: BTreeMap::new(),
            max_workers: default_max_workers(),
            backend: BackendKind::default(),
            verbose: false,
            stall_check_ms: default_stall_check_ms(),
        }
    }
}

fn parse_quantities(var: &str, raw: &str) -> Result<BTreeMap<String, f64>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (name, value) = entry
                .split_once('=')
                .ok_or_else(|| format!("{var}: expected name=value, got `{entry}`"))?;
            let value = value
                .trim()
                .parse::<f64>()
                .map_err(|e| format!("{var}: bad value for `{}`: {e}", name.trim()))?;
            Ok((name.trim().to_string(), value))
        })
        .collect()
}

fn check_quantities(what: &str, values: &BTreeMap<String, f64>) -> Result<(), String> {
    for (name, value) in values {
        if name.is_empty() {
            return Err(format!("{what}: capability name must not be empty"));
        }
        if !value.is_finite() || *value < 0.0 {
            return Err(format!(
                "{what} for `{name}` must be finite and non-negative, got {value}"
            ));
        }
    }
    Ok(())
}

impl SchedulerConfig {
    /// Validate all values.
    ///
    /// # Errors
    ///
    /// Returns a message describing the first invalid value.
    pub fn validate(&self) -> Result<(), String> {
        check_quantities("resource limit", &self.resource_limits)?;
        check_quantities("capability cost", &self.capability_costs)?;
        if self.max_workers == 0 {
            return Err("max_workers must be greater than 0".into());
        }
        if self.stall_check_ms == 0 {
            return Err("stall_check_ms must be greater than 0".into());
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns a parse or validation message.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from `CAPSCHED_*` environment variables, reading `.env` first if present.
    ///
    /// # Errors
    ///
    /// Returns a parse or validation message.
    pub fn from_env() -> Result<Self, String> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup; unset keys keep their defaults.
    ///
    /// Recognized keys: `CAPSCHED_RESOURCE_LIMITS` and `CAPSCHED_CAPABILITY_COSTS`
    /// (`gpu=1,cpu=4`), `CAPSCHED_MAX_WORKERS`, `CAPSCHED_BACKEND`,
    /// `CAPSCHED_VERBOSE`, `CAPSCHED_STALL_CHECK_MS`.
    ///
    /// # Errors
    ///
    /// Returns a parse or validation message naming the offending key.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            let key = format!("{ENV_PREFIX}{name}");
            lookup(&key).map(|value| (key, value))
        };
        let mut cfg = Self::default();

        if let Some((key, raw)) = var("RESOURCE_LIMITS") {
            cfg.resource_limits = parse_quantities(&key, &raw)?;
        }
        if let Some((key, raw)) = var("CAPABILITY_COSTS") {
            cfg.capability_costs = parse_quantities(&key, &raw)?;
        }
        if let Some((key, raw)) = var("MAX_WORKERS") {
            cfg.max_workers = raw.trim().parse().map_err(|e| format!("{key}: {e}"))?;
        }
        if let Some((key, raw)) = var("BACKEND") {
            cfg.backend = raw.parse().map_err(|e| format!("{key}: {e}"))?;
        }
        if let Some((key, raw)) = var("VERBOSE") {
            cfg.verbose = match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" | "" => false,
                other => return Err(format!("{key}: expected a boolean, got `{other}`")),
            };
        }
        if let Some((key, raw)) = var("STALL_CHECK_MS") {
            cfg.stall_check_ms = raw.trim().parse().map_err(|e| format!("{key}: {e}"))?;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Resource limits for the exchange.
    #[must_use]
    pub fn resource_limits(&self) -> ResourceLimits {
        ResourceLimits {
            limits: self
                .resource_limits
                .iter()
                .map(|(name, quantity)| (Capability::new(name.as_str()), *quantity))
                .collect(),
            costs: self
                .capability_costs
                .iter()
                .map(|(name, cost)| (Capability::new(name.as_str()), *cost))
                .collect(),
            max_workers: Some(self.max_workers),
        }
    }

    /// Stall-check interval as a [`Duration`].
    #[must_use]
    pub const fn stall_check(&self) -> Duration {
        Duration::from_millis(self.stall_check_ms)
    }
}
