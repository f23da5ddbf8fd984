//! Builders to construct schedulers from configuration.

use std::sync::Arc;

use crate::config::SchedulerConfig;
use crate::core::{
    Actor, ActorFactory, Backend, Blueprint, CapabilitySet, CapsetExchange, ResourceExchange,
    Scheduler, SchedulerError,
};
use crate::infra::select_backend;

/// Build a scheduler from configuration and a blueprint.
///
/// # Errors
///
/// [`SchedulerError::InvalidConfig`] if the configuration or blueprint is invalid.
pub fn build_scheduler<A, R>(
    cfg: &SchedulerConfig,
    blueprint: Blueprint<A, R>,
) -> Result<Scheduler<A, R>, SchedulerError>
where
    A: Clone + Send + 'static,
    R: Send + 'static,
{
    SchedulerBuilder::from_config(cfg.clone()).blueprint(blueprint).build()
}

/// Fluent scheduler construction.
///
/// ```rust,ignore
/// let scheduler = SchedulerBuilder::new()
///     .actor(CapabilitySet::of(["gpu"]), || GpuActor::default())
///     .actor(CapabilitySet::of(["cpu"]), || CpuActor::default())
///     .limit("gpu", 2.0)
///     .build()?;
/// ```
pub struct SchedulerBuilder<A, R>
where
    A: Clone + Send + 'static,
    R: Send + 'static,
{
    config: SchedulerConfig,
    blueprint: Blueprint<A, R>,
    backend: Option<Arc<dyn Backend<A, R>>>,
    exchange: Option<Box<dyn ResourceExchange>>,
}

impl<A, R> Default for SchedulerBuilder<A, R>
where
    A: Clone + Send + 'static,
    R: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<A, R> SchedulerBuilder<A, R>
where
    A: Clone + Send + 'static,
    R: Send + 'static,
{
    /// Builder with default configuration and an empty blueprint.
    #[must_use]
    pub fn new() -> Self {
        Self::from_config(SchedulerConfig::default())
    }

    /// Builder seeded with `config`.
    #[must_use]
    pub fn from_config(config: SchedulerConfig) -> Self {
        Self {
            config,
            blueprint: Blueprint::new(),
            backend: None,
            exchange: None,
        }
    }

    /// Provision workers for `capset` using an actor closure.
    #[must_use]
    pub fn actor<F, T>(self, capset: CapabilitySet, factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
        T: Actor<A, R>,
    {
        self.factory(capset, Arc::new(factory))
    }

    /// Provision workers for `capset` using any [`ActorFactory`].
    #[must_use]
    pub fn factory(mut self, capset: CapabilitySet, factory: Arc<dyn ActorFactory<A, R>>) -> Self {
        self.blueprint.insert(capset, factory);
        self
    }

    /// Add every entry of `blueprint`.
    #[must_use]
    pub fn blueprint(mut self, blueprint: Blueprint<A, R>) -> Self {
        self.blueprint.extend(blueprint);
        self
    }

    /// Limit a capability to `quantity` units.
    #[must_use]
    pub fn limit(mut self, capability: impl Into<String>, quantity: f64) -> Self {
        self.config.resource_limits.insert(capability.into(), quantity);
        self
    }

    /// Run on a custom backend instead of the configured one.
    #[must_use]
    pub fn backend(mut self, backend: Arc<dyn Backend<A, R>>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Allocate with a custom exchange instead of [`CapsetExchange`].
    #[must_use]
    pub fn exchange(mut self, exchange: Box<dyn ResourceExchange>) -> Self {
        self.exchange = Some(exchange);
        self
    }

    /// Validate and start the scheduler.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::InvalidConfig`] on invalid configuration or an empty
    /// blueprint; engine start errors otherwise.
    pub fn build(self) -> Result<Scheduler<A, R>, SchedulerError> {
        self.config
            .validate()
            .map_err(|e| SchedulerError::InvalidConfig(format!("config invalid: {e}")))?;

        let limits = self.config.resource_limits();
        limits.validate().map_err(SchedulerError::InvalidConfig)?;
        let exchange = self.exchange.unwrap_or_else(|| {
            Box::new(CapsetExchange::new(self.blueprint.keys().cloned(), limits))
        });
        let backend = self
            .backend
            .unwrap_or_else(|| select_backend(self.config.backend));

        Ok(
            Scheduler::with_exchange(self.blueprint, exchange, backend, self.config.verbose)?
                .with_stall_check(self.config.stall_check()),
        )
    }
}
