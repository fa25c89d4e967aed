//! Backend providers and priority-ordered selection.
//!
//! Each backend family has one provider. Selection asks providers, in
//! priority order, whether they can serve a configuration, then lets
//! the first match construct the facade. `can_instantiate` is a pure
//! check; nothing is built or spawned until `create`.

use crate::config::{BackendKind, ConcurrencyConfig};
use crate::facade::Concurrency;
use crate::schedule::ScheduleHost;
use log::{debug, info};
use std::sync::Arc;
use thiserror::Error;

/// Errors from backend selection and construction.
#[derive(Error, Debug)]
pub enum SelectorError {
    /// The cooperative backend was requested without a schedule host.
    #[error("cooperative backend requires a schedule host")]
    MissingScheduleHost,

    /// No provider in the list accepted the configuration.
    #[error("no provider can instantiate backend {0:?}")]
    NoCompatibleProvider(BackendKind),
}

/// Environment capabilities a provider may need at construction time.
#[derive(Default)]
pub struct Dependencies {
    /// Event-loop integration for the cooperative backend
    pub schedule_host: Option<Arc<dyn ScheduleHost>>,
}

/// A candidate implementation of one backend family.
pub trait BackendProvider: Send + Sync {
    /// Provider name for diagnostics.
    fn name(&self) -> &'static str;

    /// Whether this provider can serve `config`. Must not allocate
    /// resources or spawn threads.
    fn can_instantiate(&self, config: &ConcurrencyConfig) -> bool;

    /// Build the facade for `config`.
    fn create(
        &self,
        config: &ConcurrencyConfig,
        deps: &Dependencies,
    ) -> Result<Concurrency, SelectorError>;
}

/// Provider for the threaded backend.
pub struct ThreadedProvider;

impl BackendProvider for ThreadedProvider {
    fn name(&self) -> &'static str {
        "threaded"
    }

    fn can_instantiate(&self, config: &ConcurrencyConfig) -> bool {
        config.backend == BackendKind::Threaded
    }

    fn create(
        &self,
        config: &ConcurrencyConfig,
        _deps: &Dependencies,
    ) -> Result<Concurrency, SelectorError> {
        Ok(Concurrency::threaded(config))
    }
}

/// Provider for the cooperative backend.
pub struct CooperativeProvider;

impl BackendProvider for CooperativeProvider {
    fn name(&self) -> &'static str {
        "cooperative"
    }

    fn can_instantiate(&self, config: &ConcurrencyConfig) -> bool {
        config.backend == BackendKind::Cooperative
    }

    fn create(
        &self,
        _config: &ConcurrencyConfig,
        deps: &Dependencies,
    ) -> Result<Concurrency, SelectorError> {
        let host = deps
            .schedule_host
            .as_ref()
            .ok_or(SelectorError::MissingScheduleHost)?;
        Ok(Concurrency::cooperative(Arc::clone(host)))
    }
}

/// Walk `providers` in priority order and build the facade with the
/// first one that accepts `config`.
pub fn select_backend(
    providers: &[&dyn BackendProvider],
    config: &ConcurrencyConfig,
    deps: &Dependencies,
) -> Result<Concurrency, SelectorError> {
    for provider in providers {
        if provider.can_instantiate(config) {
            info!("selected concurrency backend '{}'", provider.name());
            return provider.create(config, deps);
        }
        debug!(
            "provider '{}' cannot serve backend {:?}",
            provider.name(),
            config.backend
        );
    }
    Err(SelectorError::NoCompatibleProvider(config.backend))
}

/// The built-in providers, highest priority first.
pub fn default_providers() -> [&'static dyn BackendProvider; 2] {
    [&ThreadedProvider, &CooperativeProvider]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::StepScheduler;

    #[test]
    fn test_can_instantiate_is_a_kind_check() {
        let threaded = ConcurrencyConfig::threaded();
        let cooperative = ConcurrencyConfig::cooperative();

        assert!(ThreadedProvider.can_instantiate(&threaded));
        assert!(!ThreadedProvider.can_instantiate(&cooperative));
        assert!(CooperativeProvider.can_instantiate(&cooperative));
        assert!(!CooperativeProvider.can_instantiate(&threaded));
    }

    #[test]
    fn test_select_threaded() {
        let facade = select_backend(
            &default_providers(),
            &ConcurrencyConfig::threaded(),
            &Dependencies::default(),
        )
        .unwrap();
        let lock = facade.new_lock();
        lock.lock();
        assert!(lock.is_held_by_current_thread());
        lock.unlock();
    }

    #[test]
    fn test_select_cooperative_requires_host() {
        let config = ConcurrencyConfig::cooperative();
        let result = select_backend(&default_providers(), &config, &Dependencies::default());
        assert!(matches!(result, Err(SelectorError::MissingScheduleHost)));

        let deps = Dependencies {
            schedule_host: Some(Arc::new(StepScheduler::new())),
        };
        assert!(select_backend(&default_providers(), &config, &deps).is_ok());
    }

    #[test]
    fn test_no_compatible_provider() {
        let providers: [&dyn BackendProvider; 1] = [&CooperativeProvider];
        let result = select_backend(
            &providers,
            &ConcurrencyConfig::threaded(),
            &Dependencies::default(),
        );
        assert!(matches!(
            result,
            Err(SelectorError::NoCompatibleProvider(BackendKind::Threaded))
        ));
    }
}
