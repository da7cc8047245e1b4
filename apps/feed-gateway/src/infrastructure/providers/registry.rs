//! Provider Registry
//!
//! Maps provider names to adapter constructors. The multiplexer asks the
//! registry for a fresh adapter on every first login.

use std::collections::HashMap;
use std::sync::Arc;

use crate::application::ports::{EventSink, ProviderAdapter, ProviderError, ProviderFactory};
use crate::infrastructure::config::SimulatedSettings;

use super::simulated::{SIMULATED, SimulatedProvider};

/// Builds an adapter publishing into the given sink.
pub type ProviderConstructor =
    Arc<dyn Fn(Arc<dyn EventSink>) -> Arc<dyn ProviderAdapter> + Send + Sync>;

/// Name to constructor map implementing `ProviderFactory`.
#[derive(Default)]
pub struct ProviderRegistry {
    constructors: HashMap<String, ProviderConstructor>,
}

impl ProviderRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in simulated provider.
    #[must_use]
    pub fn with_simulated(settings: SimulatedSettings) -> Self {
        let mut registry = Self::new();
        registry.register(SIMULATED, move |sink| {
            Arc::new(SimulatedProvider::new(settings.clone(), sink)) as Arc<dyn ProviderAdapter>
        });
        registry
    }

    /// Register a constructor, replacing any previous one under `name`.
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F) -> &mut Self
    where
        F: Fn(Arc<dyn EventSink>) -> Arc<dyn ProviderAdapter> + Send + Sync + 'static,
    {
        self.constructors.insert(name.into(), Arc::new(constructor));
        self
    }

    /// Whether a provider is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Registered provider names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.constructors.keys().cloned().collect();
        names.sort();
        names
    }
}

impl ProviderFactory for ProviderRegistry {
    fn supports(&self, provider: &str) -> bool {
        self.contains(provider)
    }

    fn create(
        &self,
        provider: &str,
        sink: Arc<dyn EventSink>,
    ) -> Result<Arc<dyn ProviderAdapter>, ProviderError> {
        let constructor =
            self.constructors
                .get(provider)
                .ok_or_else(|| ProviderError::UnknownProvider {
                    provider: provider.to_string(),
                })?;
        Ok(constructor(sink))
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .finish()
    }
}
