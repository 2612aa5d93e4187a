//! Adapter registry
//!
//! Maps system names to adapter instances so the engine and resolver can
//! address systems by the names stored in run state and log entries.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{AdapterError, AdapterResult};
use crate::traits::IdentityAdapter;

/// Shared adapter handle.
pub type BoxedAdapter = Arc<dyn IdentityAdapter>;

/// Registry of adapters keyed by system name.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, BoxedAdapter>,
}

impl AdapterRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own system name, replacing any previous one.
    pub fn register(&mut self, adapter: BoxedAdapter) {
        let name = adapter.system_name().to_string();
        tracing::debug!(system = %name, "Registered identity adapter");
        self.adapters.insert(name, adapter);
    }

    /// Register an adapter using builder pattern.
    #[must_use]
    pub fn with(mut self, adapter: BoxedAdapter) -> Self {
        self.register(adapter);
        self
    }

    /// Look up the adapter for `system`.
    pub fn get(&self, system: &str) -> AdapterResult<BoxedAdapter> {
        self.adapters
            .get(system)
            .cloned()
            .ok_or_else(|| AdapterError::unknown_system(system))
    }

    /// Whether an adapter is registered for `system`.
    pub fn contains(&self, system: &str) -> bool {
        self.adapters.contains_key(system)
    }

    /// Registered system names.
    pub fn systems(&self) -> impl Iterator<Item = &str> {
        self.adapters.keys().map(String::as_str)
    }
}

impl fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut systems: Vec<&str> = self.systems().collect();
        systems.sort_unstable();
        f.debug_struct("AdapterRegistry")
            .field("systems", &systems)
            .finish()
    }
}
