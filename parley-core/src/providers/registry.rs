//! Provider registry
//!
//! Maps provider ids to adapters. Built once at startup, then shared behind
//! an `Arc` by every router call.

use crate::protocol::ProviderDescriptor;
use crate::providers::adapter::ChatAdapter;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Insertion-ordered map of adapters keyed by provider id
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    adapters: Vec<Arc<dyn ChatAdapter>>,
    index: HashMap<String, usize>,
}

impl ProviderRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter
    pub fn register(&mut self, adapter: impl ChatAdapter + 'static) -> &mut Self {
        self.register_arc(Arc::new(adapter))
    }

    /// Register a shared adapter.
    ///
    /// Re-registering an id replaces the adapter but keeps its original
    /// position in [`list`](Self::list).
    pub fn register_arc(&mut self, adapter: Arc<dyn ChatAdapter>) -> &mut Self {
        let id = adapter.id().to_string();
        match self.index.get(&id) {
            Some(&slot) => {
                warn!(provider = %id, "replacing registered provider");
                self.adapters[slot] = adapter;
            }
            None => {
                debug!(provider = %id, "registering provider");
                self.index.insert(id, self.adapters.len());
                self.adapters.push(adapter);
            }
        }
        self
    }

    /// Builder-style registration
    pub fn with(mut self, adapter: impl ChatAdapter + 'static) -> Self {
        self.register(adapter);
        self
    }

    /// Look up an adapter by id
    pub fn find(&self, id: &str) -> Option<Arc<dyn ChatAdapter>> {
        self.index.get(id).map(|&slot| Arc::clone(&self.adapters[slot]))
    }

    /// Whether `id` is registered
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Descriptors in registration order
    pub fn list(&self) -> Vec<ProviderDescriptor> {
        self.adapters
            .iter()
            .map(|adapter| adapter.descriptor().clone())
            .collect()
    }

    /// Registered ids in registration order
    pub fn ids(&self) -> Vec<String> {
        self.adapters
            .iter()
            .map(|adapter| adapter.id().to_string())
            .collect()
    }

    /// Number of registered providers
    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.ids())
            .finish()
    }
}
