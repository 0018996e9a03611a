//! Model Catalog - per-model context window and confidence threshold
//!
//! Read-only after startup. Lookups for models that were never described
//! fall back to a conservative context window and the default confidence
//! threshold instead of failing.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Context window used when a model is not in the catalog.
pub const DEFAULT_CONTEXT_WINDOW: u32 = 2048;

/// Minimum probability (0–100) for a reply to count as confident when the
/// model has no configured threshold.
pub const DEFAULT_CONFIDENCE_THRESHOLD: u8 = 55;

/// Static description of a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub name: String,
    /// Context window in tokens passed to the backend as `num_ctx`.
    pub context_window: u32,
    /// Replies below this probability are not confident.
    pub confidence_threshold: u8,
}

impl ModelDescriptor {
    /// Descriptor carrying the catalog defaults.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            context_window: DEFAULT_CONTEXT_WINDOW,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }

    pub fn with_context_window(mut self, context_window: u32) -> Self {
        self.context_window = context_window;
        self
    }

    pub fn with_threshold(mut self, threshold: u8) -> Self {
        self.confidence_threshold = threshold.min(100);
        self
    }
}

/// Catalog of known models.
#[derive(Debug, Clone, Default)]
pub struct ModelCatalog {
    entries: HashMap<String, ModelDescriptor>,
}

impl ModelCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog from descriptors. Later duplicates replace earlier ones.
    pub fn from_descriptors(descriptors: impl IntoIterator<Item = ModelDescriptor>) -> Self {
        let mut catalog = Self::new();
        for descriptor in descriptors {
            catalog.insert(descriptor);
        }
        catalog
    }

    pub fn insert(&mut self, descriptor: ModelDescriptor) {
        self.entries.insert(descriptor.name.clone(), descriptor);
    }

    pub fn get(&self, name: &str) -> Option<&ModelDescriptor> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Descriptor for `name`, falling back to defaults for unknown models.
    pub fn descriptor(&self, name: &str) -> ModelDescriptor {
        self.get(name)
            .cloned()
            .unwrap_or_else(|| ModelDescriptor::new(name))
    }

    pub fn context_window(&self, name: &str) -> u32 {
        self.get(name)
            .map(|d| d.context_window)
            .unwrap_or(DEFAULT_CONTEXT_WINDOW)
    }

    pub fn threshold(&self, name: &str) -> u8 {
        self.get(name)
            .map(|d| d.confidence_threshold)
            .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD)
    }

    /// Model names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
