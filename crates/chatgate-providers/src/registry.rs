//! Model registry for context-window lookups.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use chatgate_core::{Config, Error, Result};

/// Model information relevant to request sizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Model identifier
    pub id: String,
    /// Context window size in tokens
    pub context_window: u32,
}

impl ModelInfo {
    pub fn new(id: impl Into<String>, context_window: u32) -> Self {
        Self {
            id: id.into(),
            context_window,
        }
    }
}

/// Registry of models with known context sizes.
///
/// Dated or suffixed variants (`gpt-4o-2024-08-06`) resolve to the longest
/// registered id they extend.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: HashMap<String, ModelInfo>,
}

impl ModelRegistry {
    /// Create an empty registry.
    pub fn empty() -> Self {
        Self {
            models: HashMap::new(),
        }
    }

    /// Create a registry with the built-in OpenAI chat models.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        for (id, context_window) in [
            ("gpt-3.5-turbo", 16_385),
            ("gpt-3.5-turbo-16k", 16_385),
            ("gpt-4", 8_192),
            ("gpt-4-32k", 32_768),
            ("gpt-4-turbo", 128_000),
            ("gpt-4o", 128_000),
            ("gpt-4o-mini", 128_000),
        ] {
            registry.register(ModelInfo::new(id, context_window));
        }
        registry
    }

    /// Built-in models plus the `[models]` entries from configuration.
    pub fn from_config(config: &Config) -> Self {
        let mut registry = Self::new();
        for (id, context_window) in &config.models {
            registry.register(ModelInfo::new(id.clone(), *context_window));
        }
        registry
    }

    /// Register or replace a model.
    pub fn register(&mut self, model: ModelInfo) {
        self.models.insert(model.id.clone(), model);
    }

    /// Builder-style registration.
    pub fn with_model(mut self, id: impl Into<String>, context_window: u32) -> Self {
        self.register(ModelInfo::new(id, context_window));
        self
    }

    /// Find a model by exact id or by the longest registered prefix.
    pub fn find(&self, model: &str) -> Option<&ModelInfo> {
        if let Some(info) = self.models.get(model) {
            return Some(info);
        }

        self.models
            .values()
            .filter(|info| {
                model
                    .strip_prefix(info.id.as_str())
                    .is_some_and(|rest| rest.starts_with('-'))
            })
            .max_by_key(|info| info.id.len())
    }

    /// Context window for a model, or [`Error::UnsupportedModel`].
    pub fn context_window(&self, model: &str) -> Result<u32> {
        self.find(model)
            .map(|info| info.context_window)
            .ok_or_else(|| Error::UnsupportedModel(model.to_string()))
    }

    /// All registered models, sorted by id.
    pub fn models(&self) -> Vec<&ModelInfo> {
        let mut models: Vec<_> = self.models.values().collect();
        models.sort_by(|a, b| a.id.cmp(&b.id));
        models
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}
