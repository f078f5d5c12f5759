// ABOUTME: Model catalog consulted to validate requested model ids
// ABOUTME: Static catalog built from configuration with an optional default model
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Colloquy Contributors

/// Source of the model ids callers are allowed to request
pub trait ModelCatalog: Send + Sync {
    /// Whether `model_id` may be requested
    fn contains(&self, model_id: &str) -> bool;

    /// Model used when a turn does not name one
    fn default_model(&self) -> Option<&str>;

    /// Every known model id
    fn models(&self) -> Vec<String>;
}

/// Catalog fixed at startup
///
/// An empty catalog with no default accepts no explicit model ids; turns then
/// always use the provider's default model.
#[derive(Debug, Clone, Default)]
pub struct StaticModelCatalog {
    models: Vec<String>,
    default_model: Option<String>,
}

impl StaticModelCatalog {
    /// Build a catalog; the default model is added to the list if missing
    #[must_use]
    pub fn new(models: Vec<String>, default_model: Option<String>) -> Self {
        let mut models = models;
        if let Some(default) = &default_model {
            if !models.contains(default) {
                models.insert(0, default.clone());
            }
        }
        Self {
            models,
            default_model,
        }
    }
}

impl ModelCatalog for StaticModelCatalog {
    fn contains(&self, model_id: &str) -> bool {
        self.models.iter().any(|m| m == model_id)
    }

    fn default_model(&self) -> Option<&str> {
        self.default_model.as_deref()
    }

    fn models(&self) -> Vec<String> {
        self.models.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_member() {
        let catalog = StaticModelCatalog::new(vec!["a".into()], Some("b".into()));
        assert!(catalog.contains("a"));
        assert!(catalog.contains("b"));
        assert!(!catalog.contains("c"));
        assert_eq!(catalog.default_model(), Some("b"));
        assert_eq!(catalog.models(), vec!["b".to_owned(), "a".to_owned()]);
    }
}
