//! Name-based model resolution.
//!
//! Factories are registered once at startup under a name prefix; lookups
//! go through a read-mostly cache so repeated resolution of the same model
//! name constructs a single instance.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use crate::error::{AgentError, Result};

use super::Llm;

/// Builds an [`Llm`] instance for a concrete model name.
pub type LlmFactory = Arc<dyn Fn(&str) -> Result<Arc<dyn Llm>> + Send + Sync>;

/// Registry mapping model-name prefixes to factories.
#[derive(Default)]
pub struct LlmRegistry {
    factories: RwLock<Vec<(String, LlmFactory)>>,
    cache: RwLock<HashMap<String, Arc<dyn Llm>>>,
}

static GLOBAL: OnceLock<LlmRegistry> = OnceLock::new();

impl LlmRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry instance.
    pub fn global() -> &'static Self {
        GLOBAL.get_or_init(Self::new)
    }

    /// Register a factory for all model names starting with `prefix`.
    /// The longest matching prefix wins at resolution time.
    pub fn register(&self, prefix: impl Into<String>, factory: LlmFactory) {
        let mut factories = self.factories.write().expect("registry lock poisoned");
        factories.push((prefix.into(), factory));
        // Invalidate: a new factory may shadow cached misses for its prefix.
        self.cache.write().expect("cache lock poisoned").clear();
    }

    /// Register an already-built instance under its own model name.
    pub fn register_instance(&self, llm: Arc<dyn Llm>) {
        let name = llm.model_name().to_string();
        self.register(name, Arc::new(move |_| Ok(Arc::clone(&llm))));
    }

    /// Resolve a model name to an instance, constructing and caching on
    /// first use.
    pub fn resolve(&self, model: &str) -> Result<Arc<dyn Llm>> {
        if let Some(hit) = self
            .cache
            .read()
            .expect("cache lock poisoned")
            .get(model)
        {
            return Ok(Arc::clone(hit));
        }

        let factory = {
            let factories = self.factories.read().expect("registry lock poisoned");
            factories
                .iter()
                .filter(|(prefix, _)| model.starts_with(prefix.as_str()))
                .max_by_key(|(prefix, _)| prefix.len())
                .map(|(_, factory)| Arc::clone(factory))
        };
        let factory = factory.ok_or_else(|| AgentError::ModelNotFound {
            model: model.to_string(),
        })?;

        let instance = factory(model)?;
        self.cache
            .write()
            .expect("cache lock poisoned")
            .insert(model.to_string(), Arc::clone(&instance));
        Ok(instance)
    }
}

impl std::fmt::Debug for LlmRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefixes: Vec<String> = self
            .factories
            .read()
            .expect("registry lock poisoned")
            .iter()
            .map(|(p, _)| p.clone())
            .collect();
        f.debug_struct("LlmRegistry")
            .field("prefixes", &prefixes)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::mock::MockLlm;

    #[test]
    fn test_resolution_prefers_longest_prefix() {
        let registry = LlmRegistry::new();
        registry.register(
            "mock",
            Arc::new(|name| Ok(Arc::new(MockLlm::scripted(name, Vec::new())) as Arc<dyn Llm>)),
        );
        registry.register(
            "mock-pro",
            Arc::new(|name| {
                Ok(Arc::new(MockLlm::scripted(format!("pro:{name}"), Vec::new())) as Arc<dyn Llm>)
            }),
        );

        let resolved = registry.resolve("mock-pro-1").expect("resolve");
        assert_eq!(resolved.model_name(), "pro:mock-pro-1");
    }

    #[test]
    fn test_resolution_caches_instances() {
        let registry = LlmRegistry::new();
        registry.register(
            "mock",
            Arc::new(|name| Ok(Arc::new(MockLlm::scripted(name, Vec::new())) as Arc<dyn Llm>)),
        );
        let a = registry.resolve("mock-1").expect("resolve");
        let b = registry.resolve("mock-1").expect("resolve");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_unknown_model_is_fatal() {
        let registry = LlmRegistry::new();
        assert!(matches!(
            registry.resolve("nope"),
            Err(AgentError::ModelNotFound { .. })
        ));
    }
}
