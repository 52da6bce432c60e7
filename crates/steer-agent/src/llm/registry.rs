//! LLM configuration store and the registry holding the current binding.
//!
//! The registry owns model lifetimes; sessions observe it and only promote
//! a binding to a strong hold for the duration of one request.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::info;

use super::openai::OpenAiCompatibleModel;
use super::{ChatModel, LlmConfig};
use crate::{Error, Result};

/// Narrow seam over configuration persistence: `get(id) → Config | NotFound`.
pub trait LlmConfigStore: Send + Sync {
    fn get(&self, id: &str) -> Option<LlmConfig>;
}

/// In-memory store; the process owner seeds it at startup.
#[derive(Default)]
pub struct MemoryConfigStore {
    configs: std::sync::RwLock<HashMap<String, LlmConfig>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, config: LlmConfig) {
        self.configs
            .write()
            .unwrap()
            .insert(config.id.clone(), config);
    }
}

impl LlmConfigStore for MemoryConfigStore {
    fn get(&self, id: &str) -> Option<LlmConfig> {
        self.configs.read().unwrap().get(id).cloned()
    }
}

/// Builds a live model client from a configuration.
pub type ModelFactory = Arc<dyn Fn(&LlmConfig) -> Arc<dyn ChatModel> + Send + Sync>;

struct CurrentBinding {
    config: LlmConfig,
    model: Arc<dyn ChatModel>,
}

/// Process-wide holder of the current model binding.
pub struct ModelRegistry {
    store: Arc<dyn LlmConfigStore>,
    factory: ModelFactory,
    current: RwLock<Option<CurrentBinding>>,
}

impl ModelRegistry {
    pub fn new(store: Arc<dyn LlmConfigStore>) -> Self {
        Self::with_factory(
            store,
            Arc::new(|cfg: &LlmConfig| {
                Arc::new(OpenAiCompatibleModel::new(cfg.clone())) as Arc<dyn ChatModel>
            }),
        )
    }

    /// Custom factory; the tests use it to splice in scripted models.
    pub fn with_factory(store: Arc<dyn LlmConfigStore>, factory: ModelFactory) -> Self {
        Self {
            store,
            factory,
            current: RwLock::new(None),
        }
    }

    pub fn store(&self) -> &Arc<dyn LlmConfigStore> {
        &self.store
    }

    /// Build a model for a config without touching the current binding.
    /// Used by the one-shot per-request override.
    pub fn build(&self, config: &LlmConfig) -> Arc<dyn ChatModel> {
        (self.factory)(config)
    }

    /// Switch the current binding to the named configuration.
    pub async fn set_config(&self, id: &str) -> Result<LlmConfig> {
        if id.trim().is_empty() {
            return Err(Error::ConfigIdEmpty);
        }
        let config = self
            .store
            .get(id)
            .ok_or_else(|| Error::ConfigNotFound(id.to_string()))?;
        let model = self.build(&config);

        info!(config_id = %config.id, model = %config.model, "llm binding set");
        *self.current.write().await = Some(CurrentBinding {
            config: config.clone(),
            model,
        });
        Ok(config)
    }

    /// Rebuild the current binding from the store, picking up edits made
    /// behind the same config id.
    pub async fn reload(&self) -> Result<()> {
        let id = {
            let guard = self.current.read().await;
            guard
                .as_ref()
                .map(|b| b.config.id.clone())
                .ok_or_else(|| Error::ModelUnavailable("no llm config set".into()))?
        };
        self.set_config(&id).await?;
        info!(config_id = %id, "llm binding reloaded");
        Ok(())
    }

    /// The current model client.
    pub async fn current(&self) -> Result<Arc<dyn ChatModel>> {
        self.current
            .read()
            .await
            .as_ref()
            .map(|b| b.model.clone())
            .ok_or_else(|| Error::ModelUnavailable("no llm config set".into()))
    }

    pub async fn current_info(&self) -> Option<Value> {
        self.current
            .read()
            .await
            .as_ref()
            .map(|b| provider_info(&b.config))
    }
}

/// Public summary of a configuration. Never includes the key.
pub fn provider_info(config: &LlmConfig) -> Value {
    json!({
        "id": config.id,
        "display_name": config.display_name,
        "model": config.model,
        "api_base": config.api_base,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::scripted::ScriptedModel;

    fn store_with(ids: &[&str]) -> Arc<MemoryConfigStore> {
        let store = Arc::new(MemoryConfigStore::new());
        for id in ids {
            store.insert(LlmConfig {
                id: id.to_string(),
                display_name: format!("Model {id}"),
                api_base: "https://llm.local/v1/chat/completions".into(),
                api_key: "secret".into(),
                model: format!("model-{id}"),
                temperature: 0.7,
            });
        }
        store
    }

    fn scripted_registry(store: Arc<MemoryConfigStore>) -> ModelRegistry {
        ModelRegistry::with_factory(
            store,
            Arc::new(|cfg: &LlmConfig| {
                Arc::new(ScriptedModel::new(&cfg.id, vec![])) as Arc<dyn ChatModel>
            }),
        )
    }

    #[tokio::test]
    async fn set_config_switches_the_binding() {
        let registry = scripted_registry(store_with(&["m1", "m2"]));
        assert!(registry.current().await.is_err());

        registry.set_config("m1").await.unwrap();
        assert_eq!(registry.current().await.unwrap().id(), "m1");

        registry.set_config("m2").await.unwrap();
        assert_eq!(registry.current().await.unwrap().id(), "m2");
    }

    #[tokio::test]
    async fn unknown_or_empty_config_ids_are_rejected() {
        let registry = scripted_registry(store_with(&["m1"]));
        assert!(matches!(
            registry.set_config("missing").await,
            Err(Error::ConfigNotFound(_))
        ));
        assert!(matches!(
            registry.set_config("  ").await,
            Err(Error::ConfigIdEmpty)
        ));
    }

    #[tokio::test]
    async fn reload_requires_a_binding_and_rebuilds_it() {
        let store = store_with(&["m1"]);
        let registry = scripted_registry(store.clone());
        assert!(registry.reload().await.is_err());

        registry.set_config("m1").await.unwrap();
        registry.reload().await.unwrap();
        assert_eq!(registry.current().await.unwrap().id(), "m1");
    }

    #[tokio::test]
    async fn provider_info_never_leaks_the_key() {
        let store = store_with(&["m1"]);
        let registry = scripted_registry(store.clone());
        registry.set_config("m1").await.unwrap();

        let info = registry.current_info().await.unwrap();
        assert_eq!(info["id"], "m1");
        assert!(info.get("api_key").is_none());
        assert!(!info.to_string().contains("secret"));
    }
}
