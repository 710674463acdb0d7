//! Model registry: resolves model ids to provider services

use super::{LlmError, LlmErrorKind, LlmService, LoggingService, OpenAIConfig, OpenAIService};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Configuration for the chat model provider
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub openai_api_key: Option<String>,
    pub base_url: String,
    /// Model used when a request names none
    pub default_model: String,
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            base_url: super::DEFAULT_BASE_URL.to_string(),
            default_model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
        }
    }
}

impl LlmConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let temperature = match std::env::var("OPENAI_TEMPERATURE") {
            Ok(raw) => raw.parse().unwrap_or_else(|_| {
                tracing::warn!(value = %raw, "Invalid OPENAI_TEMPERATURE, using default");
                defaults.temperature
            }),
            Err(_) => defaults.temperature,
        };

        Self {
            openai_api_key: std::env::var("OPENAI_API_KEY")
                .ok()
                .filter(|k| !k.is_empty()),
            base_url: std::env::var("OPENAI_BASE_URL").unwrap_or(defaults.base_url),
            default_model: std::env::var("OPENAI_MODEL_NAME")
                .ok()
                .filter(|m| !m.is_empty())
                .unwrap_or(defaults.default_model),
            temperature,
        }
    }
}

/// Registry of available LLM models
///
/// Services registered explicitly take precedence. Any other id is served by
/// the configured `OpenAI`-compatible provider, created on first use.
pub struct ModelRegistry {
    services: RwLock<HashMap<String, Arc<dyn LlmService>>>,
    config: LlmConfig,
}

impl ModelRegistry {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            services: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Create a registry with no provider, for tests
    #[cfg(test)]
    pub fn new_empty() -> Self {
        Self::new(LlmConfig {
            default_model: "test-model".to_string(),
            ..LlmConfig::default()
        })
    }

    /// Register a service under its model id
    #[cfg(test)]
    pub fn register(&self, service: Arc<dyn LlmService>) {
        let id = service.model_id().to_string();
        self.services
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, service);
    }

    /// Get the default model ID
    pub fn default_model_id(&self) -> &str {
        &self.config.default_model
    }

    /// Check whether a provider can serve unregistered models
    pub fn has_provider(&self) -> bool {
        self.config.openai_api_key.is_some()
    }

    /// Resolve a model id, falling back to the default when none is given
    pub fn resolve(&self, model_id: Option<&str>) -> Result<Arc<dyn LlmService>, LlmError> {
        let id = model_id
            .filter(|m| !m.is_empty())
            .unwrap_or(&self.config.default_model);

        if let Some(service) = self
            .services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
        {
            return Ok(service.clone());
        }

        let Some(api_key) = self.config.openai_api_key.clone() else {
            return Err(LlmError::new(
                LlmErrorKind::InvalidRequest,
                format!("No provider configured for model '{id}'"),
            ));
        };

        let inner = OpenAIService::new(OpenAIConfig {
            api_key,
            base_url: self.config.base_url.clone(),
            model: id.to_string(),
            temperature: Some(self.config.temperature),
        })?;
        let service: Arc<dyn LlmService> = Arc::new(LoggingService::new(Arc::new(inner)));

        tracing::info!(model = %id, "Created model service");
        Ok(self
            .services
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id.to_string())
            .or_insert(service)
            .clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::testing::MockLlmService;

    #[test]
    fn test_no_api_key_no_models() {
        let registry = ModelRegistry::new(LlmConfig::default());
        assert!(!registry.has_provider());
        let err = registry.resolve(None).err().unwrap();
        assert_eq!(err.kind, LlmErrorKind::InvalidRequest);
        assert!(err.message.contains(DEFAULT_MODEL));
    }

    #[test]
    fn test_registered_service_wins() {
        let registry = ModelRegistry::new_empty();
        registry.register(Arc::new(MockLlmService::new("test-model")));

        assert_eq!(registry.resolve(None).unwrap().model_id(), "test-model");
        assert_eq!(
            registry.resolve(Some("test-model")).unwrap().model_id(),
            "test-model"
        );
        assert!(registry.resolve(Some("other")).is_err());
    }

    #[test]
    fn test_provider_creates_requested_model_once() {
        let registry = ModelRegistry::new(LlmConfig {
            openai_api_key: Some("sk-test".to_string()),
            ..LlmConfig::default()
        });

        let default = registry.resolve(None).unwrap();
        assert_eq!(default.model_id(), DEFAULT_MODEL);

        let first = registry.resolve(Some("gpt-4o-mini")).unwrap();
        let second = registry.resolve(Some("gpt-4o-mini")).unwrap();
        assert_eq!(first.model_id(), "gpt-4o-mini");
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_empty_model_name_uses_default() {
        let registry = ModelRegistry::new_empty();
        registry.register(Arc::new(MockLlmService::new("test-model")));
        assert_eq!(registry.resolve(Some("")).unwrap().model_id(), "test-model");
    }
}
