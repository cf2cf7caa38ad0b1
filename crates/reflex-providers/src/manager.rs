use std::sync::Arc;

use tracing::warn;

use crate::entities::{AIModelEntity, ModelType, ProviderEntity};
use crate::error::ProviderError;
use crate::provider::{ModelProvider, SharedProvider};
use crate::result::{ChatInvocation, LlmResponse, TextEmbeddingResult};

/// Registry of configured providers, in registration order.
#[derive(Clone, Default)]
pub struct ProviderManager {
    providers: Vec<SharedProvider>,
}

impl ProviderManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: SharedProvider) -> Result<(), ProviderError> {
        if self.providers.iter().any(|p| p.id() == provider.id()) {
            return Err(ProviderError::Value(format!(
                "provider already registered: {}",
                provider.id()
            )));
        }
        self.providers.push(provider);
        Ok(())
    }

    pub fn with_provider<P: ModelProvider + 'static>(mut self, provider: P) -> Result<Self, ProviderError> {
        self.register(Arc::new(provider))?;
        Ok(self)
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn get(&self, provider: &str) -> Result<SharedProvider, ProviderError> {
        self.providers
            .iter()
            .find(|p| p.id() == provider)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownProvider(provider.to_string()))
    }

    /// Provider descriptors, optionally only those serving `model_type`.
    pub fn provider_list(&self, model_type: Option<ModelType>) -> Vec<ProviderEntity> {
        self.providers
            .iter()
            .map(|p| p.entity())
            .filter(|entity| model_type.is_none_or(|t| entity.supports(t)))
            .cloned()
            .collect()
    }

    /// Every provider serving `model_type`, paired with its models of that
    /// type. Providers whose lookup fails are logged and left out.
    pub async fn models_by_model_type(
        &self,
        model_type: ModelType,
    ) -> Vec<(ProviderEntity, Vec<AIModelEntity>)> {
        let mut out = Vec::new();
        for provider in &self.providers {
            let entity = provider.entity();
            if !entity.supports(model_type) {
                continue;
            }
            match provider.list_models(model_type).await {
                Ok(models) => out.push((entity.clone(), models)),
                Err(err) => warn!(
                    target: "reflex::providers",
                    provider = %entity.provider,
                    model_type = model_type.as_str(),
                    "model lookup failed: {err}"
                ),
            }
        }
        out
    }

    /// All models of one provider across every model type. A failing type is
    /// logged and skipped so the rest still lists.
    pub async fn list_models(&self, provider: &str) -> Result<Vec<AIModelEntity>, ProviderError> {
        let provider = self.get(provider)?;
        let mut models = Vec::new();
        for model_type in ModelType::ALL {
            match provider.list_models(model_type).await {
                Ok(found) => models.extend(found),
                Err(err) => warn!(
                    target: "reflex::providers",
                    provider = %provider.id(),
                    model_type = model_type.as_str(),
                    "model lookup failed: {err}"
                ),
            }
        }
        Ok(models)
    }

    pub async fn invoke_chat(
        &self,
        provider: &str,
        invocation: ChatInvocation,
    ) -> Result<LlmResponse, ProviderError> {
        self.get(provider)?.invoke_chat(invocation).await
    }

    pub async fn invoke_embedding(
        &self,
        provider: &str,
        model: &str,
        texts: Vec<String>,
        user: Option<String>,
    ) -> Result<TextEmbeddingResult, ProviderError> {
        self.get(provider)?.invoke_embedding(model, texts, user).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InvokeError;
    use crate::synthetic::SyntheticProvider;
    use async_trait::async_trait;

    struct FlakyProvider {
        entity: ProviderEntity,
    }

    impl FlakyProvider {
        fn new() -> Self {
            Self {
                entity: ProviderEntity {
                    provider: "flaky".into(),
                    label: "Flaky".into(),
                    supported_model_types: vec![ModelType::Llm, ModelType::TextEmbedding],
                },
            }
        }
    }

    #[async_trait]
    impl ModelProvider for FlakyProvider {
        fn entity(&self) -> &ProviderEntity {
            &self.entity
        }

        async fn list_models(
            &self,
            model_type: ModelType,
        ) -> Result<Vec<AIModelEntity>, ProviderError> {
            match model_type {
                ModelType::Llm => Ok(vec![AIModelEntity::new("flaky-chat", ModelType::Llm)]),
                ModelType::TextEmbedding => {
                    Err(InvokeError::ServerUnavailable("down".into()).into())
                }
                _ => Ok(Vec::new()),
            }
        }

        async fn invoke_chat(
            &self,
            _invocation: ChatInvocation,
        ) -> Result<LlmResponse, ProviderError> {
            Err(InvokeError::Connection("refused".into()).into())
        }

        async fn invoke_embedding(
            &self,
            _model: &str,
            _texts: Vec<String>,
            _user: Option<String>,
        ) -> Result<TextEmbeddingResult, ProviderError> {
            Err(InvokeError::Connection("refused".into()).into())
        }
    }

    fn manager() -> ProviderManager {
        ProviderManager::new()
            .with_provider(SyntheticProvider::new())
            .and_then(|m| m.with_provider(FlakyProvider::new()))
            .expect("providers register")
    }

    #[tokio::test]
    async fn failing_model_type_is_skipped() {
        let models = manager().list_models("flaky").await.expect("listing");
        let names: Vec<_> = models.iter().map(|m| m.model.as_str()).collect();
        assert_eq!(names, vec!["flaky-chat"]);
    }

    #[tokio::test]
    async fn unknown_provider_is_reported() {
        let err = manager().list_models("nope").await.expect_err("unknown");
        assert!(matches!(err, ProviderError::UnknownProvider(name) if name == "nope"));
    }

    #[tokio::test]
    async fn models_by_type_skips_failing_providers() {
        let found = manager()
            .models_by_model_type(ModelType::TextEmbedding)
            .await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0.provider, "synthetic");
    }

    #[test]
    fn provider_list_filters_by_type() {
        let manager = manager();
        assert_eq!(manager.provider_list(None).len(), 2);
        let rerank = manager.provider_list(Some(ModelType::Rerank));
        assert!(rerank.is_empty());
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let err = manager()
            .with_provider(SyntheticProvider::new())
            .err()
            .expect("duplicate rejected");
        assert!(matches!(err, ProviderError::Value(_)));
    }
}
