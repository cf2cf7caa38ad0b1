use async_trait::async_trait;

use crate::entities::{AIModelEntity, ModelType, ProviderEntity};
use crate::error::ProviderError;
use crate::result::{ChatInvocation, LlmResponse, TextEmbeddingResult};

/// Capability surface of a model provider. The gateway, the reflexion graph
/// and the knowledge-base chat only ever see this trait.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    fn entity(&self) -> &ProviderEntity;

    fn id(&self) -> &str {
        &self.entity().provider
    }

    /// Models of one type. Types the provider does not serve yield an empty
    /// list.
    async fn list_models(&self, model_type: ModelType)
        -> Result<Vec<AIModelEntity>, ProviderError>;

    async fn invoke_chat(&self, invocation: ChatInvocation) -> Result<LlmResponse, ProviderError>;

    async fn invoke_embedding(
        &self,
        model: &str,
        texts: Vec<String>,
        user: Option<String>,
    ) -> Result<TextEmbeddingResult, ProviderError>;
}

pub type SharedProvider = std::sync::Arc<dyn ModelProvider>;
