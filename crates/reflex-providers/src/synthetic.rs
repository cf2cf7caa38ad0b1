use async_trait::async_trait;
use futures_util::{stream, StreamExt};

use crate::entities::{AIModelEntity, ModelFeature, ModelType, ProviderEntity};
use crate::error::ProviderError;
use crate::message::{PromptMessage, PromptMessageRole};
use crate::provider::ModelProvider;
use crate::result::{
    ChatInvocation, EmbeddingUsage, LlmResponse, LlmResult, LlmResultChunk, LlmResultChunkDelta,
    LlmUsage, TextEmbeddingResult,
};

pub const SYNTHETIC_CHAT_MODEL: &str = "synthetic-echo";
pub const SYNTHETIC_EMBEDDING_MODEL: &str = "synthetic-embedding";
const EMBEDDING_DIM: usize = 32;

/// Offline provider: echoes the last user message and hashes text into
/// embeddings. Registered when nothing else is configured.
pub struct SyntheticProvider {
    entity: ProviderEntity,
}

impl Default for SyntheticProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntheticProvider {
    pub fn new() -> Self {
        Self::with_id("synthetic")
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            entity: ProviderEntity {
                provider: id.into(),
                label: "Synthetic".into(),
                supported_model_types: vec![ModelType::Llm, ModelType::TextEmbedding],
            },
        }
    }

    fn check_model(&self, model: &str, expected: &str) -> Result<(), ProviderError> {
        if model == expected {
            Ok(())
        } else {
            Err(ProviderError::UnknownModel(model.to_string()))
        }
    }
}

pub fn synth_reply(prompt: &str) -> String {
    let trimmed = prompt.trim();
    if trimmed.is_empty() {
        "I'm here and ready to help.".to_string()
    } else {
        format!("You said: {trimmed}")
    }
}

fn rough_tokens(text: &str) -> u64 {
    text.split_whitespace().count() as u64
}

/// Deterministic bag-of-words embedding, L2-normalised.
pub fn hash_embedding(text: &str) -> Vec<f32> {
    let mut vector = vec![0f32; EMBEDDING_DIM];
    for token in text.split_whitespace() {
        let mut hash: u64 = 0xcbf29ce484222325;
        for byte in token.to_lowercase().bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x100000001b3);
        }
        vector[(hash % EMBEDDING_DIM as u64) as usize] += 1.0;
    }
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|v| *v /= norm);
    }
    vector
}

#[async_trait]
impl ModelProvider for SyntheticProvider {
    fn entity(&self) -> &ProviderEntity {
        &self.entity
    }

    async fn list_models(
        &self,
        model_type: ModelType,
    ) -> Result<Vec<AIModelEntity>, ProviderError> {
        Ok(match model_type {
            ModelType::Llm => vec![AIModelEntity::new(SYNTHETIC_CHAT_MODEL, ModelType::Llm)
                .with_label("Synthetic echo")
                .with_features(vec![ModelFeature::AgentThought])],
            ModelType::TextEmbedding => vec![AIModelEntity::new(
                SYNTHETIC_EMBEDDING_MODEL,
                ModelType::TextEmbedding,
            )
            .with_label("Synthetic hash embedding")],
            _ => Vec::new(),
        })
    }

    async fn invoke_chat(&self, invocation: ChatInvocation) -> Result<LlmResponse, ProviderError> {
        self.check_model(&invocation.model, SYNTHETIC_CHAT_MODEL)?;
        if invocation.messages.is_empty() {
            return Err(ProviderError::Value("messages must not be empty".into()));
        }
        let prompt = invocation
            .messages
            .iter()
            .rev()
            .find(|m| m.role == PromptMessageRole::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        let reply = synth_reply(prompt);
        let prompt_tokens: u64 = invocation
            .messages
            .iter()
            .map(|m| rough_tokens(&m.content))
            .sum();
        let usage = LlmUsage::new(prompt_tokens, rough_tokens(&reply));
        let model = invocation.model;

        if !invocation.stream {
            return Ok(LlmResponse::Complete(LlmResult {
                id: format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
                model,
                created: chrono::Utc::now().timestamp(),
                message: PromptMessage::assistant(reply),
                usage,
                finish_reason: Some("stop".into()),
            }));
        }

        let words: Vec<String> = reply
            .split_inclusive(' ')
            .map(str::to_string)
            .collect();
        let last = words.len().saturating_sub(1);
        let chunks: Vec<Result<LlmResultChunk, ProviderError>> = words
            .into_iter()
            .enumerate()
            .map(|(i, word)| {
                let done = i == last;
                Ok(LlmResultChunk {
                    model: model.clone(),
                    delta: LlmResultChunkDelta {
                        index: 0,
                        message: PromptMessage::assistant(word),
                        usage: done.then(|| usage.clone()),
                        finish_reason: done.then(|| "stop".to_string()),
                    },
                })
            })
            .collect();
        Ok(LlmResponse::Stream(stream::iter(chunks).boxed()))
    }

    async fn invoke_embedding(
        &self,
        model: &str,
        texts: Vec<String>,
        _user: Option<String>,
    ) -> Result<TextEmbeddingResult, ProviderError> {
        self.check_model(model, SYNTHETIC_EMBEDDING_MODEL)?;
        if texts.is_empty() {
            return Err(ProviderError::Value("input must not be empty".into()));
        }
        let tokens: u64 = texts.iter().map(|t| rough_tokens(t)).sum();
        Ok(TextEmbeddingResult {
            model: model.to_string(),
            embeddings: texts.iter().map(|t| hash_embedding(t)).collect(),
            usage: EmbeddingUsage {
                tokens,
                total_tokens: tokens,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echoes_last_user_message() {
        let provider = SyntheticProvider::new();
        let invocation = ChatInvocation::new(
            SYNTHETIC_CHAT_MODEL,
            vec![PromptMessage::system("be brief"), PromptMessage::user("hello there")],
        );
        let LlmResponse::Complete(result) = provider.invoke_chat(invocation).await.expect("chat")
        else {
            panic!("expected complete response");
        };
        assert_eq!(result.message.content, "You said: hello there");
        assert_eq!(result.finish_reason.as_deref(), Some("stop"));
    }

    #[tokio::test]
    async fn streams_word_chunks() {
        let provider = SyntheticProvider::new();
        let invocation =
            ChatInvocation::new(SYNTHETIC_CHAT_MODEL, vec![PromptMessage::user("a b")]).streaming(true);
        let response = provider.invoke_chat(invocation).await.expect("chat");
        assert!(matches!(response, LlmResponse::Stream(_)));
        let collected = response.collect().await.expect("collect");
        assert_eq!(collected.message.content, "You said: a b");
        assert_eq!(collected.finish_reason.as_deref(), Some("stop"));
    }

    #[tokio::test]
    async fn empty_messages_is_a_value_error() {
        let provider = SyntheticProvider::new();
        let err = provider
            .invoke_chat(ChatInvocation::new(SYNTHETIC_CHAT_MODEL, Vec::new()))
            .await
            .expect_err("empty");
        assert!(matches!(err, ProviderError::Value(_)));
    }

    #[tokio::test]
    async fn unknown_model_is_reported() {
        let provider = SyntheticProvider::new();
        let err = provider
            .invoke_embedding("gpt-4", vec!["x".into()], None)
            .await
            .expect_err("unknown model");
        assert!(matches!(err, ProviderError::UnknownModel(_)));
    }

    #[test]
    fn embeddings_are_deterministic_and_normalised() {
        let a = hash_embedding("Rust async runtime");
        let b = hash_embedding("rust ASYNC runtime");
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert!(hash_embedding("").iter().all(|v| *v == 0.0));
    }
}
