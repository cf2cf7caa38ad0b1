use async_trait::async_trait;
use once_cell::sync::Lazy;
use reflex_graph::{ProviderChatModel, ReflexionGraph};
use reflex_kb::{Document, KbChatEngine, KbRegistry, MemoryKbService};
use reflex_providers::{
    AIModelEntity, ChatInvocation, EmbeddingUsage, InvokeError, LlmResponse, LlmResult, LlmUsage,
    ModelFeature, ModelProvider, ModelType, PromptMessage, ProviderEntity, ProviderError,
    ProviderManager, SyntheticProvider, TextEmbeddingResult, SYNTHETIC_CHAT_MODEL,
};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use crate::app_state::{AppState, ChatDefaults, KbDefaults};

static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

pub(crate) mod env {
    use super::*;

    pub(crate) struct EnvGuard {
        _lock: MutexGuard<'static, ()>,
        saved: HashMap<String, Option<String>>,
    }

    pub(crate) fn guard() -> EnvGuard {
        EnvGuard {
            _lock: ENV_LOCK.lock().expect("env lock poisoned"),
            saved: HashMap::new(),
        }
    }

    impl EnvGuard {
        fn remember(&mut self, key: &str) {
            self.saved
                .entry(key.to_string())
                .or_insert_with(|| std::env::var(key).ok());
        }

        pub(crate) fn set(&mut self, key: &str, value: impl AsRef<str>) {
            self.remember(key);
            std::env::set_var(key, value.as_ref());
        }

        pub(crate) fn remove(&mut self, key: &str) {
            self.remember(key);
            std::env::remove_var(key);
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.saved.drain() {
                match value {
                    Some(val) => std::env::set_var(&key, val),
                    None => std::env::remove_var(&key),
                }
            }
        }
    }
}

/// What [`StubProvider`] does when asked to chat.
#[derive(Clone, Debug)]
pub(crate) enum ChatOutcome {
    Reply(String),
    Value(String),
    Invoke(InvokeError),
}

/// Provider double: scripted chat outcome, one LLM model, and a text
/// embedding listing that always fails.
pub(crate) struct StubProvider {
    entity: ProviderEntity,
    outcome: ChatOutcome,
    seen: Mutex<Vec<ChatInvocation>>,
}

impl StubProvider {
    pub(crate) fn new(id: &str, outcome: ChatOutcome) -> Self {
        Self {
            entity: ProviderEntity {
                provider: id.into(),
                label: format!("Stub {id}"),
                supported_model_types: vec![ModelType::Llm, ModelType::TextEmbedding],
            },
            outcome,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn invocations(&self) -> Vec<ChatInvocation> {
        self.seen
            .lock()
            .map(|seen| seen.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ModelProvider for StubProvider {
    fn entity(&self) -> &ProviderEntity {
        &self.entity
    }

    async fn list_models(&self, model_type: ModelType) -> Result<Vec<AIModelEntity>, ProviderError> {
        match model_type {
            ModelType::Llm => Ok(vec![AIModelEntity::new("stub-chat", ModelType::Llm)
                .with_features(vec![ModelFeature::ToolCall])]),
            ModelType::TextEmbedding => {
                Err(InvokeError::ServerUnavailable("embedding catalogue down".into()).into())
            }
            _ => Ok(Vec::new()),
        }
    }

    async fn invoke_chat(&self, invocation: ChatInvocation) -> Result<LlmResponse, ProviderError> {
        let model = invocation.model.clone();
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(invocation);
        }
        match &self.outcome {
            ChatOutcome::Reply(text) => Ok(LlmResponse::Complete(LlmResult {
                id: "chatcmpl-stub".into(),
                model,
                created: 0,
                message: PromptMessage::assistant(text.clone()),
                usage: LlmUsage::new(3, 5),
                finish_reason: Some("stop".into()),
            })),
            ChatOutcome::Value(msg) => Err(ProviderError::Value(msg.clone())),
            ChatOutcome::Invoke(err) => Err(err.clone().into()),
        }
    }

    async fn invoke_embedding(
        &self,
        model: &str,
        texts: Vec<String>,
        _user: Option<String>,
    ) -> Result<TextEmbeddingResult, ProviderError> {
        let embeddings = texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect();
        Ok(TextEmbeddingResult {
            model: model.to_string(),
            embeddings,
            usage: EmbeddingUsage {
                tokens: texts.len() as u64,
                total_tokens: texts.len() as u64,
            },
        })
    }
}

/// One knowledge base named `samples` with two paragraphs.
pub(crate) fn sample_registry() -> KbRegistry {
    let mut registry = KbRegistry::new();
    registry.register(Arc::new(MemoryKbService::new(
        "samples",
        vec![
            Document::new("customer name is the full legal name", "fields.md"),
            Document::new("birth date uses ISO 8601", "fields.md"),
        ],
    )));
    registry
}

/// State over the synthetic provider plus any extra providers. Knowledge-base
/// chat goes to `kb_provider`.
pub(crate) fn state_with(extra: Vec<Arc<dyn ModelProvider>>, kb_provider: &str) -> AppState {
    let mut providers = ProviderManager::new();
    let synthetic: Arc<dyn ModelProvider> = Arc::new(SyntheticProvider::new());
    providers.register(synthetic.clone()).expect("register synthetic");
    for provider in extra {
        providers.register(provider).expect("register provider");
    }
    let kb = KbChatEngine::new(
        Arc::new(sample_registry()),
        providers.clone(),
        kb_provider,
        "http://127.0.0.1:20000",
    );
    let model = Arc::new(ProviderChatModel::new(synthetic, SYNTHETIC_CHAT_MODEL));
    let graph = ReflexionGraph::builder(model, Vec::new(), 10)
        .build()
        .expect("build graph");
    AppState::builder(providers, kb, graph)
        .with_chat_defaults(ChatDefaults {
            provider: "synthetic".into(),
            model: Some(SYNTHETIC_CHAT_MODEL.into()),
            temperature: 0.7,
        })
        .with_kb_defaults(KbDefaults {
            model: Some("stub-chat".into()),
            top_k: 3,
            score_threshold: 1.0,
            temperature: 0.7,
            prompt_name: "default".into(),
        })
        .build()
}

pub(crate) fn app(state: AppState) -> axum::Router {
    crate::bootstrap::app(state, 64)
}

pub(crate) async fn body_bytes(resp: axum::response::Response) -> Vec<u8> {
    use http_body_util::BodyExt;
    resp.into_body()
        .collect()
        .await
        .expect("collect body")
        .to_bytes()
        .to_vec()
}

pub(crate) async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let bytes = body_bytes(resp).await;
    serde_json::from_slice(&bytes).expect("json body")
}

pub(crate) async fn body_text(resp: axum::response::Response) -> String {
    String::from_utf8(body_bytes(resp).await).expect("utf8 body")
}
