//! Model provider abstraction: the `ModelProvider` capability trait, the
//! `ProviderManager` registry, and the bundled OpenAI-compatible and
//! synthetic implementations.

pub mod entities;
pub mod error;
pub mod http_timeout;
pub mod manager;
pub mod message;
pub mod openai;
pub mod provider;
pub mod result;
pub mod structured;
pub mod synthetic;

pub use entities::{AIModelEntity, FetchFrom, ModelFeature, ModelType, ProviderEntity};
pub use error::{InvokeError, ProviderError};
pub use manager::ProviderManager;
pub use message::{AssistantToolCall, PromptMessage, PromptMessageRole, PromptMessageTool};
pub use openai::OpenAiCompatibleProvider;
pub use provider::{ModelProvider, SharedProvider};
pub use result::{
    ChatInvocation, EmbeddingUsage, LlmChunkStream, LlmResponse, LlmResult, LlmResultChunk,
    LlmResultChunkDelta, LlmUsage, TextEmbeddingResult,
};
pub use structured::{extract_json, extract_json_or_text};
pub use synthetic::{SyntheticProvider, SYNTHETIC_CHAT_MODEL, SYNTHETIC_EMBEDDING_MODEL};
