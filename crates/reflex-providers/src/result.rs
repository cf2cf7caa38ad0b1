use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProviderError;
use crate::message::{PromptMessage, PromptMessageTool};

/// Everything needed to invoke a chat model once.
#[derive(Clone, Debug, Default)]
pub struct ChatInvocation {
    pub model: String,
    pub messages: Vec<PromptMessage>,
    /// Sampling parameters forwarded verbatim (`temperature`, `max_tokens`,
    /// `tool_choice`, ...).
    pub parameters: Map<String, Value>,
    pub tools: Vec<PromptMessageTool>,
    pub stop: Vec<String>,
    pub stream: bool,
    pub user: Option<String>,
}

impl ChatInvocation {
    pub fn new(model: impl Into<String>, messages: Vec<PromptMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            ..Default::default()
        }
    }

    pub fn with_parameter(mut self, key: &str, value: Value) -> Self {
        self.parameters.insert(key.to_string(), value);
        self
    }

    pub fn with_tools(mut self, tools: Vec<PromptMessageTool>) -> Self {
        self.tools = tools;
        self
    }

    pub fn streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LlmUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl LlmUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// Complete (non-streamed) chat result.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LlmResult {
    pub id: String,
    pub model: String,
    pub created: i64,
    pub message: PromptMessage,
    pub usage: LlmUsage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LlmResultChunkDelta {
    pub index: u32,
    pub message: PromptMessage,
    #[serde(default)]
    pub usage: Option<LlmUsage>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// One streamed increment. Tool calls are delivered whole, on the chunk that
/// carries the finish reason.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LlmResultChunk {
    pub model: String,
    pub delta: LlmResultChunkDelta,
}

pub type LlmChunkStream = BoxStream<'static, Result<LlmResultChunk, ProviderError>>;

pub enum LlmResponse {
    Complete(LlmResult),
    Stream(LlmChunkStream),
}

impl std::fmt::Debug for LlmResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmResponse::Complete(result) => f.debug_tuple("Complete").field(result).finish(),
            LlmResponse::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl LlmResponse {
    /// Drain the response into a single result, concatenating streamed deltas.
    pub async fn collect(self) -> Result<LlmResult, ProviderError> {
        use futures_util::StreamExt;

        match self {
            LlmResponse::Complete(result) => Ok(result),
            LlmResponse::Stream(mut stream) => {
                let mut model = String::new();
                let mut message = PromptMessage::assistant("");
                let mut usage = LlmUsage::default();
                let mut finish_reason = None;
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk?;
                    model = chunk.model;
                    message.content.push_str(&chunk.delta.message.content);
                    message.tool_calls.extend(chunk.delta.message.tool_calls);
                    if let Some(u) = chunk.delta.usage {
                        usage = u;
                    }
                    if chunk.delta.finish_reason.is_some() {
                        finish_reason = chunk.delta.finish_reason;
                    }
                }
                Ok(LlmResult {
                    id: format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
                    model,
                    created: chrono::Utc::now().timestamp(),
                    message,
                    usage,
                    finish_reason,
                })
            }
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingUsage {
    pub tokens: u64,
    pub total_tokens: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TextEmbeddingResult {
    pub model: String,
    pub embeddings: Vec<Vec<f32>>,
    pub usage: EmbeddingUsage,
}
