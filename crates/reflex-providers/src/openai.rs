use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::{Event, EventStreamError, Eventsource};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::entities::{AIModelEntity, FetchFrom, ModelType, ProviderEntity};
use crate::error::{InvokeError, ProviderError};
use crate::http_timeout;
use crate::message::{AssistantToolCall, PromptMessage, PromptMessageRole, PromptMessageTool};
use crate::provider::ModelProvider;
use crate::result::{
    ChatInvocation, EmbeddingUsage, LlmChunkStream, LlmResponse, LlmResult, LlmResultChunk,
    LlmResultChunkDelta, LlmUsage, TextEmbeddingResult,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Provider for any server speaking the OpenAI `/v1` chat and embeddings API.
pub struct OpenAiCompatibleProvider {
    entity: ProviderEntity,
    base_url: String,
    api_key: Option<String>,
    models: Vec<AIModelEntity>,
    client: reqwest::Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(
        id: impl Into<String>,
        label: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| InvokeError::Connection(e.to_string()))?;
        Ok(Self {
            entity: ProviderEntity {
                provider: id.into(),
                label: label.into(),
                supported_model_types: vec![ModelType::Llm, ModelType::TextEmbedding],
            },
            base_url: base_url.into(),
            api_key: None,
            models: Vec::new(),
            client,
        })
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|k| !k.trim().is_empty());
        self
    }

    /// Declare the served models. Without declarations, LLMs are discovered
    /// from `GET /v1/models`.
    pub fn with_models(mut self, models: Vec<AIModelEntity>) -> Self {
        if !models.is_empty() {
            let mut types: Vec<ModelType> = models.iter().map(|m| m.model_type).collect();
            types.sort();
            types.dedup();
            self.entity.supported_model_types = types;
        }
        self.models = models;
        self
    }

    fn url(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/v1") {
            format!("{base}/{path}")
        } else {
            format!("{base}/v1/{path}")
        }
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    fn check_model(&self, model: &str, model_type: ModelType) -> Result<(), ProviderError> {
        let mut declared = self
            .models
            .iter()
            .filter(|m| m.model_type == model_type)
            .peekable();
        if declared.peek().is_none() || declared.any(|m| m.model == model) {
            Ok(())
        } else {
            Err(ProviderError::UnknownModel(model.to_string()))
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, ProviderError> {
        let response = request
            .send()
            .await
            .map_err(|e| InvokeError::Connection(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(InvokeError::from_status(status.as_u16(), upstream_message(&body)).into())
    }

    async fn fetch_remote_models(&self) -> Result<Vec<AIModelEntity>, ProviderError> {
        let request = self
            .authorize(self.client.get(self.url("models")))
            .timeout(http_timeout::get_duration());
        let listing: WireModelList = self
            .send(request)
            .await?
            .json()
            .await
            .map_err(|e| InvokeError::BadRequest(e.to_string()))?;
        Ok(listing
            .data
            .into_iter()
            .map(|m| {
                AIModelEntity::new(m.id, ModelType::Llm).with_fetch_from(FetchFrom::CustomizableModel)
            })
            .collect())
    }
}

fn upstream_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.chars().take(512).collect())
}

fn message_to_wire(message: &PromptMessage) -> Value {
    let mut wire = Map::new();
    wire.insert("role".into(), json!(message.role.as_str()));
    if message.role == PromptMessageRole::Assistant && message.has_tool_calls() {
        if message.content.is_empty() {
            wire.insert("content".into(), Value::Null);
        } else {
            wire.insert("content".into(), json!(message.content));
        }
        let calls: Vec<Value> = message
            .tool_calls
            .iter()
            .map(|call| {
                json!({
                    "id": call.id,
                    "type": "function",
                    "function": {"name": call.name, "arguments": call.arguments},
                })
            })
            .collect();
        wire.insert("tool_calls".into(), Value::Array(calls));
    } else {
        wire.insert("content".into(), json!(message.content));
    }
    if let Some(id) = &message.tool_call_id {
        wire.insert("tool_call_id".into(), json!(id));
    }
    if let Some(name) = &message.name {
        wire.insert("name".into(), json!(name));
    }
    Value::Object(wire)
}

fn tool_to_wire(tool: &PromptMessageTool) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

fn chat_body(invocation: &ChatInvocation) -> Value {
    let mut body = Map::new();
    body.insert("model".into(), json!(invocation.model));
    body.insert(
        "messages".into(),
        Value::Array(invocation.messages.iter().map(message_to_wire).collect()),
    );
    for (key, value) in &invocation.parameters {
        body.insert(key.clone(), value.clone());
    }
    if !invocation.tools.is_empty() {
        body.insert(
            "tools".into(),
            Value::Array(invocation.tools.iter().map(tool_to_wire).collect()),
        );
    } else {
        body.remove("tool_choice");
    }
    if !invocation.stop.is_empty() {
        body.insert("stop".into(), json!(invocation.stop));
    }
    if let Some(user) = &invocation.user {
        body.insert("user".into(), json!(user));
    }
    if invocation.stream {
        body.insert("stream".into(), Value::Bool(true));
    }
    Value::Object(body)
}

fn fresh_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

#[async_trait]
impl ModelProvider for OpenAiCompatibleProvider {
    fn entity(&self) -> &ProviderEntity {
        &self.entity
    }

    async fn list_models(
        &self,
        model_type: ModelType,
    ) -> Result<Vec<AIModelEntity>, ProviderError> {
        if self.models.is_empty() && model_type == ModelType::Llm {
            return self.fetch_remote_models().await;
        }
        Ok(self
            .models
            .iter()
            .filter(|m| m.model_type == model_type)
            .cloned()
            .collect())
    }

    async fn invoke_chat(&self, invocation: ChatInvocation) -> Result<LlmResponse, ProviderError> {
        if invocation.messages.is_empty() {
            return Err(ProviderError::Value("messages must not be empty".into()));
        }
        self.check_model(&invocation.model, ModelType::Llm)?;
        let body = chat_body(&invocation);
        debug!(
            target: "reflex::providers",
            provider = %self.entity.provider,
            model = %invocation.model,
            stream = invocation.stream,
            "invoking chat model"
        );
        let mut request = self
            .authorize(self.client.post(self.url("chat/completions")))
            .json(&body);
        if !invocation.stream {
            request = request.timeout(http_timeout::get_duration());
        }
        let response = self.send(request).await?;

        if invocation.stream {
            return Ok(LlmResponse::Stream(chunk_stream(response, invocation.model)));
        }

        let wire: WireCompletion = response
            .json()
            .await
            .map_err(|e| InvokeError::BadRequest(format!("malformed completion: {e}")))?;
        let choice = wire
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| InvokeError::BadRequest("completion without choices".into()))?;
        let mut tool_calls: Vec<AssistantToolCall> = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| {
                let id = if call.id.is_empty() { fresh_call_id() } else { call.id };
                AssistantToolCall::new(id, call.function.name, call.function.arguments)
            })
            .collect();
        if let Some(legacy) = choice.message.function_call {
            tool_calls.push(AssistantToolCall::new(fresh_call_id(), legacy.name, legacy.arguments));
        }
        let mut message = PromptMessage::assistant(choice.message.content.unwrap_or_default());
        message.tool_calls = tool_calls;
        Ok(LlmResponse::Complete(LlmResult {
            id: if wire.id.is_empty() {
                format!("chatcmpl-{}", uuid::Uuid::new_v4().simple())
            } else {
                wire.id
            },
            model: if wire.model.is_empty() { invocation.model } else { wire.model },
            created: if wire.created == 0 {
                chrono::Utc::now().timestamp()
            } else {
                wire.created
            },
            message,
            usage: wire.usage.map(WireUsage::into_usage).unwrap_or_default(),
            finish_reason: choice.finish_reason,
        }))
    }

    async fn invoke_embedding(
        &self,
        model: &str,
        texts: Vec<String>,
        user: Option<String>,
    ) -> Result<TextEmbeddingResult, ProviderError> {
        if texts.is_empty() {
            return Err(ProviderError::Value("input must not be empty".into()));
        }
        self.check_model(model, ModelType::TextEmbedding)?;
        let mut body = json!({"model": model, "input": texts});
        if let Some(user) = user {
            body["user"] = json!(user);
        }
        let request = self
            .authorize(self.client.post(self.url("embeddings")))
            .timeout(http_timeout::get_duration())
            .json(&body);
        let mut wire: WireEmbeddings = self
            .send(request)
            .await?
            .json()
            .await
            .map_err(|e| InvokeError::BadRequest(format!("malformed embeddings: {e}")))?;
        wire.data.sort_by_key(|e| e.index);
        let usage = wire.usage.unwrap_or_default();
        Ok(TextEmbeddingResult {
            model: if wire.model.is_empty() { model.to_string() } else { wire.model },
            embeddings: wire.data.into_iter().map(|e| e.embedding).collect(),
            usage: EmbeddingUsage {
                tokens: usage.prompt_tokens,
                total_tokens: usage.total_tokens,
            },
        })
    }
}

type EventStream = BoxStream<'static, Result<Event, EventStreamError<reqwest::Error>>>;

/// Incremental SSE decoder. Content deltas pass straight through; tool-call
/// fragments are stitched together and emitted whole with the finish reason.
struct ChunkState {
    events: EventStream,
    model: String,
    pending: BTreeMap<u32, AssistantToolCall>,
    done: bool,
}

fn chunk_stream(response: reqwest::Response, model: String) -> LlmChunkStream {
    let state = ChunkState {
        events: response.bytes_stream().eventsource().boxed(),
        model,
        pending: BTreeMap::new(),
        done: false,
    };
    futures_util::stream::unfold(state, |mut state| async move {
        let item = state.next_chunk().await?;
        Some((item, state))
    })
    .boxed()
}

impl ChunkState {
    async fn next_chunk(&mut self) -> Option<Result<LlmResultChunk, ProviderError>> {
        if self.done {
            return None;
        }
        loop {
            let event = match self.events.next().await {
                Some(Ok(event)) => event,
                Some(Err(err)) => {
                    self.done = true;
                    return Some(Err(InvokeError::Connection(err.to_string()).into()));
                }
                None => {
                    self.done = true;
                    return self.flush().map(Ok);
                }
            };
            let data = event.data.trim();
            if data.is_empty() {
                continue;
            }
            if data == "[DONE]" {
                self.done = true;
                return self.flush().map(Ok);
            }
            match serde_json::from_str::<WireChunk>(data) {
                Ok(chunk) => {
                    if let Some(out) = self.absorb(chunk) {
                        return Some(Ok(out));
                    }
                }
                Err(err) => {
                    warn!(target: "reflex::providers", "skipping malformed stream chunk: {err}");
                }
            }
        }
    }

    fn absorb(&mut self, chunk: WireChunk) -> Option<LlmResultChunk> {
        if !chunk.model.is_empty() {
            self.model = chunk.model;
        }
        let usage = chunk.usage.map(WireUsage::into_usage);
        let Some(choice) = chunk.choices.into_iter().next() else {
            return usage.map(|u| self.chunk(0, String::new(), Vec::new(), Some(u), None));
        };
        for fragment in choice.delta.tool_calls.unwrap_or_default() {
            let entry = self
                .pending
                .entry(fragment.index)
                .or_insert_with(|| AssistantToolCall::new("", "", ""));
            if let Some(id) = fragment.id.filter(|id| !id.is_empty()) {
                entry.id = id;
            }
            if let Some(function) = fragment.function {
                if let Some(name) = function.name.filter(|_| entry.name.is_empty()) {
                    entry.name = name;
                }
                if let Some(arguments) = function.arguments {
                    entry.arguments.push_str(&arguments);
                }
            }
        }
        let content = choice.delta.content.unwrap_or_default();
        let tool_calls = if choice.finish_reason.is_some() {
            self.take_pending()
        } else {
            Vec::new()
        };
        if content.is_empty()
            && tool_calls.is_empty()
            && choice.finish_reason.is_none()
            && usage.is_none()
        {
            return None;
        }
        Some(self.chunk(choice.index, content, tool_calls, usage, choice.finish_reason))
    }

    fn take_pending(&mut self) -> Vec<AssistantToolCall> {
        std::mem::take(&mut self.pending)
            .into_values()
            .map(|mut call| {
                if call.id.is_empty() {
                    call.id = fresh_call_id();
                }
                call
            })
            .collect()
    }

    fn flush(&mut self) -> Option<LlmResultChunk> {
        let calls = self.take_pending();
        if calls.is_empty() {
            return None;
        }
        Some(self.chunk(0, String::new(), calls, None, Some("tool_calls".into())))
    }

    fn chunk(
        &self,
        index: u32,
        content: String,
        tool_calls: Vec<AssistantToolCall>,
        usage: Option<LlmUsage>,
        finish_reason: Option<String>,
    ) -> LlmResultChunk {
        let mut message = PromptMessage::assistant(content);
        message.tool_calls = tool_calls;
        LlmResultChunk {
            model: self.model.clone(),
            delta: LlmResultChunkDelta {
                index,
                message,
                usage,
                finish_reason,
            },
        }
    }
}

#[derive(Deserialize)]
struct WireModelList {
    #[serde(default)]
    data: Vec<WireModel>,
}

#[derive(Deserialize)]
struct WireModel {
    id: String,
}

#[derive(Deserialize)]
struct WireCompletion {
    #[serde(default)]
    id: String,
    #[serde(default)]
    created: i64,
    #[serde(default)]
    model: String,
    #[serde(default)]
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(default)]
    function_call: Option<WireFunction>,
}

#[derive(Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: String,
    function: WireFunction,
}

#[derive(Deserialize)]
struct WireFunction {
    #[serde(default)]
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

impl WireUsage {
    fn into_usage(self) -> LlmUsage {
        LlmUsage::new(self.prompt_tokens, self.completion_tokens)
    }
}

#[derive(Deserialize)]
struct WireChunk {
    #[serde(default)]
    model: String,
    #[serde(default)]
    choices: Vec<WireChunkChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireChunkChoice {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    delta: WireDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct WireDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCallDelta>>,
}

#[derive(Deserialize)]
struct WireToolCallDelta {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<WireFunctionDelta>,
}

#[derive(Deserialize)]
struct WireFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Deserialize)]
struct WireEmbeddings {
    #[serde(default)]
    model: String,
    data: Vec<WireEmbedding>,
    #[serde(default)]
    usage: Option<WireEmbeddingUsage>,
}

#[derive(Deserialize)]
struct WireEmbedding {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Deserialize, Default)]
struct WireEmbeddingUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}
