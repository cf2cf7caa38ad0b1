use async_trait::async_trait;
use reflex_providers::{
    extract_json, ChatInvocation, PromptMessage, PromptMessageTool, ProviderError, SharedProvider,
};
use schemars::gen::SchemaSettings;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::error::GraphError;
use crate::state::{AnswerQuestion, ReviseAnswer};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ToolChoice {
    Auto,
    /// Force a call of the named function.
    Function(String),
}

impl ToolChoice {
    fn to_value(&self) -> Value {
        match self {
            ToolChoice::Auto => json!("auto"),
            ToolChoice::Function(name) => json!({"type": "function", "function": {"name": name}}),
        }
    }
}

/// Chat model bound to one provider/model pair.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn invoke(
        &self,
        messages: Vec<PromptMessage>,
        tools: &[PromptMessageTool],
        tool_choice: ToolChoice,
    ) -> Result<PromptMessage, ProviderError>;
}

pub struct ProviderChatModel {
    provider: SharedProvider,
    model: String,
    parameters: Map<String, Value>,
}

impl ProviderChatModel {
    pub fn new(provider: SharedProvider, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            parameters: Map::new(),
        }
    }

    pub fn with_parameter(mut self, key: &str, value: Value) -> Self {
        self.parameters.insert(key.to_string(), value);
        self
    }
}

#[async_trait]
impl ChatModel for ProviderChatModel {
    async fn invoke(
        &self,
        messages: Vec<PromptMessage>,
        tools: &[PromptMessageTool],
        tool_choice: ToolChoice,
    ) -> Result<PromptMessage, ProviderError> {
        let mut invocation = ChatInvocation::new(self.model.clone(), messages);
        invocation.parameters = self.parameters.clone();
        if !tools.is_empty() {
            invocation.tools = tools.to_vec();
            invocation
                .parameters
                .insert("tool_choice".into(), tool_choice.to_value());
        }
        let result = self.provider.invoke_chat(invocation).await?.collect().await?;
        Ok(result.message)
    }
}

/// A schema-described record the model is asked to fill in through a forced
/// function call.
pub trait StructuredOutput: DeserializeOwned + Serialize + JsonSchema {
    const FUNCTION_NAME: &'static str;
    const DESCRIPTION: &'static str;

    /// Used when the model answers in prose instead of calling the function.
    fn from_plain_text(text: &str) -> Self;
}

impl StructuredOutput for AnswerQuestion {
    const FUNCTION_NAME: &'static str = "AnswerQuestion";
    const DESCRIPTION: &'static str = "Answer the question. Provide an answer, reflection, and then follow up with search queries to improve the answer.";

    fn from_plain_text(text: &str) -> Self {
        Self {
            answer: text.trim().to_string(),
            ..Default::default()
        }
    }
}

impl StructuredOutput for ReviseAnswer {
    const FUNCTION_NAME: &'static str = "ReviseAnswer";
    const DESCRIPTION: &'static str = "Revise your original answer to your question. Provide an answer, reflection, cite your reflection with references, and finally add search queries to improve the answer.";

    fn from_plain_text(text: &str) -> Self {
        Self {
            answer: text.trim().to_string(),
            ..Default::default()
        }
    }
}

/// Parameters schema for `T` with sub-schemas inlined, as function-calling
/// APIs expect.
pub fn function_parameters<T: JsonSchema>() -> Value {
    let schema = SchemaSettings::draft07()
        .with(|s| s.inline_subschemas = true)
        .into_generator()
        .into_root_schema_for::<T>();
    let mut value = serde_json::to_value(schema).unwrap_or_else(|_| json!({"type": "object"}));
    if let Some(obj) = value.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
        obj.remove("description");
    }
    value
}

pub fn function_declaration<T: StructuredOutput>() -> PromptMessageTool {
    PromptMessageTool::new(T::FUNCTION_NAME, T::DESCRIPTION, function_parameters::<T>())
}

/// Invoke `model` forcing a `T::FUNCTION_NAME` call and decode the result.
///
/// Decoding prefers the function arguments, then JSON found in the message
/// text, then the prose itself.
pub async fn invoke_structured<T: StructuredOutput>(
    model: &dyn ChatModel,
    messages: Vec<PromptMessage>,
) -> Result<T, GraphError> {
    let declaration = function_declaration::<T>();
    let reply = model
        .invoke(
            messages,
            std::slice::from_ref(&declaration),
            ToolChoice::Function(T::FUNCTION_NAME.into()),
        )
        .await?;
    decode_structured(&reply)
}

pub(crate) fn decode_structured<T: StructuredOutput>(reply: &PromptMessage) -> Result<T, GraphError> {
    let mut last_error = None;
    if let Some(call) = reply.tool_calls.iter().find(|c| c.name == T::FUNCTION_NAME) {
        match serde_json::from_str::<T>(&call.arguments) {
            Ok(parsed) => return Ok(parsed),
            Err(err) => last_error = Some(err.to_string()),
        }
    }
    if let Some(value) = extract_json(&reply.content) {
        if let Ok(parsed) = serde_json::from_value::<T>(value) {
            return Ok(parsed);
        }
    }
    if !reply.content.trim().is_empty() {
        return Ok(T::from_plain_text(&reply.content));
    }
    Err(GraphError::StructuredOutput {
        function: T::FUNCTION_NAME.to_string(),
        reason: last_error.unwrap_or_else(|| "empty model reply".into()),
    })
}
