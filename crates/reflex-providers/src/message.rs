use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PromptMessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl PromptMessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptMessageRole::System => "system",
            PromptMessageRole::User => "user",
            PromptMessageRole::Assistant => "assistant",
            PromptMessageRole::Tool => "tool",
        }
    }

    /// Lenient role parsing for caller-supplied history. `function` maps to
    /// `tool`, anything unknown to `user`.
    pub fn from_slug(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "system" => PromptMessageRole::System,
            "assistant" | "ai" => PromptMessageRole::Assistant,
            "tool" | "function" => PromptMessageRole::Tool,
            _ => PromptMessageRole::User,
        }
    }
}

/// A tool invocation requested by the assistant.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssistantToolCall {
    pub id: String,
    pub name: String,
    /// JSON-encoded arguments, as produced by the model.
    pub arguments: String,
}

impl AssistantToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    /// Arguments decoded as JSON; malformed text yields `Value::Null`.
    pub fn arguments_json(&self) -> Value {
        serde_json::from_str(&self.arguments).unwrap_or(Value::Null)
    }
}

/// Provider-neutral chat message.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PromptMessage {
    pub role: PromptMessageRole,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<AssistantToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl PromptMessage {
    pub fn new(role: PromptMessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(PromptMessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(PromptMessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(PromptMessageRole::Assistant, content)
    }

    pub fn assistant_tool_calls(tool_calls: Vec<AssistantToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::assistant("")
        }
    }

    pub fn tool(tool_call_id: impl Into<String>, name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            tool_call_id: Some(tool_call_id.into()),
            ..Self::new(PromptMessageRole::Tool, content)
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn is_tool_result(&self) -> bool {
        self.role == PromptMessageRole::Tool
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Tool declaration offered to the model.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PromptMessageTool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: Value,
}

impl PromptMessageTool {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}
