//! Translation between the OpenAI wire schema and provider-neutral messages.

use reflex_protocol::{
    ChatCompletionChoice, ChatCompletionChunk, ChatCompletionChunkChoice, ChatCompletionRequest,
    ChatDelta, ChatMessage, ChatTool, Embedding, EmbeddingUsage, EmbeddingsResponse, FunctionCall,
    FunctionDefinition, ChatCompletionResponse, MessageContent, ModelCard, Role, ToolCall,
    ToolCallDelta, Usage,
};
use reflex_providers::{
    AIModelEntity, AssistantToolCall, ChatInvocation, LlmResult, LlmResultChunk, LlmUsage,
    PromptMessage, PromptMessageRole, PromptMessageTool, TextEmbeddingResult,
};
use serde_json::json;

pub fn to_prompt_message(message: &ChatMessage) -> PromptMessage {
    let text = message.text();
    let mut out = match message.role {
        Role::System => PromptMessage::system(text),
        Role::User => PromptMessage::user(text),
        Role::Assistant => {
            let mut calls: Vec<AssistantToolCall> = message
                .tool_calls
                .iter()
                .flatten()
                .map(|c| AssistantToolCall::new(&c.id, &c.function.name, &c.function.arguments))
                .collect();
            if let Some(call) = &message.function_call {
                calls.push(AssistantToolCall::new(
                    format!("call_{}", call.name),
                    &call.name,
                    &call.arguments,
                ));
            }
            PromptMessage {
                tool_calls: calls,
                ..PromptMessage::assistant(text)
            }
        }
        Role::Tool => PromptMessage::new(PromptMessageRole::Tool, text),
        // Legacy function results carry the function name instead of a call id.
        Role::Function => {
            let name = message.name.clone().unwrap_or_default();
            PromptMessage::tool(format!("call_{name}"), name, text)
        }
    };
    if out.name.is_none() {
        out.name = message.name.clone();
    }
    if out.tool_call_id.is_none() {
        out.tool_call_id = message.tool_call_id.clone();
    }
    out
}

fn tool_from_definition(def: &FunctionDefinition) -> PromptMessageTool {
    PromptMessageTool::new(
        &def.name,
        def.description.clone().unwrap_or_default(),
        def.parameters
            .clone()
            .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
    )
}

/// `tools` and legacy `functions` merged into one declaration list.
pub fn to_prompt_tools(
    tools: Option<&[ChatTool]>,
    functions: Option<&[FunctionDefinition]>,
) -> Vec<PromptMessageTool> {
    tools
        .into_iter()
        .flatten()
        .map(|t| &t.function)
        .chain(functions.into_iter().flatten())
        .map(tool_from_definition)
        .collect()
}

pub fn to_invocation(request: ChatCompletionRequest) -> ChatInvocation {
    let parameters = request.model_parameters();
    let tools = to_prompt_tools(request.tools.as_deref(), request.functions.as_deref());
    let messages = request.messages.iter().map(to_prompt_message).collect();
    ChatInvocation {
        model: request.model,
        messages,
        parameters,
        tools,
        stop: request.stop.map(|s| s.into_vec()).unwrap_or_default(),
        stream: request.stream,
        user: request.user,
    }
}

fn to_tool_call(call: &AssistantToolCall) -> ToolCall {
    ToolCall {
        id: call.id.clone(),
        kind: "function".into(),
        function: FunctionCall {
            name: call.name.clone(),
            arguments: call.arguments.clone(),
        },
    }
}

pub fn to_chat_message(message: &PromptMessage) -> ChatMessage {
    let content = if message.content.is_empty() && message.has_tool_calls() {
        None
    } else {
        Some(MessageContent::Text(message.content.clone()))
    };
    let tool_calls = message
        .has_tool_calls()
        .then(|| message.tool_calls.iter().map(to_tool_call).collect());
    ChatMessage {
        role: Role::Assistant,
        content,
        name: None,
        tool_calls,
        tool_call_id: None,
        function_call: None,
    }
}

fn to_usage(usage: &LlmUsage) -> Usage {
    Usage {
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
        total_tokens: usage.total_tokens,
    }
}

pub fn completion_response(result: LlmResult) -> ChatCompletionResponse {
    ChatCompletionResponse {
        id: result.id,
        object: "chat.completion".into(),
        created: result.created,
        model: result.model,
        choices: vec![ChatCompletionChoice {
            index: 0,
            message: to_chat_message(&result.message),
            finish_reason: result.finish_reason.or_else(|| Some("stop".into())),
        }],
        usage: Some(to_usage(&result.usage)),
    }
}

/// One SSE chunk. The role is only announced on the first chunk; tool calls
/// are indexed by their position in the delta.
pub fn completion_chunk(
    id: &str,
    created: i64,
    chunk: &LlmResultChunk,
    first: bool,
) -> ChatCompletionChunk {
    let message = &chunk.delta.message;
    let tool_calls = message.has_tool_calls().then(|| {
        message
            .tool_calls
            .iter()
            .enumerate()
            .map(|(index, call)| ToolCallDelta {
                index: index as u32,
                id: Some(call.id.clone()),
                kind: Some("function".into()),
                function: FunctionCall {
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                },
            })
            .collect()
    });
    ChatCompletionChunk {
        id: id.to_string(),
        object: "chat.completion.chunk".into(),
        created,
        model: chunk.model.clone(),
        choices: vec![ChatCompletionChunkChoice {
            index: chunk.delta.index,
            delta: ChatDelta {
                role: first.then_some(Role::Assistant),
                content: (!message.content.is_empty()).then(|| message.content.clone()),
                tool_calls,
            },
            finish_reason: chunk.delta.finish_reason.clone(),
        }],
        usage: chunk.delta.usage.as_ref().map(to_usage),
    }
}

pub fn embeddings_response(result: TextEmbeddingResult) -> EmbeddingsResponse {
    EmbeddingsResponse {
        object: "list".into(),
        data: result
            .embeddings
            .into_iter()
            .enumerate()
            .map(|(index, embedding)| Embedding {
                object: "embedding".into(),
                embedding,
                index: index as u32,
            })
            .collect(),
        model: result.model,
        usage: EmbeddingUsage {
            prompt_tokens: result.usage.tokens,
            total_tokens: result.usage.total_tokens,
        },
    }
}

/// Model cards carry the upstream model type slug in `object`.
pub fn model_card(model: &AIModelEntity, owned_by: &str, created: i64) -> ModelCard {
    ModelCard {
        id: model.model.clone(),
        object: model.model_type.to_origin_model_type().to_string(),
        created,
        owned_by: owned_by.to_string(),
    }
}
