use std::sync::Arc;

use async_trait::async_trait;
use reflex_providers::{http_timeout, PromptMessage, PromptMessageTool};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("{0}")]
    Runtime(String),
}

/// Something the model can call.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the arguments object.
    fn parameters(&self) -> Value;

    async fn call(&self, arguments: Value) -> Result<Value, ToolError>;

    fn declaration(&self) -> PromptMessageTool {
        PromptMessageTool::new(self.name(), self.description(), self.parameters())
    }
}

pub type SharedTool = Arc<dyn Tool>;

/// Runs the tool calls of an assistant message one after another.
#[derive(Clone, Default)]
pub struct ToolExecutor {
    tools: Vec<SharedTool>,
}

impl ToolExecutor {
    pub fn new(tools: Vec<SharedTool>) -> Self {
        Self { tools }
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn declarations(&self) -> Vec<PromptMessageTool> {
        self.tools.iter().map(|t| t.declaration()).collect()
    }

    /// One tool-result message per requested call, in call order. Unknown
    /// tools and failures are reported back to the model as text.
    pub async fn execute(&self, message: &PromptMessage) -> Vec<PromptMessage> {
        let mut results = Vec::with_capacity(message.tool_calls.len());
        for call in &message.tool_calls {
            let outcome = match self.tools.iter().find(|t| t.name() == call.name) {
                None => Err(ToolError::InvalidArguments(format!(
                    "unknown tool `{}`",
                    call.name
                ))),
                Some(tool) => match parse_arguments(&call.arguments) {
                    Ok(args) => tool.call(args).await,
                    Err(err) => Err(err),
                },
            };
            let content = match outcome {
                Ok(Value::String(text)) => text,
                Ok(value) => value.to_string(),
                Err(err) => {
                    warn!(target: "reflex::graph", tool = %call.name, "tool call failed: {err}");
                    format!("Error: {err}")
                }
            };
            results.push(PromptMessage::tool(call.id.clone(), call.name.clone(), content));
        }
        results
    }
}

fn parse_arguments(raw: &str) -> Result<Value, ToolError> {
    if raw.trim().is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_str(raw).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}

pub const SEARCH_INTERNET: &str = "search_internet";

/// Web search against a SearXNG-compatible JSON endpoint.
pub struct SearchInternetTool {
    client: reqwest::Client,
    endpoint: String,
    top_k: usize,
}

impl SearchInternetTool {
    pub fn new(endpoint: impl Into<String>, top_k: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            top_k: top_k.max(1),
        }
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
}

#[async_trait]
impl Tool for SearchInternetTool {
    fn name(&self) -> &str {
        SEARCH_INTERNET
    }

    fn description(&self) -> &str {
        "Use this tool to search the internet for up-to-date information."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "query for internet search"}
            },
            "required": ["query"]
        })
    }

    async fn call(&self, arguments: Value) -> Result<Value, ToolError> {
        let query = arguments
            .get("query")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("`query` is required".into()))?;
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("q", query), ("format", "json")])
            .timeout(http_timeout::get_duration())
            .send()
            .await
            .map_err(|e| ToolError::Runtime(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ToolError::Runtime(format!(
                "search returned {}",
                response.status()
            )));
        }
        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| ToolError::Runtime(e.to_string()))?;
        let hits: Vec<Value> = body
            .results
            .into_iter()
            .take(self.top_k)
            .map(|hit| json!({"title": hit.title, "link": hit.url, "snippet": hit.content}))
            .collect();
        Ok(Value::Array(hits))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use reflex_providers::AssistantToolCall;

    struct Upper;

    #[async_trait]
    impl Tool for Upper {
        fn name(&self) -> &str {
            "upper"
        }

        fn description(&self) -> &str {
            "uppercase text"
        }

        fn parameters(&self) -> Value {
            json!({"type": "object", "properties": {"text": {"type": "string"}}})
        }

        async fn call(&self, arguments: Value) -> Result<Value, ToolError> {
            arguments
                .get("text")
                .and_then(Value::as_str)
                .map(|t| Value::String(t.to_uppercase()))
                .ok_or_else(|| ToolError::InvalidArguments("text".into()))
        }
    }

    #[tokio::test]
    async fn executes_calls_in_order_and_reports_failures() {
        let executor = ToolExecutor::new(vec![Arc::new(Upper)]);
        let message = PromptMessage::assistant_tool_calls(vec![
            AssistantToolCall::new("c1", "upper", r#"{"text":"abc"}"#),
            AssistantToolCall::new("c2", "missing", "{}"),
            AssistantToolCall::new("c3", "upper", "{broken"),
            AssistantToolCall::new("c4", "upper", "{}"),
        ]);
        let results = executor.execute(&message).await;
        let ids: Vec<_> = results
            .iter()
            .map(|m| m.tool_call_id.as_deref().unwrap_or_default())
            .collect();
        assert_eq!(ids, vec!["c1", "c2", "c3", "c4"]);
        assert!(results.iter().all(|m| m.is_tool_result()));
        assert_eq!(results[0].content, "ABC");
        assert!(results[1].content.starts_with("Error: invalid arguments: unknown tool"));
        assert!(results[2].content.starts_with("Error: invalid arguments"));
        assert!(results[3].content.starts_with("Error:"));
    }

    #[tokio::test]
    async fn search_tool_queries_searxng() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/search")
                    .query_param("q", "rust async")
                    .query_param("format", "json");
                then.status(200).json_body(json!({
                    "results": [
                        {"title": "Tokio", "url": "https://tokio.rs", "content": "runtime"},
                        {"title": "Async book", "url": "https://rust-lang.github.io/async-book", "content": "book"}
                    ]
                }));
            })
            .await;
        let tool = SearchInternetTool::new(server.url("/search"), 1);
        let value = tool
            .call(json!({"query": "rust async"}))
            .await
            .expect("search");
        mock.assert_async().await;
        assert_eq!(
            value,
            json!([{"title": "Tokio", "link": "https://tokio.rs", "snippet": "runtime"}])
        );
    }

    #[tokio::test]
    async fn search_tool_requires_query() {
        let tool = SearchInternetTool::new("http://127.0.0.1:9/search", 3);
        let err = tool.call(json!({})).await.expect_err("missing query");
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
