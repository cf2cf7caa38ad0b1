use std::convert::Infallible;

use axum::extract::State;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::StreamExt;
use reflex_protocol::HistoryEntry;
use reflex_providers::{ChatInvocation, PromptMessage, PromptMessageRole};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::api::into_chunk_stream;
use crate::{responses, AppState};

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub query: String,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
}

/// Prior turns followed by the new user query.
fn prompt_messages(history: &[HistoryEntry], query: &str) -> Vec<PromptMessage> {
    history
        .iter()
        .map(|h| PromptMessage::new(PromptMessageRole::from_slug(&h.role), h.content.clone()))
        .chain(std::iter::once(PromptMessage::user(query)))
        .collect()
}

/// `POST /chat/chat`
pub async fn chat(State(state): State<AppState>, Json(req): Json<ChatRequest>) -> Response {
    let defaults = state.chat_defaults();
    let provider = req.provider.unwrap_or_else(|| defaults.provider.clone());
    let Some(model) = req.model.or_else(|| defaults.model.clone()) else {
        return responses::bad_request("no chat model configured; pass `model`");
    };
    let temperature = req.temperature.unwrap_or(defaults.temperature);
    if !(0.0..=2.0).contains(&temperature) {
        return responses::bad_request("temperature must be between 0 and 2");
    }

    let invocation = ChatInvocation::new(model, prompt_messages(&req.history, &req.query))
        .with_parameter("temperature", json!(temperature))
        .streaming(req.stream);
    let response = match state.providers().invoke_chat(&provider, invocation).await {
        Ok(response) => response,
        Err(err) => return responses::provider_error(&err),
    };

    if !req.stream {
        return match response.collect().await {
            Ok(result) => responses::json_ok(json!({"answer": result.message.content})),
            Err(err) => responses::provider_error(&err),
        };
    }

    let tokens = into_chunk_stream(response).filter_map(|item| async move {
        match item {
            Ok(chunk) if chunk.delta.message.content.is_empty() => None,
            Ok(chunk) => Some(Ok::<_, Infallible>(
                Event::default().data(chunk.delta.message.content),
            )),
            Err(err) => {
                warn!(target: "reflex::chat", "stream failed: {err}");
                Some(Ok(Event::default().event("error").data(err.to_string())))
            }
        }
    });
    Sse::new(tokens).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{self, ChatOutcome, StubProvider};
    use axum::{body::Body, http::header, http::Request, http::StatusCode};
    use serde_json::Value;
    use std::sync::Arc;
    use tower::util::ServiceExt;

    fn post(body: Value) -> Request<Body> {
        Request::post("/chat/chat")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    #[test]
    fn history_precedes_query() {
        let history = vec![
            HistoryEntry {
                role: "user".into(),
                content: "first".into(),
            },
            HistoryEntry {
                role: "assistant".into(),
                content: "reply".into(),
            },
        ];
        let messages = prompt_messages(&history, "second");
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].role, PromptMessageRole::Assistant);
        assert_eq!(messages[2], PromptMessage::user("second"));
    }

    #[tokio::test]
    async fn answers_with_default_model() {
        let app = test_support::app(test_support::state_with(Vec::new(), "synthetic"));
        let resp = app
            .oneshot(post(json!({"query": "ping"})))
            .await
            .expect("response");
        assert_eq!(resp.status(), StatusCode::OK);
        let body = test_support::body_json(resp).await;
        assert_eq!(body["answer"], "You said: ping");
    }

    #[tokio::test]
    async fn streams_tokens_as_sse() {
        let app = test_support::app(test_support::state_with(Vec::new(), "synthetic"));
        let resp = app
            .oneshot(post(json!({"query": "two words", "stream": true})))
            .await
            .expect("response");
        assert_eq!(resp.status(), StatusCode::OK);
        let text = test_support::body_text(resp).await;
        let tokens: String = text
            .lines()
            .filter_map(|l| l.strip_prefix("data: "))
            .collect();
        assert_eq!(tokens, "You said: two words");
    }

    #[tokio::test]
    async fn routes_to_named_provider() {
        let stub = Arc::new(StubProvider::new("stub", ChatOutcome::Reply("from stub".into())));
        let app = test_support::app(test_support::state_with(vec![stub.clone()], "stub"));
        let resp = app
            .oneshot(post(json!({
                "query": "hi",
                "provider": "stub",
                "model": "stub-chat",
                "history": [{"role": "user", "content": "earlier"}]
            })))
            .await
            .expect("response");
        let body = test_support::body_json(resp).await;
        assert_eq!(body["answer"], "from stub");
        let seen = stub.invocations();
        assert_eq!(seen[0].messages.len(), 2);
        assert_eq!(seen[0].parameters["temperature"], json!(0.7));
    }
}
