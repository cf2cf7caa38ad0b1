use std::convert::Infallible;

use axum::extract::State;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::{stream, StreamExt};
use reflex_graph::{GraphEvent, Step};
use reflex_providers::PromptMessage;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;

use crate::{responses, AppState};

#[derive(Debug, Deserialize)]
pub struct ReflexionRequest {
    #[serde(default)]
    pub thread_id: Option<String>,
    pub query: String,
    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, Serialize)]
pub struct ReflexionResponse {
    pub thread_id: String,
    pub steps: Vec<Step>,
    pub events: Vec<GraphEvent>,
    pub answer: String,
    pub references: Vec<String>,
}

fn event_name(event: &GraphEvent) -> &'static str {
    match event {
        GraphEvent::ToolCalls { .. } => "tool_calls",
        GraphEvent::Draft(_) => "draft",
        GraphEvent::Revise(_) => "revise",
    }
}

fn sse_event(event: &GraphEvent) -> Event {
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    Event::default().event(event_name(event)).data(data)
}

/// `POST /chat/reflexion`
pub async fn reflexion_chat(
    State(state): State<AppState>,
    Json(req): Json<ReflexionRequest>,
) -> Response {
    if req.query.trim().is_empty() {
        return responses::bad_request("query must not be empty");
    }
    let thread_id = req
        .thread_id
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let input = vec![PromptMessage::user(req.query)];
    let graph = state.graph();

    if !req.stream {
        return match graph.invoke(&thread_id, input).await {
            Ok(run) => responses::json_ok(ReflexionResponse {
                thread_id: run.thread_id,
                steps: run.steps,
                events: run.events,
                answer: run.state.answer,
                references: run.state.references,
            }),
            Err(err) => responses::graph_error(&err),
        };
    }

    let (rx, handle) = graph.spawn_stream(thread_id.clone(), input);
    let events = ReceiverStream::new(rx).map(|event| Ok::<_, Infallible>(sse_event(&event)));
    // The channel closes once the run returns, so the outcome is ready here.
    let outcome = stream::once(async move {
        let event = match handle.await {
            Ok(Ok(run)) => Event::default().event("end").data(
                json!({
                    "thread_id": run.thread_id,
                    "answer": run.state.answer,
                    "references": run.state.references,
                })
                .to_string(),
            ),
            Ok(Err(err)) => {
                warn!(target: "reflex::graph", thread_id, "reflexion run failed: {err}");
                Event::default().event("error").data(err.to_string())
            }
            Err(join) => {
                warn!(target: "reflex::graph", thread_id, "reflexion task aborted: {join}");
                Event::default().event("error").data(join.to_string())
            }
        };
        Ok::<_, Infallible>(event)
    });
    Sse::new(events.chain(outcome)).into_response()
}
