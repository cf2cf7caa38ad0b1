use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::{stream, StreamExt};
use reflex_protocol::{ChatCompletionRequest, EmbeddingsRequest, ModelList};
use reflex_providers::ProviderError;
use serde_json::json;
use tracing::{debug, warn};

use crate::api::into_chunk_stream;
use crate::message_convert::{
    completion_chunk, completion_response, embeddings_response, model_card, to_invocation,
};
use crate::{responses, AppState};

/// `GET /{provider}/v1/models`
pub async fn list_models(State(state): State<AppState>, Path(provider): Path<String>) -> Response {
    match state.providers().list_models(&provider).await {
        Ok(models) => {
            let created = chrono::Utc::now().timestamp();
            let data = models
                .iter()
                .map(|m| model_card(m, &provider, created))
                .collect();
            responses::json_ok(ModelList::new(data))
        }
        Err(err) => responses::provider_error(&err),
    }
}

/// `POST /{provider}/v1/embeddings`
pub async fn create_embeddings(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Json(req): Json<EmbeddingsRequest>,
) -> Response {
    let texts = req.input.into_texts();
    debug!(target: "reflex::gateway", %provider, model = %req.model, inputs = texts.len(), "embeddings");
    match state
        .providers()
        .invoke_embedding(&provider, &req.model, texts, req.user)
        .await
    {
        Ok(result) => responses::json_ok(embeddings_response(result)),
        Err(err) => responses::provider_error(&err),
    }
}

fn stream_error_frame(err: &ProviderError) -> String {
    let kind = match err {
        ProviderError::Invoke(inner) => inner.kind(),
        ProviderError::Value(_) => "value",
        ProviderError::UnknownProvider(_) | ProviderError::UnknownModel(_) => "not_found",
    };
    json!({"error": {"message": err.to_string(), "type": kind}}).to_string()
}

/// `POST /{provider}/v1/chat/completions`
pub async fn create_chat_completion(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Json(req): Json<ChatCompletionRequest>,
) -> Response {
    let stream_requested = req.stream;
    let invocation = to_invocation(req);
    debug!(
        target: "reflex::gateway",
        %provider,
        model = %invocation.model,
        messages = invocation.messages.len(),
        tools = invocation.tools.len(),
        stream = stream_requested,
        "chat completion"
    );
    let response = match state.providers().invoke_chat(&provider, invocation).await {
        Ok(response) => response,
        Err(err) => return responses::provider_error(&err),
    };

    if !stream_requested {
        return match response.collect().await {
            Ok(result) => responses::json_ok(completion_response(result)),
            Err(err) => responses::provider_error(&err),
        };
    }

    let id = format!("chatcmpl-{}", uuid::Uuid::new_v4().simple());
    let created = chrono::Utc::now().timestamp();
    let mut first = true;
    let frames = into_chunk_stream(response)
        .map(move |item| {
            let data = match item {
                Ok(chunk) => {
                    let frame = completion_chunk(&id, created, &chunk, first);
                    first = false;
                    serde_json::to_string(&frame).unwrap_or_else(|_| "{}".to_string())
                }
                Err(err) => {
                    warn!(target: "reflex::gateway", "stream failed: {err}");
                    stream_error_frame(&err)
                }
            };
            Ok::<_, Infallible>(Event::default().data(data))
        })
        .chain(stream::once(async {
            Ok::<_, Infallible>(Event::default().data("[DONE]"))
        }));
    Sse::new(frames).into_response()
}
