use axum::{http::StatusCode, response::IntoResponse, Json};
use reflex_graph::GraphError;
use reflex_kb::KbError;
use reflex_protocol::ProblemDetails;
use reflex_providers::ProviderError;
use serde::Serialize;
use tracing::warn;

pub fn json_ok<T: Serialize>(value: T) -> axum::response::Response {
    (StatusCode::OK, Json(value)).into_response()
}

pub fn problem(status: StatusCode, detail: impl Into<String>) -> axum::response::Response {
    problem_with_code(status, detail, None)
}

fn problem_with_code(
    status: StatusCode,
    detail: impl Into<String>,
    code: Option<&str>,
) -> axum::response::Response {
    let mut body = ProblemDetails::new(
        status.as_u16(),
        status.canonical_reason().unwrap_or("Error"),
    )
    .with_detail(detail);
    if let Some(code) = code {
        body = body.with_code(code);
    }
    (status, Json(body)).into_response()
}

pub fn bad_request(detail: impl Into<String>) -> axum::response::Response {
    problem(StatusCode::BAD_REQUEST, detail)
}

/// Value errors are the caller's fault (400), upstream invocation failures
/// are ours (500), unknown providers and models are 404.
pub fn provider_error(err: &ProviderError) -> axum::response::Response {
    match err {
        ProviderError::Value(msg) => problem_with_code(StatusCode::BAD_REQUEST, msg, Some("value")),
        ProviderError::Invoke(inner) => {
            warn!(target: "reflex::http", kind = inner.kind(), "upstream invocation failed: {inner}");
            problem_with_code(
                StatusCode::INTERNAL_SERVER_ERROR,
                inner.to_string(),
                Some(inner.kind()),
            )
        }
        ProviderError::UnknownProvider(_) | ProviderError::UnknownModel(_) => {
            problem_with_code(StatusCode::NOT_FOUND, err.to_string(), Some("not_found"))
        }
    }
}

pub fn graph_error(err: &GraphError) -> axum::response::Response {
    match err {
        GraphError::Model(inner) => provider_error(inner),
        other => {
            warn!(target: "reflex::http", "reflexion run failed: {other}");
            problem(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}

/// Missing knowledge bases are answered by the handler with the envelope
/// payload; everything else lands here.
pub fn kb_error(err: &KbError) -> axum::response::Response {
    match err {
        KbError::Model(inner) => provider_error(inner),
        KbError::InvalidParameter(_) | KbError::Csv(_) => bad_request(err.to_string()),
        KbError::NotFound(_) => problem(StatusCode::NOT_FOUND, err.to_string()),
        KbError::Io(_) | KbError::Search(_) => {
            warn!(target: "reflex::http", "knowledge base chat failed: {err}");
            problem(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}
