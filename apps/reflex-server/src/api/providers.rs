use axum::extract::{Path, Query, State};
use axum::response::Response;
use reflex_protocol::{
    ProviderListResponse, ProviderModelSummary, ProviderModelTypeResponse, ProviderSummary,
    ProviderWithModels,
};
use reflex_providers::{AIModelEntity, ModelType, ProviderEntity};
use serde::Deserialize;

use crate::{responses, AppState};

#[derive(Debug, Default, Deserialize)]
pub struct ProviderListQuery {
    #[serde(default)]
    pub model_type: Option<String>,
}

fn parse_model_type(raw: &str) -> Result<ModelType, Response> {
    ModelType::from_slug(raw)
        .ok_or_else(|| responses::bad_request(format!("unknown model type: {raw}")))
}

fn provider_summary(entity: ProviderEntity) -> ProviderSummary {
    ProviderSummary {
        supported_model_types: entity
            .supported_model_types
            .iter()
            .map(|t| t.as_str().to_string())
            .collect(),
        provider: entity.provider,
        label: entity.label,
    }
}

fn model_summary(model: AIModelEntity) -> ProviderModelSummary {
    ProviderModelSummary {
        label: model.label,
        model_type: model.model_type.as_str().to_string(),
        features: model.features.iter().map(|f| f.as_str().to_string()).collect(),
        fetch_from: model.fetch_from.as_str().to_string(),
        model: model.model,
    }
}

/// `GET /workspaces/current/model-providers`
pub async fn model_providers(
    State(state): State<AppState>,
    Query(query): Query<ProviderListQuery>,
) -> Response {
    let model_type = match query.model_type.as_deref().filter(|s| !s.trim().is_empty()) {
        Some(raw) => match parse_model_type(raw) {
            Ok(t) => Some(t),
            Err(resp) => return resp,
        },
        None => None,
    };
    let data = state
        .providers()
        .provider_list(model_type)
        .into_iter()
        .map(provider_summary)
        .collect();
    responses::json_ok(ProviderListResponse { data })
}

/// `GET /workspaces/current/models/model-types/{model_type}`
pub async fn models_by_type(
    State(state): State<AppState>,
    Path(model_type): Path<String>,
) -> Response {
    let model_type = match parse_model_type(&model_type) {
        Ok(t) => t,
        Err(resp) => return resp,
    };
    let data = state
        .providers()
        .models_by_model_type(model_type)
        .await
        .into_iter()
        .map(|(entity, models)| ProviderWithModels {
            provider: entity.provider,
            label: entity.label,
            models: models.into_iter().map(model_summary).collect(),
        })
        .collect();
    responses::json_ok(ProviderModelTypeResponse { data })
}
