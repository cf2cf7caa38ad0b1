use std::mem;

use axum::{
    handler::Handler,
    routing::{get, post},
    Router,
};

use crate::{api, AppState};

pub(crate) struct RouterBuilder {
    router: Router<AppState>,
    endpoints: Vec<String>,
}

impl RouterBuilder {
    pub fn new() -> Self {
        Self {
            router: Router::new(),
            endpoints: Vec::new(),
        }
    }

    pub fn route_get<H, T>(&mut self, path: &'static str, handler: H) -> &mut Self
    where
        H: Handler<T, AppState> + Clone + 'static,
        T: Send + 'static,
    {
        self.endpoints.push(format!("GET {path}"));
        let router = mem::take(&mut self.router);
        self.router = router.route(path, get(handler));
        self
    }

    pub fn route_post<H, T>(&mut self, path: &'static str, handler: H) -> &mut Self
    where
        H: Handler<T, AppState> + Clone + 'static,
        T: Send + 'static,
    {
        self.endpoints.push(format!("POST {path}"));
        let router = mem::take(&mut self.router);
        self.router = router.route(path, post(handler));
        self
    }

    pub fn build(self) -> (Router<AppState>, Vec<String>) {
        (self.router, self.endpoints)
    }
}

pub(crate) mod paths {
    pub const HEALTHZ: &str = "/healthz";
    pub const MODEL_PROVIDERS: &str = "/workspaces/current/model-providers";
    pub const MODEL_TYPES: &str = "/workspaces/current/models/model-types/{model_type}";
    pub const PROVIDER_MODELS: &str = "/{provider}/v1/models";
    pub const PROVIDER_EMBEDDINGS: &str = "/{provider}/v1/embeddings";
    pub const PROVIDER_CHAT_COMPLETIONS: &str = "/{provider}/v1/chat/completions";
    pub const KB_CHAT_WITH_CSV: &str = "/knowledge_base/chat_with_csv";
    pub const CHAT: &str = "/chat/chat";
    pub const CHAT_REFLEXION: &str = "/chat/reflexion";
}

pub(crate) fn build_router() -> (Router<AppState>, Vec<String>) {
    let mut builder = RouterBuilder::new();
    builder.route_get(paths::HEALTHZ, api::meta::healthz);
    register_gateway_routes(&mut builder);
    builder
        .route_post(paths::KB_CHAT_WITH_CSV, api::kb::chat_with_csv)
        .route_post(paths::CHAT, api::chat::chat)
        .route_post(paths::CHAT_REFLEXION, api::reflexion::reflexion_chat);
    builder.build()
}

fn register_gateway_routes(builder: &mut RouterBuilder) {
    builder
        .route_get(paths::MODEL_PROVIDERS, api::providers::model_providers)
        .route_get(paths::MODEL_TYPES, api::providers::models_by_type)
        .route_get(paths::PROVIDER_MODELS, api::openai::list_models)
        .route_post(paths::PROVIDER_EMBEDDINGS, api::openai::create_embeddings)
        .route_post(
            paths::PROVIDER_CHAT_COMPLETIONS,
            api::openai::create_chat_completion,
        );
}
