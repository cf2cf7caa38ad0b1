use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use reflex_core::config::SYNTHETIC_PROVIDER;
use reflex_core::{Config, ProviderConfig, ProviderKind, ServerConfig};
use reflex_graph::{MemoryCheckpointer, ProviderChatModel, ReflexionGraph, SearchInternetTool};
use reflex_kb::{KbChatEngine, KbRegistry};
use reflex_providers::{
    AIModelEntity, ModelFeature, ModelType, OpenAiCompatibleProvider, ProviderManager,
    SharedProvider, SyntheticProvider, SYNTHETIC_CHAT_MODEL,
};
use tracing::{debug, info, warn};

use crate::app_state::{AppState, ChatDefaults, KbDefaults};
use crate::{access_log, router};

fn model_entities(provider: &ProviderConfig) -> anyhow::Result<Vec<AIModelEntity>> {
    provider
        .models
        .iter()
        .map(|m| {
            let model_type = ModelType::from_slug(&m.model_type).ok_or_else(|| {
                anyhow!(
                    "provider {}: unknown model_type `{}` for model {}",
                    provider.id,
                    m.model_type,
                    m.name
                )
            })?;
            let features = m
                .features
                .iter()
                .filter_map(|f| {
                    let parsed = ModelFeature::from_slug(f);
                    if parsed.is_none() {
                        warn!(target: "reflex::bootstrap", provider = %provider.id, feature = %f, "ignoring unknown model feature");
                    }
                    parsed
                })
                .collect();
            let mut entity = AIModelEntity::new(&m.name, model_type).with_features(features);
            if let Some(label) = &m.label {
                entity = entity.with_label(label);
            }
            Ok(entity)
        })
        .collect()
}

fn build_provider(provider: &ProviderConfig) -> anyhow::Result<SharedProvider> {
    let label = provider.label.clone().unwrap_or_else(|| provider.id.clone());
    match provider.kind {
        ProviderKind::Synthetic => Ok(Arc::new(SyntheticProvider::with_id(&provider.id))),
        ProviderKind::OpenAi => {
            let base_url = provider
                .base_url
                .as_deref()
                .ok_or_else(|| anyhow!("provider {}: base_url is required", provider.id))?;
            let api_key = provider
                .api_key_env
                .as_deref()
                .and_then(|var| std::env::var(var).ok());
            if provider.api_key_env.is_some() && api_key.is_none() {
                warn!(target: "reflex::bootstrap", provider = %provider.id, "api key variable is not set");
            }
            let built = OpenAiCompatibleProvider::new(&provider.id, label, base_url)
                .with_context(|| format!("provider {}", provider.id))?
                .with_api_key(api_key)
                .with_models(model_entities(provider)?);
            Ok(Arc::new(built))
        }
    }
}

/// Every configured provider, or the synthetic one when none are.
pub(crate) fn build_providers(cfg: &Config) -> anyhow::Result<ProviderManager> {
    let mut providers = ProviderManager::new();
    for provider in &cfg.providers {
        providers
            .register(build_provider(provider)?)
            .context("registering providers")?;
        info!(target: "reflex::bootstrap", provider = %provider.id, kind = ?provider.kind, "provider registered");
    }
    if providers.is_empty() {
        info!(target: "reflex::bootstrap", "no providers configured; using the synthetic provider");
        providers.register(Arc::new(SyntheticProvider::new()))?;
    }
    Ok(providers)
}

/// Explicit model, else the provider's first declared LLM, else the echo
/// model for synthetic providers.
fn resolve_chat_model(cfg: &Config, provider: &str, explicit: Option<&str>) -> Option<String> {
    if let Some(model) = explicit {
        return Some(model.to_string());
    }
    if let Some(model) = cfg.default_llm_model(provider) {
        return Some(model.to_string());
    }
    let synthetic = cfg
        .providers
        .iter()
        .find(|p| p.id == provider)
        .map_or(provider == SYNTHETIC_PROVIDER, |p| {
            p.kind == ProviderKind::Synthetic
        });
    synthetic.then(|| SYNTHETIC_CHAT_MODEL.to_string())
}

fn public_base_url(server: &ServerConfig) -> String {
    server
        .public_base_url
        .clone()
        .unwrap_or_else(|| format!("http://{}:{}/", server.host, server.port))
}

pub(crate) fn build_kb(
    cfg: &Config,
    providers: &ProviderManager,
) -> anyhow::Result<(KbChatEngine, KbDefaults)> {
    let kb_cfg = &cfg.knowledge_base;
    let provider = kb_cfg
        .provider
        .clone()
        .unwrap_or_else(|| cfg.default_provider().to_string());
    providers
        .get(&provider)
        .context("knowledge_base.provider")?;
    let registry = match &kb_cfg.root {
        Some(root) => KbRegistry::load_dir(Path::new(root))
            .with_context(|| format!("loading knowledge bases from {root}"))?,
        None => KbRegistry::new(),
    };
    info!(target: "reflex::bootstrap", knowledge_bases = ?registry.names(), %provider, "knowledge bases ready");
    let model = resolve_chat_model(cfg, &provider, kb_cfg.model.as_deref());
    let engine = KbChatEngine::new(
        Arc::new(registry),
        providers.clone(),
        provider,
        public_base_url(&cfg.server),
    );
    Ok((engine, KbDefaults::from_config(kb_cfg, model)))
}

pub(crate) fn build_graph(
    cfg: &Config,
    providers: &ProviderManager,
) -> anyhow::Result<ReflexionGraph> {
    let rcfg = &cfg.reflexion;
    let provider_id = rcfg
        .provider
        .clone()
        .unwrap_or_else(|| cfg.default_provider().to_string());
    let provider = providers.get(&provider_id).context("reflexion.provider")?;
    let model = resolve_chat_model(cfg, &provider_id, rcfg.model.as_deref()).ok_or_else(|| {
        anyhow!("reflexion: no model for provider {provider_id}; set reflexion.model")
    })?;
    let mut builder = ReflexionGraph::builder(
        Arc::new(ProviderChatModel::new(provider, &model)),
        Vec::new(),
        rcfg.history_len,
    )
    .max_iterations(rcfg.max_iterations)
    .checkpointer(Arc::new(MemoryCheckpointer::with_capacity(rcfg.max_threads)));
    if let Some(url) = &rcfg.search_url {
        builder = builder.fallback_tool(Arc::new(SearchInternetTool::new(url, rcfg.search_top_k)));
    }
    let graph = builder.build()?;
    info!(
        target: "reflex::bootstrap",
        provider = %provider_id,
        %model,
        max_iterations = graph.max_iterations(),
        max_threads = rcfg.max_threads,
        tools = ?graph.tool_names(),
        "reflexion graph ready"
    );
    Ok(graph)
}

pub(crate) fn build_state(cfg: &Config) -> anyhow::Result<AppState> {
    let providers = build_providers(cfg)?;
    let (kb, kb_defaults) = build_kb(cfg, &providers)?;
    let graph = build_graph(cfg, &providers)?;
    let chat_provider = cfg.default_provider().to_string();
    let chat_defaults = ChatDefaults {
        model: resolve_chat_model(cfg, &chat_provider, None),
        provider: chat_provider,
        temperature: cfg.knowledge_base.temperature,
    };
    Ok(AppState::builder(providers, kb, graph)
        .with_chat_defaults(chat_defaults)
        .with_kb_defaults(kb_defaults)
        .build())
}

/// Routes with state applied and every layer attached.
pub(crate) fn app(state: AppState, concurrency_limit: usize) -> axum::Router<()> {
    let (router, endpoints) = router::build_router();
    debug!(target: "reflex::bootstrap", ?endpoints, "routes registered");
    attach_global_layers(attach_http_layers(
        router.with_state::<()>(state),
        concurrency_limit,
    ))
}

pub(crate) fn attach_http_layers(
    router: axum::Router<()>,
    concurrency_limit: usize,
) -> axum::Router<()> {
    use tower::limit::ConcurrencyLimitLayer;
    use tower_http::{cors::CorsLayer, trace::TraceLayer};

    router
        .layer(TraceLayer::new_for_http())
        .layer(ConcurrencyLimitLayer::new(concurrency_limit))
        .layer(CorsLayer::permissive())
}

pub(crate) fn attach_global_layers(router: axum::Router<()>) -> axum::Router<()> {
    router.layer(axum::middleware::from_fn(access_log::access_log_mw))
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum HttpConfigError {
    #[error("invalid REFLEX_HTTP_MAX_CONC: {0}")]
    InvalidConcurrency(String),
    #[error("invalid REFLEX_PORT: {0}")]
    InvalidPort(String),
    #[error("invalid REFLEX_BIND: {0}")]
    InvalidBind(String),
}

#[derive(Debug)]
pub(crate) struct HttpConfig {
    pub addr: std::net::SocketAddr,
    pub concurrency_limit: usize,
}

/// Listener settings: environment overrides on top of `[server]`.
pub(crate) fn http_config_from_env(server: &ServerConfig) -> Result<HttpConfig, HttpConfigError> {
    let concurrency_limit = std::env::var("REFLEX_HTTP_MAX_CONC")
        .ok()
        .map(|raw| {
            raw.parse()
                .map_err(|_| HttpConfigError::InvalidConcurrency(raw))
        })
        .transpose()? // Option<Result> -> Result<Option>
        .unwrap_or(server.concurrency);
    if concurrency_limit == 0 {
        return Err(HttpConfigError::InvalidConcurrency("0".into()));
    }

    let bind = std::env::var("REFLEX_BIND").unwrap_or_else(|_| server.host.clone());
    let port = match std::env::var("REFLEX_PORT") {
        Ok(raw) => raw.parse().map_err(|_| HttpConfigError::InvalidPort(raw))?,
        Err(_) => server.port,
    };

    let addr = format!("{}:{}", bind, port)
        .parse()
        .map_err(|_| HttpConfigError::InvalidBind(bind.clone()))?;

    Ok(HttpConfig {
        addr,
        concurrency_limit,
    })
}
