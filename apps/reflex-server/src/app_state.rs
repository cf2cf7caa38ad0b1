use std::sync::Arc;

use reflex_core::KnowledgeBaseConfig;
use reflex_graph::ReflexionGraph;
use reflex_kb::KbChatEngine;
use reflex_providers::ProviderManager;

/// Provider and model used by the plain chat endpoint when a request does
/// not name one.
#[derive(Clone, Debug, Default)]
pub(crate) struct ChatDefaults {
    pub provider: String,
    pub model: Option<String>,
    pub temperature: f64,
}

/// Request defaults for the knowledge-base endpoints.
#[derive(Clone, Debug, Default)]
pub(crate) struct KbDefaults {
    pub model: Option<String>,
    pub top_k: usize,
    pub score_threshold: f64,
    pub temperature: f64,
    pub prompt_name: String,
}

impl KbDefaults {
    pub fn from_config(cfg: &KnowledgeBaseConfig, model: Option<String>) -> Self {
        Self {
            model,
            top_k: cfg.top_k,
            score_threshold: cfg.score_threshold,
            temperature: cfg.temperature,
            prompt_name: cfg.prompt_name.clone(),
        }
    }
}

#[derive(Clone)]
pub(crate) struct AppState {
    providers: ProviderManager,
    kb: Arc<KbChatEngine>,
    graph: Arc<ReflexionGraph>,
    chat_defaults: Arc<ChatDefaults>,
    kb_defaults: Arc<KbDefaults>,
}

impl AppState {
    pub fn builder(
        providers: ProviderManager,
        kb: KbChatEngine,
        graph: ReflexionGraph,
    ) -> AppStateBuilder {
        AppStateBuilder {
            providers,
            kb,
            graph,
            chat_defaults: ChatDefaults::default(),
            kb_defaults: KbDefaults::default(),
        }
    }

    pub fn providers(&self) -> &ProviderManager {
        &self.providers
    }

    pub fn kb(&self) -> &KbChatEngine {
        &self.kb
    }

    pub fn graph(&self) -> Arc<ReflexionGraph> {
        Arc::clone(&self.graph)
    }

    pub fn chat_defaults(&self) -> &ChatDefaults {
        &self.chat_defaults
    }

    pub fn kb_defaults(&self) -> &KbDefaults {
        &self.kb_defaults
    }
}

pub(crate) struct AppStateBuilder {
    providers: ProviderManager,
    kb: KbChatEngine,
    graph: ReflexionGraph,
    chat_defaults: ChatDefaults,
    kb_defaults: KbDefaults,
}

impl AppStateBuilder {
    pub fn with_chat_defaults(mut self, defaults: ChatDefaults) -> Self {
        self.chat_defaults = defaults;
        self
    }

    pub fn with_kb_defaults(mut self, defaults: KbDefaults) -> Self {
        self.kb_defaults = defaults;
        self
    }

    pub fn build(self) -> AppState {
        AppState {
            providers: self.providers,
            kb: Arc::new(self.kb),
            graph: Arc::new(self.graph),
            chat_defaults: Arc::new(self.chat_defaults),
            kb_defaults: Arc::new(self.kb_defaults),
        }
    }
}
