use anyhow::Result;
use jsonschema::{validator_for, Validator};
use once_cell::sync::Lazy;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 20000;
pub const DEFAULT_TOP_K: usize = 3;
pub const DEFAULT_SCORE_THRESHOLD: f64 = 1.0;
pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const DEFAULT_HISTORY_LEN: usize = 10;
pub const DEFAULT_MAX_ITERATIONS: u32 = 2;
pub const DEFAULT_MAX_THREADS: usize = 1024;
pub const SYNTHETIC_PROVIDER: &str = "synthetic";

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_concurrency() -> usize {
    1024
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Maximum in-flight HTTP requests.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Public base URL used to build document download links (e.g., <http://127.0.0.1:20000/>)
    #[serde(default)]
    pub public_base_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            concurrency: default_concurrency(),
            public_base_url: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ProviderKind {
    /// Any server speaking the OpenAI chat/embeddings API.
    #[serde(rename = "openai")]
    OpenAi,
    /// Offline echo provider, used when nothing else is configured.
    #[serde(rename = "synthetic")]
    Synthetic,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct ModelConfig {
    pub name: String,
    /// `llm`, `text-embedding`, `rerank`, `speech2text`, `tts` or `moderation`
    #[serde(default = "default_model_type")]
    pub model_type: String,
    #[serde(default)]
    pub label: Option<String>,
    /// e.g. `tool-call`, `multi-tool-call`, `stream-tool-call`, `vision`
    #[serde(default)]
    pub features: Vec<String>,
}

fn default_model_type() -> String {
    "llm".into()
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct ProviderConfig {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    pub kind: ProviderKind,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Name of the environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub models: Vec<ModelConfig>,
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

fn default_score_threshold() -> f64 {
    DEFAULT_SCORE_THRESHOLD
}

fn default_temperature() -> f64 {
    DEFAULT_TEMPERATURE
}

fn default_prompt_name() -> String {
    "default".into()
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct KnowledgeBaseConfig {
    /// Directory holding one sub-directory per knowledge base.
    #[serde(default)]
    pub root: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f64,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_prompt_name")]
    pub prompt_name: String,
}

impl Default for KnowledgeBaseConfig {
    fn default() -> Self {
        Self {
            root: None,
            provider: None,
            model: None,
            top_k: default_top_k(),
            score_threshold: default_score_threshold(),
            temperature: default_temperature(),
            prompt_name: default_prompt_name(),
        }
    }
}

fn default_history_len() -> usize {
    DEFAULT_HISTORY_LEN
}

fn default_max_iterations() -> u32 {
    DEFAULT_MAX_ITERATIONS
}

fn default_max_threads() -> usize {
    DEFAULT_MAX_THREADS
}

fn default_search_top_k() -> usize {
    DEFAULT_TOP_K
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct ReflexionConfig {
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_history_len")]
    pub history_len: usize,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// SearXNG-compatible search endpoint for the internet search tool.
    #[serde(default)]
    pub search_url: Option<String>,
    #[serde(default = "default_search_top_k")]
    pub search_top_k: usize,
    /// Conversations kept in memory; the least recently saved is dropped first.
    #[serde(default = "default_max_threads")]
    pub max_threads: usize,
}

impl Default for ReflexionConfig {
    fn default() -> Self {
        Self {
            provider: None,
            model: None,
            history_len: default_history_len(),
            max_iterations: default_max_iterations(),
            search_url: None,
            search_top_k: default_search_top_k(),
            max_threads: default_max_threads(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub knowledge_base: KnowledgeBaseConfig,
    #[serde(default)]
    pub reflexion: ReflexionConfig,
}

impl Config {
    /// Provider id used when a section does not name one: the first configured
    /// provider, or the synthetic fallback.
    pub fn default_provider(&self) -> &str {
        self.providers
            .first()
            .map(|p| p.id.as_str())
            .unwrap_or(SYNTHETIC_PROVIDER)
    }

    /// First LLM model declared by `provider`, if any.
    pub fn default_llm_model(&self, provider: &str) -> Option<&str> {
        self.providers
            .iter()
            .find(|p| p.id == provider)
            .and_then(|p| {
                p.models
                    .iter()
                    .find(|m| m.model_type == "llm")
                    .map(|m| m.name.as_str())
            })
    }
}

static CONFIG_SCHEMA: Lazy<Validator> = Lazy::new(|| {
    let schema = schemars::schema_for!(Config);
    let schema_value = serde_json::to_value(&schema).expect("schema value");
    validator_for(&schema_value).expect("valid schema")
});

pub fn parse_config(content: &str) -> Result<Config> {
    let raw: toml::Value = toml::from_str(content)?;
    let json_value = serde_json::to_value(&raw)?;
    let validation_errors: Vec<_> = CONFIG_SCHEMA
        .iter_errors(&json_value)
        .map(|e| e.to_string())
        .collect();
    if !validation_errors.is_empty() {
        return Err(anyhow::anyhow!(validation_errors.join(", ")));
    }
    let cfg: Config = toml::from_str(content)?;
    Ok(cfg)
}

pub fn load_config(path: &str) -> Result<Config> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}
