use serde::{Deserialize, Serialize};

/// Kind of model a provider can serve.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ModelType {
    #[serde(rename = "llm")]
    Llm,
    #[serde(rename = "text-embedding")]
    TextEmbedding,
    #[serde(rename = "rerank")]
    Rerank,
    #[serde(rename = "speech2text")]
    Speech2Text,
    #[serde(rename = "tts")]
    Tts,
    #[serde(rename = "moderation")]
    Moderation,
}

impl ModelType {
    pub const ALL: [ModelType; 6] = [
        ModelType::Llm,
        ModelType::TextEmbedding,
        ModelType::Rerank,
        ModelType::Speech2Text,
        ModelType::Tts,
        ModelType::Moderation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelType::Llm => "llm",
            ModelType::TextEmbedding => "text-embedding",
            ModelType::Rerank => "rerank",
            ModelType::Speech2Text => "speech2text",
            ModelType::Tts => "tts",
            ModelType::Moderation => "moderation",
        }
    }

    /// Name used in OpenAI-style model cards (`object` field).
    pub fn to_origin_model_type(&self) -> &'static str {
        match self {
            ModelType::Llm => "text-generation",
            ModelType::TextEmbedding => "embeddings",
            ModelType::Rerank => "reranking",
            ModelType::Speech2Text => "speech2text",
            ModelType::Tts => "tts",
            ModelType::Moderation => "moderation",
        }
    }

    /// Accepts both the short slug and the origin model type name.
    pub fn from_slug(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "llm" | "text-generation" => Some(ModelType::Llm),
            "text-embedding" | "embeddings" => Some(ModelType::TextEmbedding),
            "rerank" | "reranking" => Some(ModelType::Rerank),
            "speech2text" => Some(ModelType::Speech2Text),
            "tts" => Some(ModelType::Tts),
            "moderation" => Some(ModelType::Moderation),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ModelFeature {
    ToolCall,
    MultiToolCall,
    StreamToolCall,
    AgentThought,
    Vision,
}

impl ModelFeature {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelFeature::ToolCall => "tool-call",
            ModelFeature::MultiToolCall => "multi-tool-call",
            ModelFeature::StreamToolCall => "stream-tool-call",
            ModelFeature::AgentThought => "agent-thought",
            ModelFeature::Vision => "vision",
        }
    }

    pub fn from_slug(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "tool-call" => Some(ModelFeature::ToolCall),
            "multi-tool-call" => Some(ModelFeature::MultiToolCall),
            "stream-tool-call" => Some(ModelFeature::StreamToolCall),
            "agent-thought" => Some(ModelFeature::AgentThought),
            "vision" => Some(ModelFeature::Vision),
            _ => None,
        }
    }
}

/// Where a model entry came from: declared up front or discovered from the
/// upstream server.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FetchFrom {
    #[default]
    PredefinedModel,
    CustomizableModel,
}

impl FetchFrom {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchFrom::PredefinedModel => "predefined-model",
            FetchFrom::CustomizableModel => "customizable-model",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AIModelEntity {
    pub model: String,
    pub label: String,
    pub model_type: ModelType,
    #[serde(default)]
    pub features: Vec<ModelFeature>,
    #[serde(default)]
    pub fetch_from: FetchFrom,
}

impl AIModelEntity {
    pub fn new(model: impl Into<String>, model_type: ModelType) -> Self {
        let model = model.into();
        Self {
            label: model.clone(),
            model,
            model_type,
            features: Vec::new(),
            fetch_from: FetchFrom::PredefinedModel,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_features(mut self, features: Vec<ModelFeature>) -> Self {
        self.features = features;
        self
    }

    pub fn with_fetch_from(mut self, fetch_from: FetchFrom) -> Self {
        self.fetch_from = fetch_from;
        self
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ProviderEntity {
    pub provider: String,
    pub label: String,
    pub supported_model_types: Vec<ModelType>,
}

impl ProviderEntity {
    pub fn supports(&self, model_type: ModelType) -> bool {
        self.supported_model_types.contains(&model_type)
    }
}
