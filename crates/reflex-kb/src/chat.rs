use std::io::Read;
use std::sync::Arc;

use reflex_providers::{extract_json_or_text, ChatInvocation, PromptMessage, ProviderManager};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;

use crate::error::KbError;
use crate::fields::read_fields;
use crate::prompts::{self, EMPTY_PROMPT};
use crate::service::{KbRegistry, ScoredDocument};

/// Appended to `docs` when retrieval finds nothing.
pub const NO_DOCS_NOTICE: &str =
    "<span style='color:red'>No relevant documents found; this answer comes from the model itself.</span>";

pub const QUERY_TEMPLATE_ALL_IN_ONE: &str = "Given the input field name and field value, return the matching standard field and one possible value in the required output format.
Input format (JSON): [{\"src_column_name\": input field name, \"src_column_value\": input field value}]
Output format (JSON): [{\"src_column_name\": input field name, \"src_column_value\": input field value, \"standard_column_name\": output field name, \"standard_column_value\": output field value}]
Notes: 1. The input carries several fields at once as JSON 2. Return every result at once as JSON 3. The output must load directly with a standard JSON parser
Input: {{input_question}}";

pub fn build_column_query(column: &str, value: &str) -> String {
    let input = json!({"src_column_name": column, "src_column_value": value});
    QUERY_TEMPLATE_ALL_IN_ONE.replace("{{input_question}}", &input.to_string())
}

#[derive(Clone, Debug, PartialEq)]
pub struct KbChatParams {
    pub knowledge_base_name: String,
    pub top_k: usize,
    pub score_threshold: f64,
    pub model_name: String,
    pub temperature: f64,
    pub max_tokens: Option<u32>,
    pub prompt_name: String,
}

impl KbChatParams {
    pub fn validate(&self) -> Result<(), KbError> {
        if !(0.0..=1.0).contains(&self.score_threshold) {
            return Err(KbError::InvalidParameter(
                "score_threshold must be between 0 and 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(KbError::InvalidParameter(
                "temperature must be between 0 and 1".into(),
            ));
        }
        if self.top_k == 0 {
            return Err(KbError::InvalidParameter("top_k must be at least 1".into()));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct KbChatResult {
    pub answer: String,
    pub docs: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer_json: Option<Value>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ColumnResult {
    pub src_col_name: String,
    pub src_col_value: String,
    pub result: Value,
}

/// Retrieval-augmented chat over the registered knowledge bases.
#[derive(Clone)]
pub struct KbChatEngine {
    registry: Arc<KbRegistry>,
    providers: ProviderManager,
    provider: String,
    base_url: String,
}

impl KbChatEngine {
    pub fn new(
        registry: Arc<KbRegistry>,
        providers: ProviderManager,
        provider: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Self {
            registry,
            providers,
            provider: provider.into(),
            base_url,
        }
    }

    pub fn registry(&self) -> &KbRegistry {
        &self.registry
    }

    fn source_link(&self, kb: &str, index: usize, hit: &ScoredDocument) -> String {
        let file_name = hit.document.source().unwrap_or_default();
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("knowledge_base_name", kb)
            .append_pair("file_name", file_name)
            .finish();
        format!(
            "Source [{}] [{file_name}]({}knowledge_base/download_doc?{query}) \n\n{}\n\n",
            index + 1,
            self.base_url,
            hit.document.page_content
        )
    }

    /// Search, prompt, answer. Returns the answer text and the source list.
    pub async fn knowledge_base_chat(
        &self,
        query: &str,
        params: &KbChatParams,
    ) -> Result<KbChatResult, KbError> {
        let kb = self
            .registry
            .get(&params.knowledge_base_name)
            .ok_or_else(|| KbError::NotFound(params.knowledge_base_name.clone()))?;
        let hits = kb
            .search(query, params.top_k, params.score_threshold)
            .await?;
        let context = hits
            .iter()
            .map(|h| h.document.page_content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let template = if hits.is_empty() {
            prompts::template(EMPTY_PROMPT)
        } else {
            prompts::template(&params.prompt_name)
        };
        let prompt = prompts::render(template, &context, query);

        let mut invocation = ChatInvocation::new(
            params.model_name.clone(),
            vec![PromptMessage::user(prompt)],
        )
        .with_parameter("temperature", json!(params.temperature));
        if let Some(max_tokens) = params.max_tokens {
            invocation = invocation.with_parameter("max_tokens", json!(max_tokens));
        }
        let answer = self
            .providers
            .invoke_chat(&self.provider, invocation)
            .await?
            .collect()
            .await?
            .message
            .content;

        let mut docs: Vec<String> = hits
            .iter()
            .enumerate()
            .map(|(i, hit)| self.source_link(&params.knowledge_base_name, i, hit))
            .collect();
        if docs.is_empty() {
            docs.push(NO_DOCS_NOTICE.to_string());
        }
        Ok(KbChatResult {
            answer,
            docs,
            answer_json: None,
        })
    }

    /// One query per CSV column, strictly in column order. Each column uses
    /// its first observed value (empty for header-only columns).
    pub async fn chat_with_csv<R: Read>(
        &self,
        csv: R,
        params: &KbChatParams,
        debug: bool,
    ) -> Result<Vec<ColumnResult>, KbError> {
        params.validate()?;
        if self.registry.get(&params.knowledge_base_name).is_none() {
            return Err(KbError::NotFound(params.knowledge_base_name.clone()));
        }
        let fields = read_fields(csv)?;
        let mut responses = Vec::with_capacity(fields.len());
        for (column, values) in fields.iter() {
            info!(target: "reflex::kb", column, "handling column");
            let value = values.first().cloned().unwrap_or_default();
            let query = build_column_query(column, &value);
            let mut result = self.knowledge_base_chat(&query, params).await?;
            let answer_json = extract_json_or_text(&result.answer);
            let result = if debug {
                result.answer_json = Some(answer_json);
                serde_json::to_value(&result).unwrap_or(Value::Null)
            } else {
                answer_json
            };
            responses.push(ColumnResult {
                src_col_name: column.to_string(),
                src_col_value: value,
                result,
            });
        }
        info!(target: "reflex::kb", columns = responses.len(), "csv batch complete");
        Ok(responses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{Document, MemoryKbService};
    use async_trait::async_trait;
    use reflex_providers::{
        AIModelEntity, LlmResponse, LlmResult, LlmUsage, ModelProvider, ModelType,
        ProviderEntity, ProviderError, TextEmbeddingResult,
    };
    use std::sync::Mutex;

    /// Replies with a fixed text and records every prompt it sees.
    struct CannedProvider {
        entity: ProviderEntity,
        reply: String,
        prompts: Mutex<Vec<String>>,
    }

    impl CannedProvider {
        fn new(reply: &str) -> Self {
            Self {
                entity: ProviderEntity {
                    provider: "canned".into(),
                    label: "Canned".into(),
                    supported_model_types: vec![ModelType::Llm],
                },
                reply: reply.into(),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ModelProvider for CannedProvider {
        fn entity(&self) -> &ProviderEntity {
            &self.entity
        }

        async fn list_models(
            &self,
            _model_type: ModelType,
        ) -> Result<Vec<AIModelEntity>, ProviderError> {
            Ok(Vec::new())
        }

        async fn invoke_chat(
            &self,
            invocation: ChatInvocation,
        ) -> Result<LlmResponse, ProviderError> {
            if let Ok(mut prompts) = self.prompts.lock() {
                prompts.push(invocation.messages[0].content.clone());
            }
            Ok(LlmResponse::Complete(LlmResult {
                id: "1".into(),
                model: invocation.model,
                created: 0,
                message: PromptMessage::assistant(self.reply.clone()),
                usage: LlmUsage::default(),
                finish_reason: Some("stop".into()),
            }))
        }

        async fn invoke_embedding(
            &self,
            model: &str,
            _texts: Vec<String>,
            _user: Option<String>,
        ) -> Result<TextEmbeddingResult, ProviderError> {
            Err(ProviderError::UnknownModel(model.into()))
        }
    }

    fn engine(reply: &str) -> (KbChatEngine, Arc<CannedProvider>) {
        let mut registry = KbRegistry::new();
        registry.register(Arc::new(MemoryKbService::new(
            "samples",
            vec![Document::new(
                "customer_name maps to standard field client_name",
                "fields & names.md",
            )],
        )));
        let provider = Arc::new(CannedProvider::new(reply));
        let mut providers = ProviderManager::new();
        providers.register(provider.clone()).expect("register");
        (
            KbChatEngine::new(Arc::new(registry), providers, "canned", "http://kb.local:20000"),
            provider,
        )
    }

    fn params() -> KbChatParams {
        KbChatParams {
            knowledge_base_name: "samples".into(),
            top_k: 3,
            score_threshold: 1.0,
            model_name: "m".into(),
            temperature: 0.7,
            max_tokens: None,
            prompt_name: "default".into(),
        }
    }

    #[tokio::test]
    async fn fenced_answer_is_parsed_per_column() {
        let (engine, provider) = engine(
            "Result:\n\n```json\n{\"standard_column_name\": \"x\", \"standard_column_value\": \"y\"}\n```",
        );
        let csv = "customer_name,zzz\nalice,1\nbob,2\n";
        let rows = engine
            .chat_with_csv(csv.as_bytes(), &params(), false)
            .await
            .expect("batch");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].src_col_name, "customer_name");
        assert_eq!(rows[0].src_col_value, "alice");
        assert_eq!(
            rows[0].result,
            json!({"standard_column_name": "x", "standard_column_value": "y"})
        );
        let prompts = provider.prompts.lock().expect("prompts").clone();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[0].contains(r#"{"src_column_name":"customer_name","src_column_value":"alice"}"#));
        assert!(prompts[0].contains("<known_information>customer_name maps"));
    }

    #[tokio::test]
    async fn unparseable_answer_passes_through() {
        let (engine, _) = engine("no idea");
        let rows = engine
            .chat_with_csv("a\n1\n".as_bytes(), &params(), false)
            .await
            .expect("batch");
        assert_eq!(rows[0].result, json!("no idea"));
    }

    #[tokio::test]
    async fn zero_documents_yield_single_notice() {
        let (engine, provider) = engine("{}");
        let result = engine
            .knowledge_base_chat("quantum chromodynamics", &params())
            .await
            .expect("chat");
        assert_eq!(result.docs, vec![NO_DOCS_NOTICE.to_string()]);
        let prompts = provider.prompts.lock().expect("prompts").clone();
        assert!(prompts[0].starts_with("Please answer my question:"));
    }

    #[tokio::test]
    async fn sources_link_to_download_endpoint() {
        let (engine, _) = engine("{}");
        let result = engine
            .knowledge_base_chat("customer name", &params())
            .await
            .expect("chat");
        assert_eq!(result.docs.len(), 1);
        assert!(result.docs[0].starts_with(
            "Source [1] [fields & names.md](http://kb.local:20000/knowledge_base/download_doc?knowledge_base_name=samples&file_name=fields+%26+names.md)"
        ));
    }

    #[tokio::test]
    async fn debug_returns_full_record() {
        let (engine, _) = engine("{\"a\": 1}");
        let rows = engine
            .chat_with_csv("customer\nalice\n".as_bytes(), &params(), true)
            .await
            .expect("batch");
        let result = &rows[0].result;
        assert_eq!(result["answer"], json!("{\"a\": 1}"));
        assert_eq!(result["answer_json"], json!({"a": 1}));
        assert!(result["docs"].is_array());
    }

    #[tokio::test]
    async fn missing_knowledge_base_is_reported() {
        let (engine, _) = engine("{}");
        let mut params = params();
        params.knowledge_base_name = "ghost".into();
        let err = engine
            .chat_with_csv("a\n1\n".as_bytes(), &params, false)
            .await
            .expect_err("missing kb");
        assert!(matches!(err, KbError::NotFound(name) if name == "ghost"));
    }

    #[test]
    fn out_of_range_parameters_are_rejected() {
        let mut p = params();
        p.score_threshold = 1.5;
        assert!(matches!(p.validate(), Err(KbError::InvalidParameter(_))));
        let mut p = params();
        p.temperature = -0.1;
        assert!(p.validate().is_err());
        assert!(params().validate().is_ok());
    }
}
