use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::KbError;

#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct Document {
    pub page_content: String,
    pub metadata: BTreeMap<String, String>,
}

impl Document {
    pub fn new(page_content: impl Into<String>, source: impl Into<String>) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert("source".to_string(), source.into());
        Self {
            page_content: page_content.into(),
            metadata,
        }
    }

    pub fn source(&self) -> Option<&str> {
        self.metadata.get("source").map(String::as_str)
    }
}

/// A search hit. `score` is a distance: smaller means more relevant.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ScoredDocument {
    pub document: Document,
    pub score: f64,
}

/// A searchable knowledge base.
#[async_trait]
pub trait KbService: Send + Sync {
    fn name(&self) -> &str;

    /// At most `top_k` documents with `score <= score_threshold`, best first.
    async fn search(
        &self,
        query: &str,
        top_k: usize,
        score_threshold: f64,
    ) -> Result<Vec<ScoredDocument>, KbError>;
}

#[derive(Clone, Default)]
pub struct KbRegistry {
    services: HashMap<String, Arc<dyn KbService>>,
}

impl KbRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, service: Arc<dyn KbService>) {
        self.services.insert(service.name().to_string(), service);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn KbService>> {
        self.services.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.keys().cloned().collect();
        names.sort();
        names
    }

    /// One in-memory knowledge base per sub-directory of `root`. Text and
    /// markdown files are split into paragraph documents; a `content/`
    /// sub-directory is preferred when present.
    pub fn load_dir(root: &Path) -> Result<Self, KbError> {
        let mut registry = Self::new();
        if !root.is_dir() {
            warn!(target: "reflex::kb", root = %root.display(), "knowledge base root missing");
            return Ok(registry);
        }
        for entry in std::fs::read_dir(root)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            let content = path.join("content");
            let dir = if content.is_dir() { content } else { path };
            let service = MemoryKbService::from_dir(&name, &dir)?;
            info!(
                target: "reflex::kb",
                knowledge_base = %name,
                documents = service.len(),
                "loaded knowledge base"
            );
            registry.register(Arc::new(service));
        }
        Ok(registry)
    }
}

/// Lexical search over documents held in memory.
pub struct MemoryKbService {
    name: String,
    documents: Vec<(Document, BTreeSet<String>)>,
}

impl MemoryKbService {
    pub fn new(name: impl Into<String>, documents: Vec<Document>) -> Self {
        Self {
            name: name.into(),
            documents: documents
                .into_iter()
                .map(|doc| {
                    let terms = terms(&doc.page_content);
                    (doc, terms)
                })
                .collect(),
        }
    }

    pub fn from_dir(name: &str, dir: &Path) -> Result<Self, KbError> {
        let mut files: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| {
                p.is_file()
                    && matches!(
                        p.extension().and_then(|e| e.to_str()),
                        Some("txt" | "md" | "markdown")
                    )
            })
            .collect();
        files.sort();
        let mut documents = Vec::new();
        for file in files {
            let source = file
                .file_name()
                .map(|f| f.to_string_lossy().to_string())
                .unwrap_or_default();
            let text = std::fs::read_to_string(&file)?;
            documents.extend(
                split_paragraphs(&text)
                    .into_iter()
                    .map(|chunk| Document::new(chunk, source.clone())),
            );
        }
        Ok(Self::new(name, documents))
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

fn split_paragraphs(text: &str) -> Vec<String> {
    text.split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// Lowercased ASCII words; other alphanumeric characters (CJK and friends)
/// count one term each.
fn terms(text: &str) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    let mut word = String::new();
    for ch in text.chars() {
        if ch.is_ascii_alphanumeric() {
            word.push(ch.to_ascii_lowercase());
            continue;
        }
        if !word.is_empty() {
            out.insert(std::mem::take(&mut word));
        }
        if ch.is_alphanumeric() {
            out.insert(ch.to_string());
        }
    }
    if !word.is_empty() {
        out.insert(word);
    }
    out
}

#[async_trait]
impl KbService for MemoryKbService {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(
        &self,
        query: &str,
        top_k: usize,
        score_threshold: f64,
    ) -> Result<Vec<ScoredDocument>, KbError> {
        let query_terms = terms(query);
        if query_terms.is_empty() {
            return Ok(Vec::new());
        }
        let mut hits: Vec<ScoredDocument> = self
            .documents
            .iter()
            .filter_map(|(doc, doc_terms)| {
                let shared = query_terms.intersection(doc_terms).count();
                if shared == 0 {
                    return None;
                }
                let score = 1.0 - shared as f64 / query_terms.len() as f64;
                (score <= score_threshold).then(|| ScoredDocument {
                    document: doc.clone(),
                    score,
                })
            })
            .collect();
        hits.sort_by(|a, b| a.score.total_cmp(&b.score));
        hits.truncate(top_k);
        Ok(hits)
    }
}
