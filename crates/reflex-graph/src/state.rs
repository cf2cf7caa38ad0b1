use reflex_providers::PromptMessage;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct Reflection {
    /// Critique of what is missing.
    #[serde(default)]
    pub missing: String,
    /// Critique of what is superfluous.
    #[serde(default)]
    pub superfluous: String,
}

/// Answer the question. Provide an answer, reflection, and then follow up with
/// search queries to improve the answer.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct AnswerQuestion {
    /// ~250 word detailed answer to the question.
    #[serde(default)]
    pub answer: String,
    /// Your reflection on the initial answer.
    #[serde(default)]
    pub reflection: Option<Reflection>,
    /// 1-3 search queries for researching improvements to address the critique
    /// of your current answer.
    #[serde(default)]
    pub search_queries: Vec<String>,
}

/// Revise your original answer to your question. Provide an answer,
/// reflection, cite your reflection with references, and finally add search
/// queries to improve the answer.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct ReviseAnswer {
    /// ~250 word detailed answer to the question.
    #[serde(default)]
    pub answer: String,
    /// Your reflection on the initial answer.
    #[serde(default)]
    pub reflection: Option<Reflection>,
    /// 1-3 search queries for researching improvements to address the critique
    /// of your current answer.
    #[serde(default)]
    pub search_queries: Vec<String>,
    /// Citations motivating your updated answer.
    #[serde(default)]
    pub references: Vec<String>,
}

/// Everything the graph knows about one conversation. Every field is always
/// present so a checkpoint round-trips without gaps.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationState {
    /// Working buffer of the current step.
    #[serde(default)]
    pub messages: Vec<PromptMessage>,
    /// Transcript kept across turns, bounded by the graph's history length.
    #[serde(default)]
    pub history: Vec<PromptMessage>,
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub answer: String,
    #[serde(default)]
    pub reflection: Reflection,
    #[serde(default)]
    pub search_queries: Vec<String>,
    #[serde(default)]
    pub references: Vec<String>,
    /// Revisions performed in the current turn.
    #[serde(default)]
    pub iterations: u32,
}

impl ConversationState {
    pub(crate) fn apply_draft(&mut self, draft: &AnswerQuestion) {
        self.answer = draft.answer.clone();
        self.reflection = draft.reflection.clone().unwrap_or_default();
        self.search_queries = draft.search_queries.clone();
    }

    pub(crate) fn apply_revision(&mut self, revision: &ReviseAnswer) {
        self.answer = revision.answer.clone();
        self.reflection = revision.reflection.clone().unwrap_or_default();
        self.search_queries = revision.search_queries.clone();
        self.references = revision.references.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_state_serializes_every_field() {
        let value = serde_json::to_value(ConversationState::default()).expect("serialize");
        for key in [
            "messages",
            "history",
            "question",
            "answer",
            "reflection",
            "search_queries",
            "references",
            "iterations",
        ] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
    }

    #[test]
    fn partial_checkpoint_fills_defaults() {
        let state: ConversationState =
            serde_json::from_value(json!({"answer": "42"})).expect("deserialize");
        assert_eq!(state.answer, "42");
        assert!(state.history.is_empty());
        assert_eq!(state.iterations, 0);
    }

    #[test]
    fn revision_copies_references() {
        let mut state = ConversationState::default();
        state.apply_revision(&ReviseAnswer {
            answer: "a".into(),
            reflection: None,
            search_queries: vec!["q".into()],
            references: vec!["https://example.com".into()],
        });
        assert_eq!(state.references, vec!["https://example.com"]);
        assert_eq!(state.reflection, Reflection::default());
        assert_eq!(state.search_queries, vec!["q"]);
    }
}
