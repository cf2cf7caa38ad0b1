use reflex_providers::PromptMessage;
use serde::Serialize;

use crate::state::{AnswerQuestion, ConversationState, ReviseAnswer};
use crate::step::Step;

/// Per-node projection of a graph run.
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(tag = "node", content = "data", rename_all = "snake_case")]
pub enum GraphEvent {
    /// The assistant tool invocation followed by its tool results.
    ToolCalls {
        step: Step,
        messages: Vec<PromptMessage>,
    },
    Draft(AnswerQuestion),
    Revise(ReviseAnswer),
}

#[derive(Clone, Debug, Serialize)]
pub struct ReflexionRun {
    pub thread_id: String,
    pub steps: Vec<Step>,
    pub events: Vec<GraphEvent>,
    pub state: ConversationState,
}

impl ReflexionRun {
    pub fn tool_call_visits(&self) -> usize {
        self.steps.iter().filter(|s| s.is_tool_call()).count()
    }
}

/// The last assistant message and the tool results that follow it. Other
/// roles in between are skipped.
pub fn last_tool_exchange(messages: &[PromptMessage]) -> Vec<PromptMessage> {
    let mut out = Vec::new();
    for message in messages.iter().rev() {
        match message.role {
            reflex_providers::PromptMessageRole::Tool => out.push(message.clone()),
            reflex_providers::PromptMessageRole::Assistant => {
                out.push(message.clone());
                break;
            }
            _ => {}
        }
    }
    out.reverse();
    out
}
