use reflex_providers::{PromptMessage, PromptMessageRole};

use crate::state::ConversationState;

pub const FIRST_INSTRUCTION: &str = "Provide correct and concise answers.";

pub const REVISE_INSTRUCTIONS: &str = "Revise your previous answer using the new information.
    - You should use the previous critique to add important information to your answer.
        - You MUST include numerical citations in your revised answer to ensure it can be verified.
        - Add a \"References\" section to the bottom of your answer (which does not count towards the word limit). In form of:
            - https://example.com
            - https://example.com
    - You should use the previous critique to remove superfluous information from your answer.";

fn now() -> String {
    chrono::Local::now().to_rfc3339()
}

/// One line per message, tool invocations rendered as calls.
pub fn render_messages(messages: &[PromptMessage]) -> String {
    messages
        .iter()
        .flat_map(render_message)
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_message(message: &PromptMessage) -> Vec<String> {
    let role = message.role.as_str();
    let mut lines = Vec::new();
    if !message.content.trim().is_empty() {
        match (message.role, message.name.as_deref()) {
            (PromptMessageRole::Tool, Some(name)) => {
                lines.push(format!("{role}[{name}]: {}", message.content.trim()))
            }
            _ => lines.push(format!("{role}: {}", message.content.trim())),
        }
    }
    for call in &message.tool_calls {
        lines.push(format!("{role}: call {}({})", call.name, call.arguments));
    }
    lines
}

/// Queries for the tool-call step. Without explicit search queries every
/// history entry becomes one.
pub fn tool_queries(state: &ConversationState) -> Vec<String> {
    if !state.search_queries.is_empty() {
        return state.search_queries.clone();
    }
    state.history.iter().flat_map(render_message).collect()
}

pub fn tool_call_prompt(queries: &[String]) -> String {
    let listed = queries
        .iter()
        .map(|q| format!("- {q}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "You are an excellent robot, good at invoking multiple functions (or the same function multiple times) to help users solve problems.
Current time: {time}

The following is a list of problems. Please call the appropriate tools in order and return the results:
{listed}
",
        time = now(),
    )
}

pub fn actor_prompt(state: &ConversationState, first_instruction: &str, function_name: &str) -> String {
    let reflection = if state.reflection.missing.is_empty() && state.reflection.superfluous.is_empty() {
        String::new()
    } else {
        format!(
            "Missing: {}\nSuperfluous: {}",
            state.reflection.missing, state.reflection.superfluous
        )
    };
    let references = state
        .references
        .iter()
        .map(|r| format!("- {r}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "You are an expert researcher.
Current time: {time}
User's question: {question}

Actions taken so far:
{history}

Initial Answer:
{answer}

Reflection on the initial answer:
{reflection}

Steps:
1. {first_instruction}
2. Reflect and critique your answer based on the user's question and the actions taken so far. Be severe to maximize improvement.
3. List information that needs further collection. Provide solutions only, no execution needed.
4. Respond using the {function_name} struct to provide an updated response.

Supporting References:
{references}
",
        time = now(),
        question = state.question,
        history = render_messages(&state.history),
        answer = state.answer,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use reflex_providers::AssistantToolCall;

    #[test]
    fn queries_fall_back_to_history() {
        let mut state = ConversationState {
            history: vec![
                PromptMessage::user("what is rust?"),
                PromptMessage::assistant_tool_calls(vec![AssistantToolCall::new(
                    "c1",
                    "search_internet",
                    r#"{"query":"rust"}"#,
                )]),
            ],
            ..Default::default()
        };
        assert_eq!(
            tool_queries(&state),
            vec![
                "user: what is rust?".to_string(),
                r#"assistant: call search_internet({"query":"rust"})"#.to_string(),
            ]
        );
        state.search_queries = vec!["rust 2024 edition".into()];
        assert_eq!(tool_queries(&state), vec!["rust 2024 edition"]);
    }

    #[test]
    fn actor_prompt_embeds_state() {
        let state = ConversationState {
            question: "why?".into(),
            answer: "because".into(),
            references: vec!["https://example.com/a".into()],
            ..Default::default()
        };
        let prompt = actor_prompt(&state, FIRST_INSTRUCTION, "AnswerQuestion");
        assert!(prompt.contains("User's question: why?"));
        assert!(prompt.contains("1. Provide correct and concise answers."));
        assert!(prompt.contains("using the AnswerQuestion struct"));
        assert!(prompt.contains("- https://example.com/a"));
    }

    #[test]
    fn tool_prompt_lists_queries() {
        let prompt = tool_call_prompt(&["a".into(), "b".into()]);
        assert!(prompt.contains("- a\n- b"));
        assert!(prompt.contains("Current time: "));
    }
}
