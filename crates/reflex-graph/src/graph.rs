use std::collections::HashSet;
use std::sync::Arc;

use reflex_providers::PromptMessage;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::checkpoint::{Checkpointer, MemoryCheckpointer};
use crate::error::GraphError;
use crate::events::{last_tool_exchange, GraphEvent, ReflexionRun};
use crate::model::{invoke_structured, ChatModel, ToolChoice};
use crate::prompts;
use crate::state::{AnswerQuestion, ConversationState, ReviseAnswer};
use crate::step::{iterations_exhausted, Step};
use crate::tools::{SharedTool, ToolExecutor};

pub const DEFAULT_MAX_ITERATIONS: u32 = 2;

/// Copy the tool results trailing `messages` (everything after the last
/// non-tool message) in order.
pub fn trailing_tool_results(messages: &[PromptMessage]) -> &[PromptMessage] {
    let start = messages
        .iter()
        .rposition(|m| !m.is_tool_result())
        .map_or(0, |idx| idx + 1);
    &messages[start..]
}

pub struct ReflexionGraphBuilder {
    model: Arc<dyn ChatModel>,
    tools: Vec<SharedTool>,
    history_len: usize,
    max_iterations: u32,
    checkpointer: Option<Arc<dyn Checkpointer>>,
    fallback_tool: Option<SharedTool>,
}

impl ReflexionGraphBuilder {
    pub fn max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn checkpointer(mut self, checkpointer: Arc<dyn Checkpointer>) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    /// Tool added to the set unless one with the same name is already there.
    pub fn fallback_tool(mut self, tool: SharedTool) -> Self {
        self.fallback_tool = Some(tool);
        self
    }

    pub fn build(self) -> Result<ReflexionGraph, GraphError> {
        if self.max_iterations == 0 {
            return Err(GraphError::InvalidConfig(
                "max_iterations must be at least 1".into(),
            ));
        }
        let mut tools = self.tools;
        let mut seen = HashSet::new();
        for tool in &tools {
            let name = tool.name().trim();
            if name.is_empty() {
                return Err(GraphError::InvalidConfig("tool names must not be empty".into()));
            }
            if !seen.insert(name.to_string()) {
                return Err(GraphError::InvalidConfig(format!("duplicate tool `{name}`")));
            }
        }
        if let Some(fallback) = self.fallback_tool {
            if !seen.contains(fallback.name()) {
                tools.push(fallback);
            }
        }
        Ok(ReflexionGraph {
            model: self.model,
            tools: ToolExecutor::new(tools),
            history_len: self.history_len,
            max_iterations: self.max_iterations,
            checkpointer: self
                .checkpointer
                .unwrap_or_else(|| Arc::new(MemoryCheckpointer::new())),
        })
    }
}

/// Draft, critique and revise with tool calls in between, resumable per
/// thread through a [`Checkpointer`].
pub struct ReflexionGraph {
    model: Arc<dyn ChatModel>,
    tools: ToolExecutor,
    history_len: usize,
    max_iterations: u32,
    checkpointer: Arc<dyn Checkpointer>,
}

impl ReflexionGraph {
    pub fn builder(
        model: Arc<dyn ChatModel>,
        tools: Vec<SharedTool>,
        history_len: usize,
    ) -> ReflexionGraphBuilder {
        ReflexionGraphBuilder {
            model,
            tools,
            history_len,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            checkpointer: None,
            fallback_tool: None,
        }
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.names()
    }

    pub async fn invoke(
        &self,
        thread_id: &str,
        input: Vec<PromptMessage>,
    ) -> Result<ReflexionRun, GraphError> {
        self.run(thread_id, input, None).await
    }

    /// Run on a background task, sending each node's event as it completes.
    pub fn spawn_stream(
        self: &Arc<Self>,
        thread_id: String,
        input: Vec<PromptMessage>,
    ) -> (
        mpsc::Receiver<GraphEvent>,
        JoinHandle<Result<ReflexionRun, GraphError>>,
    ) {
        let (tx, rx) = mpsc::channel(16);
        let graph = Arc::clone(self);
        let handle = tokio::spawn(async move { graph.run(&thread_id, input, Some(tx)).await });
        (rx, handle)
    }

    async fn run(
        &self,
        thread_id: &str,
        input: Vec<PromptMessage>,
        sink: Option<mpsc::Sender<GraphEvent>>,
    ) -> Result<ReflexionRun, GraphError> {
        let mut state = self.checkpointer.load(thread_id).await?.unwrap_or_default();
        let mut input = Some(input);
        let mut steps = Vec::new();
        let mut events = Vec::new();
        let mut step = Step::START;

        while step != Step::End {
            debug!(target: "reflex::graph", thread_id, step = step.as_str(), "entering step");
            steps.push(step);
            let event = match step {
                Step::HistoryManager => {
                    self.history_manager(&mut state, input.take().unwrap_or_default());
                    None
                }
                Step::ToolCall | Step::ToolCallLoop => Some(self.tool_call(&mut state, step).await?),
                Step::Draft => Some(GraphEvent::Draft(self.draft(&mut state).await?)),
                Step::Revise => Some(GraphEvent::Revise(self.revise(&mut state).await?)),
                Step::End => None,
            };
            if let Some(event) = event {
                if let Some(tx) = &sink {
                    // A dropped receiver only stops the projection, not the run.
                    let _ = tx.send(event.clone()).await;
                }
                events.push(event);
            }
            step = step.next(iterations_exhausted(state.iterations, self.max_iterations));
        }

        self.checkpointer.save(thread_id, &state).await?;
        info!(
            target: "reflex::graph",
            thread_id,
            steps = steps.len(),
            iterations = state.iterations,
            "reflexion run complete"
        );
        Ok(ReflexionRun {
            thread_id: thread_id.to_string(),
            steps,
            events,
            state,
        })
    }

    fn history_manager(&self, state: &mut ConversationState, input: Vec<PromptMessage>) {
        state.history.extend(input.iter().cloned());
        if self.history_len > 0 && state.history.len() > self.history_len {
            let excess = state.history.len() - self.history_len;
            state.history.drain(..excess);
        }
        state.question = input.last().map(|m| m.content.clone()).unwrap_or_default();
        state.messages = input;
        state.answer.clear();
        state.reflection = Default::default();
        state.search_queries.clear();
        state.references.clear();
        state.iterations = 0;
    }

    async fn tool_call(
        &self,
        state: &mut ConversationState,
        step: Step,
    ) -> Result<GraphEvent, GraphError> {
        let queries = prompts::tool_queries(state);
        let prompt = PromptMessage::system(prompts::tool_call_prompt(&queries));
        let invocation = self
            .model
            .invoke(vec![prompt], &self.tools.declarations(), ToolChoice::Auto)
            .await?;
        state.messages = vec![invocation.clone()];
        state.history.push(invocation.clone());

        let results = self.tools.execute(&invocation).await;
        state.messages.extend(results);

        let trailing = trailing_tool_results(&state.messages).to_vec();
        state.history.extend(trailing);

        Ok(GraphEvent::ToolCalls {
            step,
            messages: last_tool_exchange(&state.messages),
        })
    }

    async fn draft(&self, state: &mut ConversationState) -> Result<AnswerQuestion, GraphError> {
        let prompt = prompts::actor_prompt(state, prompts::FIRST_INSTRUCTION, "AnswerQuestion");
        let draft: AnswerQuestion =
            invoke_structured(self.model.as_ref(), vec![PromptMessage::system(prompt)]).await?;
        record_answer(state, &draft)?;
        state.apply_draft(&draft);
        Ok(draft)
    }

    async fn revise(&self, state: &mut ConversationState) -> Result<ReviseAnswer, GraphError> {
        state.iterations += 1;
        let prompt = prompts::actor_prompt(state, prompts::REVISE_INSTRUCTIONS, "ReviseAnswer");
        let revision: ReviseAnswer =
            invoke_structured(self.model.as_ref(), vec![PromptMessage::system(prompt)]).await?;
        record_answer(state, &revision)?;
        state.apply_revision(&revision);
        Ok(revision)
    }
}

fn record_answer<T: serde::Serialize>(
    state: &mut ConversationState,
    answer: &T,
) -> Result<(), GraphError> {
    let text = serde_json::to_string(answer).map_err(|e| GraphError::StructuredOutput {
        function: std::any::type_name::<T>().to_string(),
        reason: e.to_string(),
    })?;
    let message = PromptMessage::assistant(text);
    state.messages.push(message.clone());
    state.history.push(message);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ToolChoice;
    use crate::tools::{Tool, ToolError};
    use async_trait::async_trait;
    use reflex_providers::{
        AssistantToolCall, InvokeError, PromptMessageTool, ProviderError,
    };
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Calls `lookup` when tools are offered freely, otherwise answers through
    /// the forced function.
    #[derive(Default)]
    struct ScriptedModel {
        calls: AtomicUsize,
        fail_on_call: Option<usize>,
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        async fn invoke(
            &self,
            messages: Vec<PromptMessage>,
            _tools: &[PromptMessageTool],
            tool_choice: ToolChoice,
        ) -> Result<PromptMessage, ProviderError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_on_call == Some(n) {
                return Err(InvokeError::ServerUnavailable("boom".into()).into());
            }
            assert_eq!(messages.len(), 1);
            match tool_choice {
                ToolChoice::Auto => Ok(PromptMessage::assistant_tool_calls(vec![
                    AssistantToolCall::new(format!("call_{n}"), "lookup", r#"{"q":"x"}"#),
                ])),
                ToolChoice::Function(name) => {
                    let args = json!({
                        "answer": format!("answer {n}"),
                        "reflection": {"missing": "m", "superfluous": "s"},
                        "search_queries": [format!("query {n}")],
                        "references": ["https://example.com"],
                    });
                    Ok(PromptMessage::assistant_tool_calls(vec![AssistantToolCall::new(
                        "fn",
                        name,
                        args.to_string(),
                    )]))
                }
            }
        }
    }

    struct Lookup;

    #[async_trait]
    impl Tool for Lookup {
        fn name(&self) -> &str {
            "lookup"
        }

        fn description(&self) -> &str {
            "look things up"
        }

        fn parameters(&self) -> Value {
            json!({"type": "object"})
        }

        async fn call(&self, _arguments: Value) -> Result<Value, ToolError> {
            Ok(json!("found"))
        }
    }

    fn graph(model: Arc<dyn ChatModel>, max: u32) -> ReflexionGraph {
        ReflexionGraph::builder(model, vec![Arc::new(Lookup)], 50)
            .max_iterations(max)
            .build()
            .expect("graph builds")
    }

    #[tokio::test]
    async fn tool_call_subgraph_runs_max_plus_one_times() {
        for max in 1..=3 {
            let graph = graph(Arc::new(ScriptedModel::default()), max);
            let run = graph
                .invoke("t", vec![PromptMessage::user("what is rust?")])
                .await
                .expect("run");
            assert_eq!(run.tool_call_visits(), (max + 1) as usize);
            assert_eq!(run.state.iterations, max);
            assert_eq!(run.steps.first(), Some(&Step::HistoryManager));
            assert_eq!(run.steps.last(), Some(&Step::Revise));
        }
    }

    #[tokio::test]
    async fn default_budget_walks_the_full_sequence() {
        let graph = graph(Arc::new(ScriptedModel::default()), DEFAULT_MAX_ITERATIONS);
        let run = graph
            .invoke("t", vec![PromptMessage::user("q")])
            .await
            .expect("run");
        assert_eq!(
            run.steps,
            vec![
                Step::HistoryManager,
                Step::ToolCall,
                Step::Draft,
                Step::ToolCallLoop,
                Step::Revise,
                Step::ToolCallLoop,
                Step::Revise,
            ]
        );
        assert_eq!(run.events.len(), 6);
        assert!(matches!(run.events[1], GraphEvent::Draft(_)));
        match &run.events[0] {
            GraphEvent::ToolCalls { step, messages } => {
                assert_eq!(*step, Step::ToolCall);
                assert_eq!(messages.len(), 2);
                assert_eq!(messages[1].content, "found");
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(run.state.references, vec!["https://example.com"]);
        assert_eq!(run.state.question, "q");
    }

    #[tokio::test]
    async fn conversations_do_not_share_the_counter() {
        let graph = Arc::new(graph(Arc::new(ScriptedModel::default()), 2));
        let (a, b) = tokio::join!(
            graph.invoke("a", vec![PromptMessage::user("first")]),
            graph.invoke("b", vec![PromptMessage::user("second")]),
        );
        let (a, b) = (a.expect("run a"), b.expect("run b"));
        assert_eq!(a.tool_call_visits(), 3);
        assert_eq!(b.tool_call_visits(), 3);

        let again = graph
            .invoke("a", vec![PromptMessage::user("follow up")])
            .await
            .expect("second turn");
        assert_eq!(again.tool_call_visits(), 3);
    }

    #[tokio::test]
    async fn checkpoint_carries_history_between_turns() {
        let store = Arc::new(MemoryCheckpointer::new());
        let graph = ReflexionGraph::builder(
            Arc::new(ScriptedModel::default()),
            vec![Arc::new(Lookup)],
            0,
        )
        .checkpointer(store.clone())
        .build()
        .expect("graph");
        let first = graph
            .invoke("t", vec![PromptMessage::user("one")])
            .await
            .expect("first");
        let second = graph
            .invoke("t", vec![PromptMessage::user("two")])
            .await
            .expect("second");
        assert!(second.state.history.len() > first.state.history.len());
        assert_eq!(second.state.history[0].content, "one");
        let saved = store.load("t").await.expect("load").expect("saved");
        assert_eq!(saved, second.state);
    }

    #[tokio::test]
    async fn history_is_truncated() {
        let graph = ReflexionGraph::builder(
            Arc::new(ScriptedModel::default()),
            vec![Arc::new(Lookup)],
            3,
        )
        .build()
        .expect("graph");
        let mut state = ConversationState {
            history: (0..5).map(|i| PromptMessage::user(i.to_string())).collect(),
            iterations: 7,
            ..Default::default()
        };
        graph.history_manager(&mut state, vec![PromptMessage::user("new")]);
        let contents: Vec<_> = state.history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["3", "4", "new"]);
        assert_eq!(state.question, "new");
        assert_eq!(state.iterations, 0);
    }

    #[tokio::test]
    async fn failed_model_call_leaves_checkpoint_untouched() {
        let store = Arc::new(MemoryCheckpointer::new());
        let model = ScriptedModel {
            fail_on_call: Some(2),
            ..Default::default()
        };
        let graph = ReflexionGraph::builder(Arc::new(model), vec![Arc::new(Lookup)], 10)
            .checkpointer(store.clone())
            .build()
            .expect("graph");
        let err = graph
            .invoke("t", vec![PromptMessage::user("q")])
            .await
            .expect_err("draft fails");
        assert!(matches!(err, GraphError::Model(ProviderError::Invoke(_))));
        assert!(store.load("t").await.expect("load").is_none());
    }

    #[tokio::test]
    async fn stream_delivers_events_in_order() {
        let graph = Arc::new(graph(Arc::new(ScriptedModel::default()), 1));
        let (mut rx, handle) = graph.spawn_stream("s".into(), vec![PromptMessage::user("q")]);
        let mut nodes = Vec::new();
        while let Some(event) = rx.recv().await {
            nodes.push(match event {
                GraphEvent::ToolCalls { step, .. } => step.as_str(),
                GraphEvent::Draft(_) => "draft",
                GraphEvent::Revise(_) => "revise",
            });
        }
        let run = handle.await.expect("join").expect("run");
        assert_eq!(nodes, vec!["tool_call", "draft", "tool_call_loop", "revise"]);
        assert_eq!(run.events.len(), 4);
    }

    #[test]
    fn reconcile_copies_only_trailing_tool_results() {
        let ai = PromptMessage::assistant_tool_calls(vec![AssistantToolCall::new("c", "t", "{}")]);
        let t1 = PromptMessage::tool("c1", "t", "1");
        let t2 = PromptMessage::tool("c2", "t", "2");

        let buffer = vec![t1.clone(), ai.clone(), t1.clone(), t2.clone()];
        assert_eq!(trailing_tool_results(&buffer), &[t1.clone(), t2.clone()]);

        let buffer = vec![ai.clone(), t1.clone(), PromptMessage::assistant("done")];
        assert!(trailing_tool_results(&buffer).is_empty());

        let buffer = vec![t1.clone(), t2.clone()];
        assert_eq!(trailing_tool_results(&buffer).len(), 2);

        assert!(trailing_tool_results(&[]).is_empty());
    }

    #[test]
    fn builder_rejects_bad_configuration() {
        let model: Arc<dyn ChatModel> = Arc::new(ScriptedModel::default());
        let zero = ReflexionGraph::builder(model.clone(), vec![], 10)
            .max_iterations(0)
            .build();
        assert!(matches!(zero, Err(GraphError::InvalidConfig(_))));

        let duplicate = ReflexionGraph::builder(
            model.clone(),
            vec![Arc::new(Lookup), Arc::new(Lookup)],
            10,
        )
        .build();
        assert!(matches!(duplicate, Err(GraphError::InvalidConfig(_))));
    }

    #[test]
    fn fallback_tool_is_added_once() {
        let model: Arc<dyn ChatModel> = Arc::new(ScriptedModel::default());
        let graph = ReflexionGraph::builder(model.clone(), vec![Arc::new(Lookup)], 10)
            .fallback_tool(Arc::new(Lookup))
            .build()
            .expect("graph");
        assert_eq!(graph.tool_names(), vec!["lookup"]);

        let graph = ReflexionGraph::builder(model, vec![], 10)
            .fallback_tool(Arc::new(Lookup))
            .build()
            .expect("graph");
        assert_eq!(graph.tool_names(), vec!["lookup"]);
    }
}
