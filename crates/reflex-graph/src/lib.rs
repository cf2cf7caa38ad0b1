//! Reflexion conversational graph: draft an answer, gather evidence through
//! tool calls, then critique and revise for a bounded number of iterations.

pub mod checkpoint;
pub mod error;
pub mod events;
pub mod graph;
pub mod model;
pub mod prompts;
pub mod state;
pub mod step;
pub mod tools;

pub use checkpoint::{Checkpointer, MemoryCheckpointer};
pub use error::GraphError;
pub use events::{GraphEvent, ReflexionRun};
pub use graph::{trailing_tool_results, ReflexionGraph, ReflexionGraphBuilder, DEFAULT_MAX_ITERATIONS};
pub use model::{ChatModel, ProviderChatModel, StructuredOutput, ToolChoice};
pub use state::{AnswerQuestion, ConversationState, Reflection, ReviseAnswer};
pub use step::Step;
pub use tools::{SearchInternetTool, SharedTool, Tool, ToolError, ToolExecutor, SEARCH_INTERNET};
