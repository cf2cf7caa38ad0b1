use serde::{Deserialize, Serialize};

/// Nodes of the reflexion graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    HistoryManager,
    ToolCall,
    Draft,
    ToolCallLoop,
    Revise,
    End,
}

impl Step {
    pub const START: Step = Step::HistoryManager;

    pub fn as_str(&self) -> &'static str {
        match self {
            Step::HistoryManager => "history_manager",
            Step::ToolCall => "tool_call",
            Step::Draft => "draft",
            Step::ToolCallLoop => "tool_call_loop",
            Step::Revise => "revise",
            Step::End => "end",
        }
    }

    /// Both tool-call nodes run the same sub-graph.
    pub fn is_tool_call(&self) -> bool {
        matches!(self, Step::ToolCall | Step::ToolCallLoop)
    }

    /// Transition table. `exhausted` is only consulted after `Revise`.
    pub fn next(self, exhausted: bool) -> Step {
        match self {
            Step::HistoryManager => Step::ToolCall,
            Step::ToolCall => Step::Draft,
            Step::Draft => Step::ToolCallLoop,
            Step::ToolCallLoop => Step::Revise,
            Step::Revise if exhausted => Step::End,
            Step::Revise => Step::ToolCallLoop,
            Step::End => Step::End,
        }
    }
}

/// Loop predicate evaluated after each revision.
pub fn iterations_exhausted(iterations: u32, max_iterations: u32) -> bool {
    iterations >= max_iterations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_table() {
        let cases = [
            (Step::HistoryManager, false, Step::ToolCall),
            (Step::HistoryManager, true, Step::ToolCall),
            (Step::ToolCall, false, Step::Draft),
            (Step::Draft, true, Step::ToolCallLoop),
            (Step::ToolCallLoop, true, Step::Revise),
            (Step::Revise, false, Step::ToolCallLoop),
            (Step::Revise, true, Step::End),
            (Step::End, false, Step::End),
        ];
        for (from, exhausted, to) in cases {
            assert_eq!(from.next(exhausted), to, "{} -> ?", from.as_str());
        }
    }

    #[test]
    fn walk_visits_tool_calls_max_plus_one_times() {
        for max in 1..=4u32 {
            let mut step = Step::START;
            let mut iterations = 0;
            let mut tool_calls = 0;
            while step != Step::End {
                if step.is_tool_call() {
                    tool_calls += 1;
                }
                if step == Step::Revise {
                    iterations += 1;
                }
                step = step.next(iterations_exhausted(iterations, max));
            }
            assert_eq!(tool_calls, max + 1);
        }
    }

    #[test]
    fn step_names_match_serde() {
        let value = serde_json::to_value(Step::ToolCallLoop).expect("serialize");
        assert_eq!(value, serde_json::json!(Step::ToolCallLoop.as_str()));
    }
}
