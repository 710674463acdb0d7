//! Turn states and graph shapes

use std::fmt;

/// Position of a turn in the model/tool loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TurnState {
    /// Invoke the model over the full history (initial)
    Model,
    /// Resolve every pending tool call of the latest assistant message
    Tools,
    /// Terminal
    Done,
}

impl TurnState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TurnState::Done)
    }
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TurnState::Model => "MODEL",
            TurnState::Tools => "TOOLS",
            TurnState::Done => "DONE",
        })
    }
}

/// Which states a compiled workflow can reach
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphShape {
    /// No bound tools: `MODEL -> DONE`
    ModelOnly,
    /// `MODEL -> TOOLS | DONE`, `TOOLS -> MODEL`
    ModelWithTools,
}

impl GraphShape {
    #[cfg(test)]
    pub fn reachable(self) -> &'static [TurnState] {
        match self {
            GraphShape::ModelOnly => &[TurnState::Model, TurnState::Done],
            GraphShape::ModelWithTools => &[TurnState::Model, TurnState::Tools, TurnState::Done],
        }
    }
}
