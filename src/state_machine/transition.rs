//! Pure state transition function

use super::{GraphShape, TurnState};
use crate::db::{Message, Role};
use thiserror::Error;

/// Errors that can occur during transition
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Turn already finished")]
    AlreadyDone,
    #[error("Tools state is not reachable in a workflow without tools")]
    ToolsUnreachable,
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

/// Pure transition function
///
/// Given the graph shape, the state just executed, and the latest message in
/// the thread, decide the next state. No I/O.
pub fn transition(
    shape: GraphShape,
    state: TurnState,
    last: Option<&Message>,
) -> Result<TurnState, TransitionError> {
    match (shape, state) {
        (_, TurnState::Done) => Err(TransitionError::AlreadyDone),

        (GraphShape::ModelOnly, TurnState::Model) => {
            expect_assistant(last)?;
            Ok(TurnState::Done)
        }
        (GraphShape::ModelOnly, TurnState::Tools) => Err(TransitionError::ToolsUnreachable),

        (GraphShape::ModelWithTools, TurnState::Model) => {
            if expect_assistant(last)?.has_pending_tool_calls() {
                Ok(TurnState::Tools)
            } else {
                Ok(TurnState::Done)
            }
        }

        // Tool results are in; let the model react to them
        (GraphShape::ModelWithTools, TurnState::Tools) => match last {
            Some(message) if message.has_pending_tool_calls() => Err(
                TransitionError::InvalidTransition("tool calls left unresolved".to_string()),
            ),
            Some(_) => Ok(TurnState::Model),
            None => Err(TransitionError::InvalidTransition(
                "tools step on an empty thread".to_string(),
            )),
        },
    }
}

fn expect_assistant(last: Option<&Message>) -> Result<&Message, TransitionError> {
    match last {
        Some(message) if message.role == Role::Assistant => Ok(message),
        Some(message) => Err(TransitionError::InvalidTransition(format!(
            "model step ended on a {} message",
            message.role
        ))),
        None => Err(TransitionError::InvalidTransition(
            "model step produced no message".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MessageContent, ToolCall};
    use serde_json::{json, Map};

    fn assistant(calls: Vec<ToolCall>) -> Message {
        Message::assistant(MessageContent::text("ok"), calls)
    }

    fn pending() -> ToolCall {
        ToolCall::new("c1", "current_time", Map::new())
    }

    #[test]
    fn test_model_without_calls_is_done() {
        let last = assistant(vec![]);
        assert_eq!(
            transition(GraphShape::ModelWithTools, TurnState::Model, Some(&last)),
            Ok(TurnState::Done)
        );
    }

    #[test]
    fn test_model_with_calls_goes_to_tools() {
        let last = assistant(vec![pending()]);
        assert_eq!(
            transition(GraphShape::ModelWithTools, TurnState::Model, Some(&last)),
            Ok(TurnState::Tools)
        );
    }

    #[test]
    fn test_model_only_never_reaches_tools() {
        let last = assistant(vec![pending()]);
        assert_eq!(
            transition(GraphShape::ModelOnly, TurnState::Model, Some(&last)),
            Ok(TurnState::Done)
        );
        assert_eq!(
            transition(GraphShape::ModelOnly, TurnState::Tools, Some(&last)),
            Err(TransitionError::ToolsUnreachable)
        );
    }

    #[test]
    fn test_resolved_calls_do_not_reenter_tools() {
        let last = assistant(vec![pending().with_output(json!("12:00"))]);
        assert_eq!(
            transition(GraphShape::ModelWithTools, TurnState::Model, Some(&last)),
            Ok(TurnState::Done)
        );
    }

    #[test]
    fn test_tools_returns_to_model() {
        let call = pending().with_output(json!("now"));
        let last = Message::tool_result(&call);
        assert_eq!(
            transition(GraphShape::ModelWithTools, TurnState::Tools, Some(&last)),
            Ok(TurnState::Model)
        );
    }

    #[test]
    fn test_invalid_inputs() {
        assert_eq!(
            transition(GraphShape::ModelWithTools, TurnState::Done, None),
            Err(TransitionError::AlreadyDone)
        );
        assert!(transition(GraphShape::ModelWithTools, TurnState::Model, None).is_err());

        let human = Message::human(MessageContent::text("hi"));
        assert!(transition(GraphShape::ModelOnly, TurnState::Model, Some(&human)).is_err());
    }
}
