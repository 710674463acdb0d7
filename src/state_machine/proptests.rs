//! Property-based tests for the state machine
//!
//! These tests verify key invariants hold across all possible inputs.

use super::*;
use crate::db::{Message, MessageContent, ToolCall};
use proptest::prelude::*;
use serde_json::{json, Map};

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_shape() -> impl Strategy<Value = GraphShape> {
    prop_oneof![Just(GraphShape::ModelOnly), Just(GraphShape::ModelWithTools)]
}

fn arb_state() -> impl Strategy<Value = TurnState> {
    prop_oneof![
        Just(TurnState::Model),
        Just(TurnState::Tools),
        Just(TurnState::Done),
    ]
}

/// A tool call that is pending, resolved with output, or resolved with error
fn arb_tool_call() -> impl Strategy<Value = ToolCall> {
    ("[a-z]{6}", "[a-z_]{3,12}", 0u8..3).prop_map(|(id, name, resolution)| {
        let call = ToolCall::new(id, name, Map::new());
        match resolution {
            0 => call,
            1 => call.with_output(json!("done")),
            _ => call.with_error("failed"),
        }
    })
}

fn arb_assistant() -> impl Strategy<Value = Message> {
    ("[a-zA-Z ]{0,30}", prop::collection::vec(arb_tool_call(), 0..5))
        .prop_map(|(text, calls)| Message::assistant(MessageContent::text(text), calls))
}

fn arb_message() -> impl Strategy<Value = Message> {
    prop_oneof![
        arb_assistant(),
        "[a-z ]{1,20}".prop_map(|t| Message::human(MessageContent::text(t))),
        arb_tool_call().prop_map(|c| Message::tool_result(&c.with_output(json!("x")))),
    ]
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    /// Model step branches only on whether pending calls remain
    #[test]
    fn prop_model_branch_follows_pending_calls(last in arb_assistant()) {
        let next = transition(GraphShape::ModelWithTools, TurnState::Model, Some(&last));
        let expected = if last.pending_tool_calls().is_empty() {
            TurnState::Done
        } else {
            TurnState::Tools
        };
        prop_assert_eq!(next, Ok(expected));
    }

    /// A workflow without tools can never enter TOOLS
    #[test]
    fn prop_model_only_never_enters_tools(
        state in arb_state(),
        last in proptest::option::of(arb_message()),
    ) {
        let next = transition(GraphShape::ModelOnly, state, last.as_ref());
        prop_assert_ne!(next, Ok(TurnState::Tools));
    }

    /// Every successful transition stays inside the shape's reachable set
    #[test]
    fn prop_transitions_stay_reachable(
        shape in arb_shape(),
        state in arb_state(),
        last in proptest::option::of(arb_message()),
    ) {
        if let Ok(next) = transition(shape, state, last.as_ref()) {
            prop_assert!(shape.reachable().contains(&next));
            prop_assert!(!state.is_terminal());
        }
    }

    /// Walking the loop with a model that eventually stops calling tools terminates
    #[test]
    fn prop_loop_terminates(rounds in 0usize..6) {
        let mut state = TurnState::Model;
        let mut steps = 0;
        let mut remaining = rounds;
        while !state.is_terminal() {
            let last = match state {
                TurnState::Model if remaining > 0 => {
                    remaining -= 1;
                    Message::assistant(
                        MessageContent::default(),
                        vec![ToolCall::new("c", "t", Map::new())],
                    )
                }
                TurnState::Model => Message::assistant(MessageContent::text("final"), vec![]),
                _ => Message::tool_result(&ToolCall::new("c", "t", Map::new()).with_output(json!(1))),
            };
            state = transition(GraphShape::ModelWithTools, state, Some(&last)).unwrap();
            steps += 1;
        }
        prop_assert_eq!(steps, rounds * 2 + 1);
    }
}
