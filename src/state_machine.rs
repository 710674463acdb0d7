//! Turn state machine
//!
//! The model/tool loop is a small cyclic graph walked by a pure transition
//! function; the executor performs the I/O for each state.

pub mod state;
pub(crate) mod transition;

#[cfg(test)]
mod proptests;

pub use state::{GraphShape, TurnState};
pub use transition::{transition, TransitionError};
