//! Legal-action masking
//!
//! The model is only ever offered actions that make sense right now:
//! - `Stop` is withheld until the agent has done something for this query.
//! - `FixError` is offered only right after an assistant turn that reported
//!   a failed execution.
//! - `Code` is always available.

use std::collections::BTreeSet;

use crate::llm::Role;

use super::state::{ActionState, ActionType};

/// Marker an assistant turn carries when its execution failed
pub const ERROR_OCCURRED_MARKER: &str = r#""error_occurred":true"#;

/// Actions the model may choose from for this state
pub fn compute_allowed_actions(state: &ActionState) -> BTreeSet<ActionType> {
    let mut allowed: BTreeSet<ActionType> = ActionType::ALL.into_iter().collect();

    if state.first_query {
        allowed.remove(&ActionType::Stop);
    }

    if state.first_query || !last_turn_reported_error(state) {
        allowed.remove(&ActionType::FixError);
    }

    allowed
}

/// Whether the latest turn since the query is an assistant error report
pub fn last_turn_reported_error(state: &ActionState) -> bool {
    state
        .last_message_after_query()
        .map_or(false, |m| m.role == Role::Assistant && m.content.contains(ERROR_OCCURRED_MARKER))
}
