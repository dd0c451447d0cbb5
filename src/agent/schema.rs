//! The `NextAction` function offered to the decision model
//!
//! Built fresh from the allowed set on every call; there is no shared
//! template to mutate.

use std::collections::BTreeSet;

use serde_json::{json, Value};

use crate::llm::ToolFunction;

use super::state::ActionType;

/// Name of the single function the model is forced to call
pub const ACTION_FUNCTION_NAME: &str = "NextAction";

const ACTION_FUNCTION_DESCRIPTION: &str =
    "The function to call after deciding what action to take in the conversation.";

fn variant_description(action: ActionType) -> &'static str {
    match action {
        ActionType::Code => {
            "Conditions you should return 'code':
- The user has asked you to complete an action that can be completed using code.
- The user has asked a question that can be answered by loading of the files provided."
        }
        ActionType::FixError => {
            "Conditions you should return 'fixError':
- The previous cell execution ran into an error.
- The execution has repeated the same error and needs to be fixed."
        }
        ActionType::Stop => {
            "Conditions you should return 'stop':
- The assistant has generated the necessary code to answer the users request.
- You are awaiting for the user's input. You must return 'stop' in this case.
- The user's answer has been completely addressed. If code execution is not enabled, return stop even if the code was not executed.
- If you are about to repeat yourself. Because you shouldn't repeat yourself, you must return 'stop'.
- If you have already discussed having insufficient information from the user, you must return 'stop'."
        }
    }
}

fn reason_description(action: ActionType) -> &'static str {
    match action {
        ActionType::Code => "The reason for returning code.",
        ActionType::FixError => "The reason for returning fixError.",
        ActionType::Stop => "The reason for stopping.",
    }
}

fn variant(action: ActionType, verbose: bool) -> Value {
    let mut properties = json!({
        "type": { "type": "string", "const": action.as_str() }
    });
    let required = if verbose {
        properties["reason"] = json!({
            "type": "string",
            "description": reason_description(action),
        });
        json!(["type", "reason"])
    } else {
        json!(["type"])
    };

    json!({
        "type": "object",
        "description": variant_description(action),
        "properties": properties,
        "required": required,
    })
}

/// Build the function schema restricted to `allowed`
///
/// Variants always appear in `Code, FixError, Stop` order. With `verbose`
/// every variant also requires a `reason`.
pub fn action_function(allowed: &BTreeSet<ActionType>, verbose: bool) -> ToolFunction {
    let one_of: Vec<Value> = ActionType::ALL
        .into_iter()
        .filter(|a| allowed.contains(a))
        .map(|a| variant(a, verbose))
        .collect();

    ToolFunction {
        name: ACTION_FUNCTION_NAME.to_string(),
        description: ACTION_FUNCTION_DESCRIPTION.to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "action": {
                    "oneOf": one_of,
                    "description": "The action to be performed"
                }
            },
            "required": ["action"]
        }),
    }
}

/// Action types a function schema actually offers
pub fn offered_actions(function: &ToolFunction) -> BTreeSet<ActionType> {
    function.parameters["properties"]["action"]["oneOf"]
        .as_array()
        .map(|variants| {
            variants
                .iter()
                .filter_map(|v| v["properties"]["type"]["const"].as_str())
                .filter_map(ActionType::from_wire)
                .collect()
        })
        .unwrap_or_default()
}
