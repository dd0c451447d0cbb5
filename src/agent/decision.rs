//! Action decision engine
//!
//! Asks the language model to pick exactly one next action, constrained to
//! the masked set. Whatever the model answers, the engine returns an action
//! the loop can act on: unknown or unavailable choices become `Code`.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::{AgentConfig, ModelInformation};
use crate::llm::{ChatError, DecisionProvider, DecisionRequest};
use crate::metrics::{AGENT_DECISIONS, DECISION_CALL_DURATION, DECISION_COERCIONS};

use super::masker::compute_allowed_actions;
use super::schema::action_function;
use super::state::{ActionRecord, ActionState, ActionType};
use super::window::format_messages;

/// Decision policy given to the model
pub fn system_prompt(auto_execute_generated_code: bool) -> String {
    format!(
        r#"You are a helpful agent that decides which action needs to be taken in the conversation. You only return the type of action to take, you do not try to perform the action or generate any other value related to performing the action.
Your instructions:
- Only return the type of action to take. Please do not return anything other than the type of action to take.
- Please only choose actions from the list of actions defined in the tool call, do not make up your own.
- You MUST ALWAYS continue until the user's question is completely answered.
- If the agent presented a table, but has not provided a visualization, try to ask it to generate code again so it does so.
- You MUST stop the conversation if an agent has asked for more information from the user (e.g. the user needs to upload a file).
- You use ONLY the previous user/assistant conversation from the user and assistant to decide which action to take. You do not use your own opinion to decide whether or not to continue.
- If the assistant has said "lets proceed" or "let us now", it means they are not done completing their action and should continue.
- You ALWAYS ensure that the assistant has provided a clear result summary.
- You must stop if the assistant requires a user response.
- If the assistant has started to repeat themselves without making any progress, you must stop.
- If the assistant has faced an error that it can't recover from without user intervention, please notify the user of the issue using markdown.
- The user has set auto execute generated code to {auto_execute_generated_code}. If they do not want automatically executed code, do not continue just because the code was not executed."#
    )
}

/// Turn the model's function arguments into an action record
///
/// Accepted shapes, in order: `{"action": {"type": ..}}`, `{"type": ..}`,
/// `{"action": ".."}`. The first candidate inside `allowed` wins. Anything
/// else, including no arguments at all, resolves to `Code`. The returned flag
/// is true when that fallback was taken.
pub fn resolve_action(
    arguments: Option<&Value>,
    allowed: &BTreeSet<ActionType>,
    verbose: bool,
) -> (ActionRecord, bool) {
    let Some(args) = arguments else {
        return (ActionRecord::new(ActionType::Code), true);
    };

    let nested = args.get("action");
    let candidates = [
        nested.and_then(|a| a.get("type")).and_then(Value::as_str),
        args.get("type").and_then(Value::as_str),
        nested.and_then(Value::as_str),
    ];

    let chosen = candidates
        .into_iter()
        .flatten()
        .filter_map(ActionType::from_wire)
        .find(|a| allowed.contains(a));

    let reason = if verbose {
        nested
            .and_then(|a| a.get("reason"))
            .or_else(|| args.get("reason"))
            .and_then(Value::as_str)
            .map(str::to_string)
    } else {
        None
    };

    match chosen {
        Some(action) => (ActionRecord { action, reason }, false),
        None => (
            ActionRecord {
                action: ActionType::Code,
                reason,
            },
            true,
        ),
    }
}

/// Picks the next action with one forced-function model call
pub struct ActionDecisionEngine {
    provider: Arc<dyn DecisionProvider>,
    config: AgentConfig,
}

impl ActionDecisionEngine {
    pub fn new(provider: Arc<dyn DecisionProvider>, config: AgentConfig) -> Self {
        Self { provider, config }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// The request `decide` would send, with the set it was masked to
    pub fn build_request(
        &self,
        state: &ActionState,
        model_info: &ModelInformation,
    ) -> (DecisionRequest, BTreeSet<ActionType>) {
        let prompt = system_prompt(self.config.auto_execute_generated_code);
        let allowed = compute_allowed_actions(state);
        let request = DecisionRequest {
            model: model_info.decision_model(),
            messages: format_messages(&prompt, state, self.config.history_char_budget),
            function: action_function(&allowed, self.config.verbose),
            temperature: self.config.temperature,
            max_tokens: self.config.max_output_tokens,
        };
        (request, allowed)
    }

    /// Decide the next action for `state`
    ///
    /// Provider failures are returned as-is and never retried here.
    pub async fn decide(
        &self,
        state: &ActionState,
        model_info: &ModelInformation,
        correlation_id: &str,
    ) -> Result<ActionRecord, ChatError> {
        let (request, allowed) = self.build_request(state, model_info);
        let offered: Vec<&str> = allowed.iter().map(ActionType::as_str).collect();

        let span = info_span!(
            "decision_call",
            correlation_id = %correlation_id,
            provider = self.provider.name(),
            model = %request.model,
            otel.name = "decision_call"
        );

        let start = std::time::Instant::now();
        let arguments = self
            .provider
            .select_action(&request)
            .instrument(span)
            .await
            .map_err(|e| {
                warn!(correlation_id = %correlation_id, error = %e, "Decision call failed");
                e
            })?;
        DECISION_CALL_DURATION
            .with_label_values(&[self.provider.name()])
            .observe(start.elapsed().as_secs_f64());

        debug!(correlation_id = %correlation_id, arguments = ?arguments, "Raw decision");

        let (record, coerced) = resolve_action(arguments.as_ref(), &allowed, self.config.verbose);
        if coerced {
            DECISION_COERCIONS.inc();
            warn!(
                correlation_id = %correlation_id,
                offered = ?offered,
                arguments = ?arguments,
                "Model chose no offered action, falling back to code"
            );
        }

        AGENT_DECISIONS.with_label_values(&[record.action.as_str()]).inc();
        info!(
            correlation_id = %correlation_id,
            action = %record.action,
            offered = ?offered,
            reason = record.reason.as_deref().unwrap_or(""),
            "Decided next action"
        );

        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatMessage;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    fn all() -> BTreeSet<ActionType> {
        ActionType::ALL.into_iter().collect()
    }

    fn only(actions: &[ActionType]) -> BTreeSet<ActionType> {
        actions.iter().copied().collect()
    }

    /// Returns a fixed answer and remembers what it was asked
    struct FixedProvider {
        answer: Result<Option<Value>, ()>,
        seen: Mutex<Vec<DecisionRequest>>,
    }

    impl FixedProvider {
        fn new(answer: Option<Value>) -> Self {
            Self {
                answer: Ok(answer),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl DecisionProvider for FixedProvider {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn select_action(
            &self,
            request: &DecisionRequest,
        ) -> Result<Option<Value>, ChatError> {
            self.seen.lock().unwrap().push(request.clone());
            match &self.answer {
                Ok(v) => Ok(v.clone()),
                Err(()) => Err(ChatError::EmptyResponse),
            }
        }
    }

    #[test]
    fn test_resolve_nested_shape() {
        let args = json!({"action": {"type": "fixError"}});
        let (record, coerced) = resolve_action(Some(&args), &all(), false);
        assert_eq!(record.action, ActionType::FixError);
        assert!(!coerced);
    }

    #[test]
    fn test_resolve_flat_and_string_shapes() {
        let (record, _) = resolve_action(Some(&json!({"type": "stop"})), &all(), false);
        assert_eq!(record.action, ActionType::Stop);

        let (record, _) = resolve_action(Some(&json!({"action": "stop"})), &all(), false);
        assert_eq!(record.action, ActionType::Stop);
    }

    #[test]
    fn test_unknown_value_coerced_to_code() {
        let args = json!({"action": {"type": "unknownValue"}});
        let (record, coerced) = resolve_action(Some(&args), &all(), false);
        assert_eq!(record.action, ActionType::Code);
        assert!(coerced);

        let (record, coerced) = resolve_action(Some(&json!({"type": "unknownValue"})), &all(), false);
        assert_eq!(record.action, ActionType::Code);
        assert!(coerced);
    }

    #[test]
    fn test_disallowed_choice_coerced_to_code() {
        let args = json!({"action": {"type": "stop"}});
        let (record, coerced) = resolve_action(Some(&args), &only(&[ActionType::Code]), false);
        assert_eq!(record.action, ActionType::Code);
        assert!(coerced);
    }

    #[test]
    fn test_missing_arguments_is_code() {
        let (record, coerced) = resolve_action(None, &all(), false);
        assert_eq!(record, ActionRecord::new(ActionType::Code));
        assert!(coerced);

        let (record, _) = resolve_action(Some(&json!([1, 2])), &all(), false);
        assert_eq!(record.action, ActionType::Code);
    }

    #[test]
    fn test_reason_kept_only_when_verbose() {
        let args = json!({"action": {"type": "stop", "reason": "answered"}});
        let (quiet, _) = resolve_action(Some(&args), &all(), false);
        assert_eq!(quiet.reason, None);

        let (loud, _) = resolve_action(Some(&args), &all(), true);
        assert_eq!(loud.reason.as_deref(), Some("answered"));
    }

    #[test]
    fn test_system_prompt_mentions_auto_execute() {
        assert!(system_prompt(true).contains("auto execute generated code to true"));
        assert!(system_prompt(false).contains("auto execute generated code to false"));
    }

    #[tokio::test]
    async fn test_decide_masks_first_query_to_code() {
        let provider = Arc::new(FixedProvider::new(Some(json!({"action": {"type": "stop"}}))));
        let engine = ActionDecisionEngine::new(provider.clone(), AgentConfig::default());
        let state = ActionState::new_query(vec![], "load data.csv");

        let record = engine
            .decide(&state, &ModelInformation::default(), "test")
            .await
            .unwrap();
        // stop is not offered on the first query
        assert_eq!(record.action, ActionType::Code);

        let seen = provider.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        let request = &seen[0];
        assert_eq!(
            crate::agent::schema::offered_actions(&request.function),
            only(&[ActionType::Code])
        );
        assert_eq!(request.temperature, 0.0);
        assert_eq!(request.max_tokens, 256);
        assert_eq!(request.messages[0].role, crate::llm::Role::System);
        assert_eq!(request.messages[1], ChatMessage::user("load data.csv"));
    }

    #[tokio::test]
    async fn test_decide_propagates_provider_error() {
        let provider = Arc::new(FixedProvider {
            answer: Err(()),
            seen: Mutex::new(Vec::new()),
        });
        let engine = ActionDecisionEngine::new(provider, AgentConfig::default());
        let state = ActionState::new_query(vec![], "q");
        let result = engine.decide(&state, &ModelInformation::default(), "test").await;
        assert!(matches!(result, Err(ChatError::EmptyResponse)));
    }
}
