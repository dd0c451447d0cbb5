//! Agent Controller - drives the decide → execute loop for one user query
//!
//! Each pass: check abort, check quota, decide, then either stop or stream
//! the chosen executor into the conversation. The loop is strictly
//! sequential; a decision never overlaps an execution.

use std::sync::Arc;

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::{AgentConfig, ModelInformation};
use crate::llm::{ChatError, DecisionProvider};
use crate::metrics::{AGENT_CYCLES, EXECUTIONS, EXECUTION_CHUNKS};
use crate::quota::{QuotaDecision, QuotaGate};

use super::decision::ActionDecisionEngine;
use super::executor::{
    ActionExecutor, ExecutionBackend, ExecutionContext, ExecutionOutcome, ExecutionTracker,
    OutputChunk,
};
use super::state::{AbortSignal, ActionRecord, ActionState, ActionType};

/// Why a query cycle ended without an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// The model chose `Stop` (or the cycle ceiling was reached)
    Stopped,
    /// The caller's abort signal was observed
    Aborted,
    /// The anonymous usage budget is exhausted; ask the user for credentials
    QuotaExceeded,
}

impl Termination {
    pub fn as_str(&self) -> &'static str {
        match self {
            Termination::Stopped => "stopped",
            Termination::Aborted => "aborted",
            Termination::QuotaExceeded => "quota_exceeded",
        }
    }
}

/// Something the caller may want to show while the loop runs
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    Decision(ActionRecord),
    Chunk(OutputChunk),
    ExecutionFinished {
        action: ActionType,
        outcome: ExecutionOutcome,
    },
    QuotaExceeded,
    Finished(Termination),
}

/// Result of a finished query cycle
#[derive(Debug, Clone)]
pub struct AgentResult {
    pub state: ActionState,
    pub termination: Termination,
    /// Decide → execute passes made
    pub cycles: usize,
    pub correlation_id: String,
}

/// Error type for agent operations
#[derive(Debug)]
pub enum AgentError {
    /// The decision model could not be reached or answered garbage
    Provider(ChatError),
}

impl std::fmt::Display for AgentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentError::Provider(e) => write!(f, "Decision provider error: {}", e),
        }
    }
}

impl std::error::Error for AgentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AgentError::Provider(e) => Some(e),
        }
    }
}

impl From<ChatError> for AgentError {
    fn from(e: ChatError) -> Self {
        AgentError::Provider(e)
    }
}

/// Agent Controller orchestrating decisions and executions
pub struct AgentController {
    engine: ActionDecisionEngine,
    executor: ActionExecutor,
    quota: Arc<QuotaGate>,
    config: AgentConfig,
}

impl AgentController {
    /// Create a new agent controller
    ///
    /// # Arguments
    /// * `provider` - Model used for decision calls
    /// * `backend` - Code / fix-error execution backend
    /// * `quota` - Process-wide anonymous usage gate, shared between sessions
    /// * `config` - Loop configuration
    pub fn new(
        provider: Arc<dyn DecisionProvider>,
        backend: Arc<dyn ExecutionBackend>,
        quota: Arc<QuotaGate>,
        config: AgentConfig,
    ) -> Self {
        Self {
            engine: ActionDecisionEngine::new(provider, config.clone()),
            executor: ActionExecutor::new(backend),
            quota,
            config,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Run the loop to completion without observing events
    pub async fn run(
        &self,
        state: ActionState,
        model_info: &ModelInformation,
        abort: &AbortSignal,
    ) -> Result<AgentResult, AgentError> {
        self.run_with_events(state, model_info, abort, None, |_| {})
            .await
    }

    /// Run the loop, reporting progress through `on_event` as it happens
    ///
    /// # Arguments
    /// * `state` - State for this query, usually from `ActionState::new_query`
    /// * `model_info` - Resolved provider settings, passed to every call
    /// * `abort` - Cooperative cancellation, polled at loop entry and on every read
    /// * `correlation_id` - Caller id for tracing; a UUID v7 is generated if `None`
    /// * `on_event` - Called for each decision, chunk and lifecycle change
    pub async fn run_with_events<F>(
        &self,
        mut state: ActionState,
        model_info: &ModelInformation,
        abort: &AbortSignal,
        correlation_id: Option<String>,
        mut on_event: F,
    ) -> Result<AgentResult, AgentError>
    where
        F: FnMut(AgentEvent),
    {
        let correlation_id = correlation_id.unwrap_or_else(|| Uuid::now_v7().to_string());

        let root_span = info_span!(
            "agent_cycle",
            correlation_id = %correlation_id,
            model = %model_info.decision_model(),
            otel.name = "agent_cycle"
        );

        let ctx = ExecutionContext {
            model_info: model_info.clone(),
            correlation_id: correlation_id.clone(),
            auto_execute_generated_code: self.config.auto_execute_generated_code,
        };

        let outcome = async {
            info!(correlation_id = %correlation_id, query = state.query().unwrap_or(""), "Starting query cycle");
            let mut cycles = 0usize;

            let termination = loop {
                if abort.should_abort() {
                    info!(correlation_id = %correlation_id, cycles, "Abort observed");
                    break Termination::Aborted;
                }

                if cycles >= self.config.max_cycles {
                    warn!(correlation_id = %correlation_id, cycles, "Cycle ceiling reached, stopping");
                    break Termination::Stopped;
                }

                if self.quota.check_async(model_info.has_credential()).await == QuotaDecision::LimitReached {
                    on_event(AgentEvent::QuotaExceeded);
                    break Termination::QuotaExceeded;
                }

                let record = self.engine.decide(&state, model_info, &correlation_id).await?;
                cycles += 1;
                on_event(AgentEvent::Decision(record.clone()));

                if record.action == ActionType::Stop {
                    state.record_action(record);
                    break Termination::Stopped;
                }

                let action = record.action;
                if let Some(stream) = self.executor.execute(action, &state, &ctx, abort) {
                    let exec_span = info_span!(
                        "action_execution",
                        correlation_id = %correlation_id,
                        action = %action,
                        cycle = cycles,
                        otel.name = "action_execution"
                    );
                    let outcome = Self::consume(stream, &mut state, abort, &mut on_event)
                        .instrument(exec_span)
                        .await;
                    EXECUTIONS
                        .with_label_values(&[action.as_str(), outcome.as_str()])
                        .inc();
                    on_event(AgentEvent::ExecutionFinished { action, outcome });
                }

                state.record_action(record);
                state.first_query = false;
            };

            Ok::<_, AgentError>((termination, cycles))
        }
        .instrument(root_span)
        .await;

        match outcome {
            Ok((termination, cycles)) => {
                AGENT_CYCLES.with_label_values(&[termination.as_str()]).inc();
                info!(
                    correlation_id = %correlation_id,
                    termination = termination.as_str(),
                    cycles,
                    actions = state.prev_actions.len(),
                    "Query cycle finished"
                );
                on_event(AgentEvent::Finished(termination));
                Ok(AgentResult {
                    state,
                    termination,
                    cycles,
                    correlation_id,
                })
            }
            Err(e) => {
                AGENT_CYCLES.with_label_values(&["provider_error"]).inc();
                warn!(correlation_id = %correlation_id, error = %e, "Query cycle failed");
                Err(e)
            }
        }
    }

    /// Drain one executor stream into the conversation
    async fn consume<F>(
        mut stream: super::executor::ExecutionStream,
        state: &mut ActionState,
        abort: &AbortSignal,
        on_event: &mut F,
    ) -> ExecutionOutcome
    where
        F: FnMut(AgentEvent),
    {
        let mut tracker = ExecutionTracker::new();

        while let Some(chunk) = stream.next().await {
            EXECUTION_CHUNKS
                .with_label_values(&[chunk.action.as_str()])
                .inc();
            tracker.record(state, &chunk);
            on_event(AgentEvent::Chunk(chunk));
        }

        let outcome = tracker.finish(abort.should_abort());
        info!(chunks = tracker.chunks(), outcome = outcome.as_str(), "Execution finished");
        outcome
    }
}
