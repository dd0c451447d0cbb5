//! Agent module for the notebook decision loop
//!
//! This module provides the loop that turns one user query into a sequence
//! of generated-code runs:
//! - Action masking from the conversation state
//! - Forced-function decision calls (OpenAI or Ollama)
//! - Streaming code / fix-error executors over NDJSON
//!
//! # Architecture
//!
//! ```text
//! User Query → AgentController ──► QuotaGate.check()
//!                  ↓
//!           compute_allowed_actions(state)
//!                  ↓
//!           ActionDecisionEngine → provider (NextAction tool)
//!                  ↓
//!           Stop? ──yes──► record, finish
//!                  ↓ no
//!           ActionExecutor → /api/code | /api/fixErrors (NDJSON)
//!                  ↓
//!           chunks folded into messagesAfterQuery → Loop
//! ```

pub mod controller;
pub mod decision;
pub mod executor;
pub mod masker;
pub mod schema;
pub mod sessions;
pub mod state;
pub mod window;

pub use controller::{AgentController, AgentError, AgentEvent, AgentResult, Termination};
pub use decision::ActionDecisionEngine;
pub use executor::{
    ActionExecutor, ExecutionBackend, ExecutionError, ExecutionOutcome, ExecutionRequest,
    ExecutionStream, HttpExecutionBackend, OutputChunk,
};
pub use masker::compute_allowed_actions;
pub use sessions::{Session, SessionStore, SessionSummary};
pub use state::{AbortSignal, ActionRecord, ActionState, ActionType};
