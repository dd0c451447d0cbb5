//! notebook-agent - decision loop for an AI data-analysis notebook
//!
//! Given a user query and the notebook conversation, the agent repeatedly asks
//! a language model which action comes next (generate code, fix an error, or
//! stop) and streams the chosen executor's output back into the conversation.
//!
//! # Modules
//!
//! - `agent` - Masking, decisions, executors and the orchestration loop
//! - `config` - Settings file and provider resolution
//! - `llm` - OpenAI and Ollama decision providers
//! - `metrics` - Prometheus metrics for observability
//! - `quota` - Anonymous usage budget shared across sessions
//! - `tracing` - Console logging with optional OTLP export
//!
//! # Quick Start
//!
//! ```ignore
//! use notebook_agent::{AbortSignal, ActionState, AgentController, QuotaGate, Settings};
//!
//! let settings = Settings::load_or_default(".thread-dev/settings.json")?.apply_env();
//! let info = &settings.model_information;
//! let controller = AgentController::new(
//!     notebook_agent::llm::provider_for(info),
//!     std::sync::Arc::new(notebook_agent::HttpExecutionBackend::new()),
//!     std::sync::Arc::new(QuotaGate::in_memory()),
//!     settings.agent_config(),
//! );
//! let state = ActionState::new_query(vec![], "plot revenue by month");
//! let result = controller.run(state, info, &AbortSignal::new()).await?;
//! ```

pub mod agent;
pub mod config;
pub mod llm;
pub mod metrics;
pub mod quota;
pub mod tracing;

// Re-export commonly used types at crate root for convenience
pub use agent::{
    AbortSignal, ActionRecord, ActionState, ActionType, AgentController, AgentError, AgentEvent,
    AgentResult, HttpExecutionBackend, Termination,
};
pub use config::{AgentConfig, ModelInformation, ModelType, Settings, SettingsError};
pub use quota::{FileQuotaStore, MemoryQuotaStore, QuotaDecision, QuotaGate, QuotaStore};
