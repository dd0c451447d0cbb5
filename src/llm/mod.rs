//! Language-model providers for the decision call
//!
//! The decision engine only needs one thing from a provider: given a prompt
//! and exactly one function schema, return the arguments the model chose.
//! `DecisionProvider` is that seam; OpenAI and Ollama implement it.

pub mod ollama;
pub mod openai;
pub mod tool_use;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{ModelInformation, ModelType};

pub use ollama::OllamaChatClient;
pub use openai::OpenAiChatClient;
pub use tool_use::{
    parse_tool_calls_from_text, ChatError, ChatMessage, FunctionCall, Role, Tool, ToolCall,
    ToolFunction,
};

/// One forced-function decision call
#[derive(Debug, Clone)]
pub struct DecisionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    /// The only function the model may call
    pub function: ToolFunction,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// A model that can be forced to answer through a single function
#[async_trait]
pub trait DecisionProvider: Send + Sync {
    /// Short provider label for logs and metrics
    fn name(&self) -> &'static str;

    /// Issue the call and return the function arguments
    ///
    /// `Ok(None)` means the model answered without calling the function.
    async fn select_action(
        &self,
        request: &DecisionRequest,
    ) -> Result<Option<serde_json::Value>, ChatError>;
}

/// Build the provider selected by the user's settings
pub fn provider_for(info: &ModelInformation) -> Arc<dyn DecisionProvider> {
    match info.model_type {
        ModelType::OpenAi => Arc::new(OpenAiChatClient::new(
            info.decision_base_url(),
            info.openai_key.clone(),
        )),
        ModelType::Ollama => Arc::new(OllamaChatClient::new(info.decision_base_url())),
    }
}
