//! Ollama `/api/chat` client for decision calls
//!
//! Ollama accepts `tools` but cannot force the model to call one, so smaller
//! models often answer in text. The client recovers the decision from the
//! text when the native `tool_calls` field is missing.

use async_trait::async_trait;
use serde::Deserialize;

use super::tool_use::{
    json_objects_in, parse_tool_calls_from_text, ChatError, Tool, ToolCall,
};
use super::{DecisionProvider, DecisionRequest};

/// Response from /api/chat
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    pub message: ResponseMessage,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub eval_count: u32,
    #[serde(default)]
    pub eval_duration: u64,
}

/// Assistant message inside a `ChatResponse`
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseMessage {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCall>>,
}

/// Client for Ollama's /api/chat endpoint with tool support
#[derive(Clone)]
pub struct OllamaChatClient {
    base_url: String,
    client: reqwest::Client,
}

impl OllamaChatClient {
    /// Create a new chat client
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the Ollama server (e.g., "http://localhost:11434")
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    fn request_body(request: &DecisionRequest) -> serde_json::Value {
        serde_json::json!({
            "model": request.model,
            "messages": request.messages,
            "stream": false,
            "tools": [Tool::function(request.function.clone())],
            "options": {
                "temperature": request.temperature,
                "num_predict": request.max_tokens
            }
        })
    }
}

#[async_trait]
impl DecisionProvider for OllamaChatClient {
    fn name(&self) -> &'static str {
        "ollama"
    }

    async fn select_action(
        &self,
        request: &DecisionRequest,
    ) -> Result<Option<serde_json::Value>, ChatError> {
        let endpoint = format!("{}/api/chat", self.base_url);

        let response = self
            .client
            .post(&endpoint)
            .json(&Self::request_body(request))
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(ChatError::Status {
                code: status.as_u16(),
                body: text,
            });
        }
        if text.is_empty() {
            return Err(ChatError::EmptyResponse);
        }

        let chat_response: ChatResponse = serde_json::from_str(&text)?;
        tracing::debug!(
            eval_count = chat_response.eval_count,
            eval_duration_ns = chat_response.eval_duration,
            "Ollama decision call completed"
        );
        extract_arguments(&chat_response.message, &request.function.name)
    }
}

/// Find the decision in a chat reply
///
/// Order: native tool call, tool call printed as text, then any bare JSON
/// object that looks like an action (`{"type": ..}` or `{"action": ..}`).
fn extract_arguments(
    message: &ResponseMessage,
    function_name: &str,
) -> Result<Option<serde_json::Value>, ChatError> {
    let tool_calls = message
        .tool_calls
        .clone()
        .filter(|tc| !tc.is_empty())
        .unwrap_or_else(|| parse_tool_calls_from_text(&message.content));

    if let Some(call) = tool_calls
        .iter()
        .find(|tc| tc.function.name == function_name)
        .or_else(|| tool_calls.first())
    {
        return Ok(Some(call.function.parsed_arguments()?));
    }

    let bare = json_objects_in(message.content.trim())
        .into_iter()
        .filter_map(|s| serde_json::from_str::<serde_json::Value>(s).ok())
        .find(|v| v.get("type").is_some() || v.get("action").is_some());

    Ok(bare)
}
