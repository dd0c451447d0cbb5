//! OpenAI-compatible `/chat/completions` client with forced tool choice

use async_trait::async_trait;
use serde::Deserialize;

use super::tool_use::{ChatError, Tool, ToolCall};
use super::{DecisionProvider, DecisionRequest};

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

/// Client for an OpenAI-compatible chat completions API
#[derive(Clone)]
pub struct OpenAiChatClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiChatClient {
    /// Create a new client
    ///
    /// # Arguments
    /// * `base_url` - API root including the version, e.g. `https://api.openai.com/v1`
    /// * `api_key` - Bearer token; may be empty behind a keyless gateway
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }

    fn request_body(request: &DecisionRequest) -> serde_json::Value {
        serde_json::json!({
            "model": request.model,
            "messages": request.messages,
            "tools": [Tool::function(request.function.clone())],
            "tool_choice": {
                "type": "function",
                "function": { "name": request.function.name }
            },
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        })
    }
}

#[async_trait]
impl DecisionProvider for OpenAiChatClient {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn select_action(
        &self,
        request: &DecisionRequest,
    ) -> Result<Option<serde_json::Value>, ChatError> {
        let endpoint = format!("{}/chat/completions", self.base_url);

        let mut http = self
            .client
            .post(&endpoint)
            .json(&Self::request_body(request));
        if !self.api_key.is_empty() {
            http = http.bearer_auth(&self.api_key);
        }

        let response = http.send().await?;
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

        let completion: CompletionResponse = serde_json::from_str(&text)?;
        first_tool_arguments(completion)
    }
}

fn first_tool_arguments(
    completion: CompletionResponse,
) -> Result<Option<serde_json::Value>, ChatError> {
    let call = completion
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.tool_calls)
        .and_then(|calls| calls.into_iter().next());

    match call {
        Some(call) => {
            tracing::debug!(arguments = %call.function.arguments, "Decision tool call");
            Ok(Some(call.function.parsed_arguments()?))
        }
        None => Ok(None),
    }
}
