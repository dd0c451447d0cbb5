//! Chat and tool-calling types shared by the decision providers
//!
//! Both OpenAI's `/chat/completions` and Ollama's `/api/chat` speak roughly
//! the same message + tool shape, so one set of types covers both.

use serde::{Deserialize, Serialize};

/// Author of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A message in a chat conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A tool call from the model
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToolCall {
    pub function: FunctionCall,
}

/// Function call details
///
/// OpenAI sends `arguments` as a JSON-encoded string, Ollama as an object;
/// `parsed_arguments` normalizes both.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

impl FunctionCall {
    pub fn parsed_arguments(&self) -> Result<serde_json::Value, serde_json::Error> {
        match &self.arguments {
            serde_json::Value::String(raw) => serde_json::from_str(raw),
            other => Ok(other.clone()),
        }
    }
}

/// Tool definition for the model
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tool {
    #[serde(rename = "type")]
    pub tool_type: String, // Always "function"
    pub function: ToolFunction,
}

impl Tool {
    pub fn function(function: ToolFunction) -> Self {
        Self {
            tool_type: "function".to_string(),
            function,
        }
    }
}

/// Function specification for a tool
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolFunction {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value, // JSON Schema
}

/// Error type for chat operations
#[derive(Debug)]
pub enum ChatError {
    Request(reqwest::Error),
    Parse(serde_json::Error),
    Status { code: u16, body: String },
    EmptyResponse,
}

impl std::fmt::Display for ChatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatError::Request(e) => write!(f, "Request error: {}", e),
            ChatError::Parse(e) => write!(f, "Parse error: {}", e),
            ChatError::Status { code, body } => write!(f, "Provider returned {}: {}", code, body),
            ChatError::EmptyResponse => write!(f, "Empty response from provider"),
        }
    }
}

impl std::error::Error for ChatError {}

impl From<reqwest::Error> for ChatError {
    fn from(e: reqwest::Error) -> Self {
        ChatError::Request(e)
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(e: serde_json::Error) -> Self {
        ChatError::Parse(e)
    }
}

/// Try to parse tool calls from the response content text
///
/// Models served without native tool support print the call as JSON in the
/// message body instead of using the `tool_calls` field.
pub fn parse_tool_calls_from_text(content: &str) -> Vec<ToolCall> {
    let mut tool_calls = Vec::new();
    let content = content.trim();

    if let Some(tool_call) = try_parse_tool_call(content) {
        tool_calls.push(tool_call);
        return tool_calls;
    }

    for json_str in json_objects_in(content) {
        if let Some(tool_call) = try_parse_tool_call(json_str) {
            tool_calls.push(tool_call);
        }
    }

    tool_calls
}

/// Top-level `{...}` spans inside free text
pub fn json_objects_in(content: &str) -> Vec<&str> {
    let mut objects = Vec::new();
    let mut depth = 0usize;
    let mut start = None;

    for (i, c) in content.char_indices() {
        match c {
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start.take() {
                        objects.push(&content[s..=i]);
                    }
                }
            }
            _ => {}
        }
    }

    objects
}

fn try_parse_tool_call(json_str: &str) -> Option<ToolCall> {
    let value = serde_json::from_str::<serde_json::Value>(json_str).ok()?;
    parse_tool_call_from_value(&value)
}

/// Parse a tool call from a JSON Value
fn parse_tool_call_from_value(value: &serde_json::Value) -> Option<ToolCall> {
    // {"name": "...", "arguments": {...}}, some models say "parameters"
    let name = value.get("name").and_then(|n| n.as_str())?;
    let arguments = value
        .get("arguments")
        .or_else(|| value.get("parameters"))?
        .clone();

    Some(ToolCall {
        function: FunctionCall {
            name: name.to_string(),
            arguments,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_role_serialization() {
        let msg = ChatMessage::assistant("done");
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"done"}"#);
    }

    #[test]
    fn test_parsed_arguments_string_and_object() {
        let openai = FunctionCall {
            name: "NextAction".to_string(),
            arguments: json!(r#"{"action":{"type":"stop"}}"#),
        };
        assert_eq!(openai.parsed_arguments().unwrap()["action"]["type"], "stop");

        let ollama = FunctionCall {
            name: "NextAction".to_string(),
            arguments: json!({"action": {"type": "code"}}),
        };
        assert_eq!(ollama.parsed_arguments().unwrap()["action"]["type"], "code");
    }

    #[test]
    fn test_parse_tool_call_whole_content() {
        let calls = parse_tool_calls_from_text(
            r#"{"name": "NextAction", "arguments": {"action": {"type": "stop"}}}"#,
        );
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function.name, "NextAction");
        assert_eq!(calls[0].function.arguments["action"]["type"], "stop");
    }

    #[test]
    fn test_parse_tool_call_embedded_in_text() {
        let content = r#"Sure. {"name": "NextAction", "parameters": {"type": "code"}} That's it."#;
        let calls = parse_tool_calls_from_text(content);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function.arguments["type"], "code");
    }

    #[test]
    fn test_parse_tool_call_none() {
        assert!(parse_tool_calls_from_text("I think we should stop.").is_empty());
        assert!(parse_tool_calls_from_text("}{ unbalanced").is_empty());
    }

    #[test]
    fn test_json_objects_in() {
        let objects = json_objects_in(r#"a {"x": {"y": 1}} b {"z": 2}"#);
        assert_eq!(objects, vec![r#"{"x": {"y": 1}}"#, r#"{"z": 2}"#]);
    }
}
