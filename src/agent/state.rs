//! Conversation state carried through one query cycle

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::llm::{ChatMessage, Role};

/// The three things the agent can do next
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ActionType {
    /// Generate (and possibly execute) code
    #[serde(rename = "code")]
    Code,
    /// Repair the previously failed execution
    #[serde(rename = "fixError")]
    FixError,
    /// Yield control back to the user
    #[serde(rename = "stop")]
    Stop,
}

impl ActionType {
    /// Every action, in schema order
    pub const ALL: [ActionType; 3] = [ActionType::Code, ActionType::FixError, ActionType::Stop];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Code => "code",
            ActionType::FixError => "fixError",
            ActionType::Stop => "stop",
        }
    }

    /// Parse the wire name; `None` for anything unrecognized
    pub fn from_wire(s: &str) -> Option<Self> {
        ActionType::ALL.into_iter().find(|a| a.as_str() == s)
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decided action; `reason` only survives in verbose mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRecord {
    #[serde(rename = "type")]
    pub action: ActionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ActionRecord {
    pub fn new(action: ActionType) -> Self {
        Self {
            action,
            reason: None,
        }
    }

    pub fn with_reason(action: ActionType, reason: impl Into<String>) -> Self {
        Self {
            action,
            reason: Some(reason.into()),
        }
    }
}

/// Conversation context for one decide → execute cycle
///
/// `messages_after_query` mirrors the tail of `messages` produced since the
/// latest user query. `prev_actions` only ever grows within a query.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionState {
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub messages_after_query: Vec<ChatMessage>,
    #[serde(default)]
    pub prev_actions: Vec<ActionRecord>,
    #[serde(default)]
    pub first_query: bool,
}

impl ActionState {
    /// Start a query cycle on top of existing history
    pub fn new_query(history: Vec<ChatMessage>, query: impl Into<String>) -> Self {
        let query = ChatMessage::user(query);
        let mut messages = history;
        messages.push(query.clone());
        Self {
            messages,
            messages_after_query: vec![query],
            prev_actions: Vec::new(),
            first_query: true,
        }
    }

    /// The user query that opened this cycle, if any
    pub fn query(&self) -> Option<&str> {
        self.messages_after_query
            .iter()
            .find(|m| m.role == Role::User)
            .or_else(|| self.messages.iter().rev().find(|m| m.role == Role::User))
            .map(|m| m.content.as_str())
    }

    pub fn last_message_after_query(&self) -> Option<&ChatMessage> {
        self.messages_after_query.last()
    }

    /// Append a new assistant turn to both views of the conversation
    pub fn push_assistant(&mut self, content: impl Into<String>) {
        let message = ChatMessage::assistant(content);
        self.messages.push(message.clone());
        self.messages_after_query.push(message);
    }

    /// Extend the latest assistant turn in both views
    ///
    /// Opens a new assistant turn when the latest message is not one.
    pub fn extend_assistant(&mut self, content: &str) {
        let tail_is_assistant = matches!(
            (self.messages.last(), self.messages_after_query.last()),
            (Some(a), Some(b)) if a.role == Role::Assistant && b.role == Role::Assistant
        );
        if !tail_is_assistant {
            self.push_assistant(content);
            return;
        }
        if let Some(last) = self.messages.last_mut() {
            last.content.push_str(content);
        }
        if let Some(last) = self.messages_after_query.last_mut() {
            last.content.push_str(content);
        }
    }

    /// Record a completed decide (→ execute) step
    pub fn record_action(&mut self, record: ActionRecord) {
        self.prev_actions.push(record);
    }
}

/// Cooperative cancellation shared between a caller and one running cycle
///
/// Either tripped directly with `abort()` or backed by a caller predicate.
#[derive(Clone)]
pub struct AbortSignal {
    flag: Arc<AtomicBool>,
    predicate: Option<Arc<dyn Fn() -> bool + Send + Sync>>,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            predicate: None,
        }
    }

    /// Wrap an arbitrary `should_abort` predicate
    pub fn from_fn<F>(predicate: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            predicate: Some(Arc::new(predicate)),
        }
    }

    pub fn abort(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn should_abort(&self) -> bool {
        self.flag.load(Ordering::SeqCst) || self.predicate.as_ref().map_or(false, |p| p())
    }
}

impl Default for AbortSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbortSignal")
            .field("aborted", &self.should_abort())
            .finish()
    }
}
