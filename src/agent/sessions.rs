//! Archive of finished query cycles
//!
//! Every cycle that ends without a provider error can be written to disk with
//! its terminal `ActionState`, so the conversation can be inspected or fed back
//! as history for the next query.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::controller::{AgentResult, Termination};
use super::state::ActionState;

/// A saved query cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Correlation id of the cycle
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// The user query that started the cycle
    pub query: String,
    /// Decision model used
    pub model: String,
    pub termination: Termination,
    /// Conversation and action log at the end of the cycle
    pub state: ActionState,
}

impl Session {
    pub fn new(
        id: impl Into<String>,
        model: impl Into<String>,
        termination: Termination,
        state: ActionState,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            created_at: now,
            updated_at: now,
            query: state.query().unwrap_or_default().to_string(),
            model: model.into(),
            termination,
            state,
        }
    }

    /// Archive entry for a finished cycle
    pub fn from_result(result: &AgentResult, model: impl Into<String>) -> Self {
        Self::new(
            result.correlation_id.clone(),
            model,
            result.termination,
            result.state.clone(),
        )
    }
}

/// Summary of a session for listing
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub query: String,
    pub created_at: DateTime<Utc>,
    pub actions: usize,
    pub termination: Termination,
}

/// Session storage manager
pub struct SessionStore {
    base_dir: PathBuf,
}

impl SessionStore {
    /// Create a store rooted at `base_dir`, creating it if needed
    pub fn new(base_dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    /// Create with default directory (~/.notebook-agent/sessions)
    pub fn default_store() -> std::io::Result<Self> {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        Self::new(PathBuf::from(home).join(".notebook-agent").join("sessions"))
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn save(&self, session: &Session) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(session)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(self.session_path(&session.id), json)
    }

    pub fn load(&self, session_id: &str) -> std::io::Result<Session> {
        load_from_path(&self.session_path(session_id))
    }

    /// All readable sessions, newest first
    ///
    /// Files that fail to parse are skipped.
    pub fn list(&self) -> std::io::Result<Vec<SessionSummary>> {
        let mut sessions = Vec::new();
        for entry in std::fs::read_dir(&self.base_dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                match load_from_path(&path) {
                    Ok(session) => sessions.push(SessionSummary {
                        id: session.id,
                        query: truncate(&session.query, 50),
                        created_at: session.created_at,
                        actions: session.state.prev_actions.len(),
                        termination: session.termination,
                    }),
                    Err(e) => {
                        tracing::debug!(path = %path.display(), error = %e, "Skipping unreadable session")
                    }
                }
            }
        }
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    pub fn delete(&self, session_id: &str) -> std::io::Result<()> {
        std::fs::remove_file(self.session_path(session_id))
    }

    fn session_path(&self, session_id: &str) -> PathBuf {
        self.base_dir.join(format!("{}.json", session_id))
    }
}

fn load_from_path(path: &Path) -> std::io::Result<Session> {
    let json = std::fs::read_to_string(path)?;
    serde_json::from_str(&json).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

/// Truncate to `max_len` characters, adding an ellipsis if needed
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
