use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use strum_macros::{Display, EnumString};
use tokio::sync::RwLock;

use crate::agents::{AgentModels, MultiAgentTurn, PanelOrchestrator};
use crate::types::{SessionId, Timestamp};

// ============================================================================
// AppState && AiConfig
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum BackendKind {
    /// Streaming `/api/chat` over reqwest.
    #[default]
    Ollama,
    /// One-shot rig agent, re-chunked.
    Rig,
}

#[derive(Debug, Clone)]
pub struct AiConfig {
    /// `None` means no model service is configured.
    pub url: Option<String>,
    pub backend: BackendKind,
    pub models: AgentModels,
    pub timeout: Duration,
}

impl AiConfig {
    pub fn from_env() -> std::result::Result<Self, Box<dyn std::error::Error>> {
        let default_model = std::env::var("CHAT_MODEL").unwrap_or_else(|_| "llama3.2".to_string());
        let model = |key: &str| std::env::var(key).unwrap_or_else(|_| default_model.clone());

        let backend = match std::env::var("AI_BACKEND") {
            Ok(value) => value.parse()?,
            Err(_) => BackendKind::default(),
        };

        let timeout_secs: u64 = std::env::var("AGENT_TIMEOUT_SECS")
            .unwrap_or_else(|_| "120".to_string())
            .parse()?;

        Ok(Self {
            url: std::env::var("AI_URL").ok().filter(|url| !url.trim().is_empty()),
            backend,
            models: AgentModels {
                critical: model("CRITICAL_MODEL"),
                positive: model("POSITIVE_MODEL"),
                synthesis: model("SYNTHESIS_MODEL"),
                chat: default_model.clone(),
            },
            timeout: Duration::from_secs(timeout_secs),
        })
    }
}

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<PanelOrchestrator>,
    pub sessions: Arc<SessionStore>,
    pub ai_config: AiConfig,
}

// ============================================================================
// Session Store
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionMessage {
    User {
        content: String,
        #[serde(default)]
        multi_agent: bool,
        timestamp: Timestamp,
    },
    Assistant {
        content: String,
        timestamp: Timestamp,
    },
    MultiAgent {
        #[serde(flatten)]
        turn: MultiAgentTurn,
        timestamp: Timestamp,
    },
}

impl SessionMessage {
    pub fn user(content: impl Into<String>, multi_agent: bool) -> Self {
        Self::User {
            content: content.into(),
            multi_agent,
            timestamp: Timestamp::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant {
            content: content.into(),
            timestamp: Timestamp::now(),
        }
    }

    pub fn multi_agent(turn: MultiAgentTurn) -> Self {
        Self::MultiAgent {
            turn,
            timestamp: Timestamp::now(),
        }
    }
}

/// Conversation history per session, kept in memory for the process lifetime.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionId, Vec<SessionMessage>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, session: &SessionId) -> Vec<SessionMessage> {
        let sessions = self.sessions.read().await;
        sessions.get(session).cloned().unwrap_or_default()
    }

    pub async fn append(&self, session: &SessionId, message: SessionMessage) {
        let mut sessions = self.sessions.write().await;
        sessions.entry(session.clone()).or_default().push(message);
    }

    /// Returns true if the session existed.
    pub async fn clear(&self, session: &SessionId) -> bool {
        let mut sessions = self.sessions.write().await;
        sessions.remove(session).is_some()
    }
}

// ============================================================================
// Tests
// ============================================================================
