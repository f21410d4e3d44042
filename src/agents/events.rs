use serde::{Deserialize, Serialize};

use crate::agents::AgentRole;

/// One increment of generated text from a single agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    pub agent: AgentRole,
    #[serde(rename = "content")]
    pub text: String,
    pub is_final: bool,
}

impl Delta {
    pub fn partial(agent: AgentRole, text: impl Into<String>) -> Self {
        Self {
            agent,
            text: text.into(),
            is_final: false,
        }
    }

    /// Terminal marker carrying no text.
    pub fn terminal(agent: AgentRole) -> Self {
        Self {
            agent,
            text: String::new(),
            is_final: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    // Lifecycle events
    Start,

    // Fan-out events
    AgentDelta(Delta),
    AgentsComplete,

    // Synthesis events
    SynthesisStart,
    SynthesisDelta(Delta),

    // Completion events
    Complete,

    // Error events
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
}

impl StreamEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            detail: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error { .. })
    }
}
