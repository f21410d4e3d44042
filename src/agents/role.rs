use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString, IntoStaticStr};

// ============================================================================
// Agent roles
// ============================================================================

/// Every agent the service knows about. The wire name is the variant name,
/// so an unknown name never parses into a role.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
    Serialize, Deserialize, Display, EnumIter, EnumString, IntoStaticStr,
)]
pub enum AgentRole {
    CriticalAnalyst,
    PositiveAdvocate,
    Synthesizer,
    Assistant,
}

/// Field of a multi-agent transcript turn that a role writes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptField {
    Critical,
    Positive,
    Synthesis,
}

impl AgentRole {
    /// Roles that run concurrently in the fan-out stage, in section order.
    pub const FAN_OUT: [AgentRole; 2] = [AgentRole::CriticalAnalyst, AgentRole::PositiveAdvocate];

    pub fn name(&self) -> &'static str {
        self.into()
    }

    /// Role → transcript field table. The chat assistant has no multi-agent field.
    pub fn transcript_field(&self) -> Option<TranscriptField> {
        match self {
            Self::CriticalAnalyst => Some(TranscriptField::Critical),
            Self::PositiveAdvocate => Some(TranscriptField::Positive),
            Self::Synthesizer => Some(TranscriptField::Synthesis),
            Self::Assistant => None,
        }
    }

    /// System instruction handed to the model for this role.
    pub fn instructions(&self) -> &'static str {
        match self {
            Self::CriticalAnalyst => {
                "You are an expert in critical thinking. For the user's question or idea, \
                 point out potential problems, risks and areas that need improvement. \
                 Be thorough and state your concrete concerns concisely."
            }
            Self::PositiveAdvocate => {
                "You are an expert in positive thinking. For the user's question or idea, \
                 emphasise the benefits, opportunities and chances of success. \
                 Find the value from a constructive angle and state concrete merits concisely."
            }
            Self::Synthesizer => {
                "You are an expert in synthesis. Weigh both the critical and the positive \
                 perspective, provide a balanced overall analysis and draw practical conclusions."
            }
            Self::Assistant => "You are a helpful assistant. Answer the question concisely.",
        }
    }
}
