use serde::{Deserialize, Serialize};

use crate::agents::{LineBuffer, StreamEvent, TranscriptField};

/// Accumulated text of one multi-agent turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiAgentTurn {
    pub critical_content: String,
    pub positive_content: String,
    pub synthesis_content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MultiAgentTurn {
    fn field_mut(&mut self, field: TranscriptField) -> &mut String {
        match field {
            TranscriptField::Critical => &mut self.critical_content,
            TranscriptField::Positive => &mut self.positive_content,
            TranscriptField::Synthesis => &mut self.synthesis_content,
        }
    }
}

/// Folds the encoded record stream of one request into a transcript turn.
///
/// Each record is parsed on its own; records that do not parse (including
/// deltas from unknown agents) are skipped. Once `complete` or `error` has
/// been seen the turn is finished and later records are ignored.
#[derive(Debug, Default)]
pub struct SessionAccumulator {
    turn: MultiAgentTurn,
    lines: LineBuffer,
    finished: bool,
    skipped: usize,
}

impl SessionAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds raw bytes, which may split records anywhere. Returns true once
    /// the turn is finished.
    pub fn ingest_bytes(&mut self, chunk: &[u8]) -> bool {
        for line in self.lines.push(chunk) {
            self.ingest_record(&line);
        }
        self.finished
    }

    /// Feeds one complete record. Returns true once the turn is finished.
    pub fn ingest_record(&mut self, record: &str) -> bool {
        if self.finished {
            return true;
        }

        let event: StreamEvent = match serde_json::from_str(record.trim()) {
            Ok(event) => event,
            Err(e) => {
                self.skipped += 1;
                log::debug!("Skipping malformed record: {}", e);
                return false;
            }
        };

        match event {
            StreamEvent::AgentDelta(delta) | StreamEvent::SynthesisDelta(delta) => {
                match delta.agent.transcript_field() {
                    Some(field) => self.turn.field_mut(field).push_str(&delta.text),
                    None => {
                        self.skipped += 1;
                        log::debug!("Agent {} has no transcript field", delta.agent);
                    }
                }
            }
            StreamEvent::Complete => self.finished = true,
            StreamEvent::Error { message, .. } => {
                self.turn.error = Some(message);
                self.finished = true;
            }
            StreamEvent::Start | StreamEvent::AgentsComplete | StreamEvent::SynthesisStart => {}
        }

        self.finished
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// The finished turn, or `None` if no terminal record was observed.
    pub fn finish(self) -> Option<MultiAgentTurn> {
        self.finished.then_some(self.turn)
    }
}
