// Public module exports
pub mod accumulator;
pub mod aggregator;
pub mod backend;
pub mod encoder;
pub mod events;
pub mod fan_out;
pub mod orchestrator;
pub mod role;
pub mod synthesis;
pub mod task;

#[cfg(test)]
pub mod testing;

// Re-export main types for convenience
pub use accumulator::{MultiAgentTurn, SessionAccumulator};
pub use aggregator::{AggregatedResult, ResultAggregator};
pub use backend::{CompletionBackend, CompletionRequest, OllamaBackend, RigBackend, TextStream};
pub use encoder::{LineBuffer, StreamEncoder};
pub use events::{Delta, StreamEvent};
pub use fan_out::{FanOutEvent, FanOutRunner, TaskFailure};
pub use orchestrator::{AgentModels, PanelOrchestrator, RequestManager};
pub use role::{AgentRole, TranscriptField};
pub use synthesis::SynthesisStage;
pub use task::AgentTask;
