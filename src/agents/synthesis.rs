use futures::StreamExt;
use futures::stream::BoxStream;
use std::sync::Arc;
use std::time::Duration;

use crate::agents::backend::CompletionBackend;
use crate::agents::{AgentRole, AgentTask, AggregatedResult, Delta};
use crate::error::AgentError;

/// Builds the follow-up prompt from the fan-out results. Sections always come
/// in the same order: critical first, positive second.
pub fn compose_prompt(original_prompt: &str, results: &AggregatedResult) -> String {
    format!(
        "Integrate the two perspectives below and provide a balanced analysis.\n\n\
         Original question: {}\n\n\
         Critical perspective:\n{}\n\n\
         Positive perspective:\n{}\n",
        original_prompt,
        results.text(AgentRole::CriticalAnalyst),
        results.text(AgentRole::PositiveAdvocate),
    )
}

/// The dependent step that runs after the fan-out barrier.
pub struct SynthesisStage {
    backend: Arc<dyn CompletionBackend>,
    model: String,
    timeout: Duration,
}

impl SynthesisStage {
    pub fn new(backend: Arc<dyn CompletionBackend>, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            backend,
            model: model.into(),
            timeout,
        }
    }

    /// Runs even when every upstream result is empty.
    pub fn run(
        &self,
        original_prompt: &str,
        results: &AggregatedResult,
    ) -> BoxStream<'static, Result<Delta, AgentError>> {
        if results.is_empty() {
            log::warn!("Synthesizing from empty agent results");
        }

        let task = AgentTask::new(
            self.backend.clone(),
            AgentRole::Synthesizer,
            self.model.clone(),
            compose_prompt(original_prompt, results),
            self.timeout,
        );

        task.into_stream()
            .map(|item| item.map(|text| Delta::partial(AgentRole::Synthesizer, text)))
            .boxed()
    }
}
