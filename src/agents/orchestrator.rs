use futures::{FutureExt, StreamExt};
use std::panic::AssertUnwindSafe;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agents::backend::{CompletionBackend, TextStream};
use crate::agents::{AgentRole, AgentTask, FanOutEvent, FanOutRunner, StreamEvent, SynthesisStage};
use crate::error::OrchestrationError;

const EVENT_BUFFER: usize = 100;
const INTERNAL_ERROR_MESSAGE: &str = "internal error";

// ============================================================================
// REQUEST MANAGER
// ============================================================================

/// Active requests by id, so a request can be cancelled from another call.
#[derive(Default)]
pub struct RequestManager {
    active_requests: Arc<RwLock<HashMap<String, CancellationToken>>>,
}

impl RequestManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, request_id: String) -> CancellationToken {
        let token = CancellationToken::new();
        let mut requests = self.active_requests.write().await;
        requests.insert(request_id, token.clone());
        token
    }

    pub async fn cancel(&self, request_id: &str) -> bool {
        let requests = self.active_requests.read().await;
        if let Some(token) = requests.get(request_id) {
            token.cancel();
            true
        } else {
            false
        }
    }

    pub async fn unregister(&self, request_id: &str) {
        let mut requests = self.active_requests.write().await;
        requests.remove(request_id);
    }

    pub async fn active_count(&self) -> usize {
        self.active_requests.read().await.len()
    }
}

// ============================================================================
// MODELS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentModels {
    pub critical: String,
    pub positive: String,
    pub synthesis: String,
    pub chat: String,
}

impl AgentModels {
    pub fn uniform(model: impl Into<String>) -> Self {
        let model = model.into();
        Self {
            critical: model.clone(),
            positive: model.clone(),
            synthesis: model.clone(),
            chat: model,
        }
    }

    pub fn for_role(&self, role: AgentRole) -> &str {
        match role {
            AgentRole::CriticalAnalyst => &self.critical,
            AgentRole::PositiveAdvocate => &self.positive,
            AgentRole::Synthesizer => &self.synthesis,
            AgentRole::Assistant => &self.chat,
        }
    }
}

// ============================================================================
// PANEL ORCHESTRATOR
// ============================================================================

#[derive(Clone)]
struct Pipeline {
    backend: Option<Arc<dyn CompletionBackend>>,
    models: AgentModels,
    timeout: Duration,
    runner: FanOutRunner,
}

/// Runs the critical and positive agents side by side, then the synthesizer
/// over their combined output.
pub struct PanelOrchestrator {
    pipeline: Pipeline,
    request_manager: Arc<RequestManager>,
}

impl PanelOrchestrator {
    /// `backend` is `None` when no model service is configured; requests then
    /// fail with a single error record.
    pub fn new(
        backend: Option<Arc<dyn CompletionBackend>>,
        models: AgentModels,
        timeout: Duration,
    ) -> Self {
        Self {
            pipeline: Pipeline {
                backend,
                models,
                timeout,
                runner: FanOutRunner::new(),
            },
            request_manager: Arc::new(RequestManager::new()),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.pipeline.backend.is_some()
    }

    pub fn backend_name(&self) -> Option<&'static str> {
        self.pipeline.backend.as_ref().map(|b| b.name())
    }

    /// Starts a multi-agent request and returns its id with the event
    /// receiver. Dropping the receiver cancels the request.
    pub async fn handle_request_stream(
        &self,
        prompt: String,
    ) -> (String, mpsc::Receiver<StreamEvent>) {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);

        let request_id = Uuid::now_v7().to_string();
        let token = self.request_manager.register(request_id.clone()).await;
        let request_manager = self.request_manager.clone();
        let pipeline = self.pipeline.clone();
        let id = request_id.clone();

        tokio::spawn(async move {
            log::info!("▶️  Multi-agent request {} started", id);

            let run = async {
                let outcome = tokio::select! {
                    result = Self::process_request(&pipeline, &prompt, &tx) => result,
                    _ = token.cancelled() => Err(OrchestrationError::Cancelled),
                    _ = tx.closed() => Err(OrchestrationError::Disconnected),
                };

                match outcome {
                    Ok(()) => {
                        let _ = tx.send(StreamEvent::Complete).await;
                        log::info!("✅ Multi-agent request {} completed", id);
                    }
                    Err(OrchestrationError::Disconnected) => {
                        log::info!("🔌 Client left request {}, generation stopped", id);
                    }
                    Err(e) => {
                        log::error!("❌ Multi-agent request {} failed: {}", id, e);
                        let _ = tx
                            .send(StreamEvent::Error {
                                message: e.to_string(),
                                detail: e.detail(),
                            })
                            .await;
                    }
                }
            };

            if AssertUnwindSafe(run).catch_unwind().await.is_err() {
                log::error!("💥 Multi-agent request {} panicked", id);
                let _ = tx.send(StreamEvent::error(INTERNAL_ERROR_MESSAGE)).await;
            }

            request_manager.unregister(&id).await;
        });

        (request_id, rx)
    }

    async fn process_request(
        pipeline: &Pipeline,
        prompt: &str,
        event_tx: &mpsc::Sender<StreamEvent>,
    ) -> Result<(), OrchestrationError> {
        let backend = pipeline
            .backend
            .clone()
            .ok_or(OrchestrationError::NotConfigured)?;

        emit(event_tx, StreamEvent::Start).await?;

        let tasks = AgentRole::FAN_OUT
            .iter()
            .map(|role| {
                AgentTask::new(
                    backend.clone(),
                    *role,
                    pipeline.models.for_role(*role),
                    prompt,
                    pipeline.timeout,
                )
            })
            .collect();

        let mut fan_out = pipeline.runner.run(tasks)?;
        let mut results = None;
        while let Some(event) = fan_out.next().await {
            match event {
                FanOutEvent::Delta(delta) => emit(event_tx, StreamEvent::AgentDelta(delta)).await?,
                FanOutEvent::AgentsComplete {
                    results: aggregated,
                    failures,
                } => {
                    for failure in &failures {
                        log::warn!("Agent {} contributed nothing: {}", failure.agent, failure.error);
                    }
                    results = Some(aggregated);
                }
            }
        }
        let results = results.ok_or(OrchestrationError::FanOutIncomplete)?;

        emit(event_tx, StreamEvent::AgentsComplete).await?;
        emit(event_tx, StreamEvent::SynthesisStart).await?;

        let synthesis = SynthesisStage::new(
            backend,
            pipeline.models.for_role(AgentRole::Synthesizer),
            pipeline.timeout,
        );
        let mut deltas = synthesis.run(prompt, &results);
        while let Some(delta) = deltas.next().await {
            let delta = delta.map_err(OrchestrationError::Synthesis)?;
            emit(event_tx, StreamEvent::SynthesisDelta(delta)).await?;
        }

        Ok(())
    }

    /// Single-agent chat completion.
    pub fn chat_stream(&self, prompt: &str) -> Result<TextStream, OrchestrationError> {
        let backend = self
            .pipeline
            .backend
            .clone()
            .ok_or(OrchestrationError::NotConfigured)?;

        let task = AgentTask::new(
            backend,
            AgentRole::Assistant,
            self.pipeline.models.for_role(AgentRole::Assistant),
            prompt,
            self.pipeline.timeout,
        );
        Ok(task.into_stream())
    }

    pub async fn cancel_request(&self, request_id: &str) -> bool {
        self.request_manager.cancel(request_id).await
    }

    pub async fn active_requests(&self) -> usize {
        self.request_manager.active_count().await
    }
}

async fn emit(
    tx: &mpsc::Sender<StreamEvent>,
    event: StreamEvent,
) -> Result<(), OrchestrationError> {
    tx.send(event)
        .await
        .map_err(|_| OrchestrationError::Disconnected)
}

// ============================================================================
// TESTS
// ============================================================================
