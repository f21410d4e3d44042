use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::agents::backend::{CompletionBackend, CompletionRequest, TextStream};
use crate::agents::AgentRole;
use crate::error::AgentError;

/// One text-generation call bound to a role.
///
/// The stream is lazy (nothing is sent to the model until it is first
/// polled), cannot be restarted, and ends after the first error. The whole
/// call, not each increment, is bounded by `timeout`.
pub struct AgentTask {
    request: CompletionRequest,
    backend: Arc<dyn CompletionBackend>,
    timeout: Duration,
}

impl AgentTask {
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        role: AgentRole,
        model: impl Into<String>,
        prompt: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            request: CompletionRequest {
                role,
                model: model.into(),
                system: role.instructions().to_string(),
                prompt: prompt.into(),
            },
            backend,
            timeout,
        }
    }

    pub fn role(&self) -> AgentRole {
        self.request.role
    }

    pub fn into_stream(self) -> TextStream {
        let Self {
            request,
            backend,
            timeout,
        } = self;
        let role = request.role;

        Box::pin(async_stream::stream! {
            let deadline = Instant::now() + timeout;
            let mut inner = backend.stream_completion(request);

            loop {
                match tokio::time::timeout_at(deadline, inner.next()).await {
                    Ok(Some(Ok(text))) => {
                        yield Ok(text);
                    }
                    Ok(Some(Err(e))) => {
                        log::warn!("Agent {} failed: {}", role, e);
                        yield Err(e);
                        break;
                    }
                    Ok(None) => break,
                    Err(_) => {
                        log::warn!("Agent {} timed out after {:?}", role, timeout);
                        yield Err(AgentError::Timeout(timeout));
                        break;
                    }
                }
            }
        })
    }
}
