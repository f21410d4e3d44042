//! Scripted completion backend for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::agents::backend::{CompletionBackend, CompletionRequest, TextStream};
use crate::agents::AgentRole;
use crate::error::AgentError;

#[derive(Debug, Clone)]
pub enum Step {
    Text(String),
    Fail(AgentError),
    Sleep(Duration),
    /// Never yields again.
    Hang,
    /// Panics inside the stream.
    Panic,
}

impl Step {
    pub fn text(text: &str) -> Self {
        Self::Text(text.to_string())
    }

    pub fn fail(message: &str) -> Self {
        Self::Fail(AgentError::Model {
            status: 500,
            message: message.to_string(),
        })
    }

    pub fn unavailable() -> Self {
        Self::Fail(AgentError::Unavailable("connection refused".to_string()))
    }

    pub fn sleep_ms(ms: u64) -> Self {
        Self::Sleep(Duration::from_millis(ms))
    }
}

struct DropCounter(Arc<AtomicUsize>);

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Replays a fixed script per role. Roles without a script finish at once
/// with no output.
#[derive(Default)]
pub struct ScriptedBackend {
    scripts: HashMap<AgentRole, Vec<Step>>,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
    dropped: Arc<AtomicUsize>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(mut self, role: AgentRole, steps: Vec<Step>) -> Self {
        self.scripts.insert(role, steps);
        self
    }

    /// Every request received so far, in call order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_for(&self, role: AgentRole) -> Option<CompletionRequest> {
        self.requests().into_iter().find(|r| r.role == role)
    }

    /// Number of completion streams that have been dropped.
    pub fn dropped_streams(&self) -> usize {
        self.dropped.load(Ordering::SeqCst)
    }
}

impl CompletionBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn stream_completion(&self, request: CompletionRequest) -> TextStream {
        let steps = self.scripts.get(&request.role).cloned().unwrap_or_default();
        self.requests.lock().unwrap().push(request);
        let guard = DropCounter(self.dropped.clone());

        Box::pin(async_stream::stream! {
            let _guard = guard;
            for step in steps {
                match step {
                    Step::Text(text) => {
                        yield Ok(text);
                        tokio::task::yield_now().await;
                    }
                    Step::Fail(e) => {
                        yield Err(e);
                    }
                    Step::Sleep(duration) => tokio::time::sleep(duration).await,
                    Step::Hang => futures::future::pending::<()>().await,
                    Step::Panic => panic!("scripted backend panic"),
                }
            }
        })
    }
}
