use futures::StreamExt;
use futures::stream::BoxStream;
use rig::client::Nothing;
use rig::completion::Prompt;
use rig::prelude::CompletionClient;
use rig::providers::ollama;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::agents::{AgentRole, LineBuffer};
use crate::error::AgentError;

/// Text increments of one generation call, ending after the first error.
pub type TextStream = BoxStream<'static, Result<String, AgentError>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub role: AgentRole,
    pub model: String,
    pub system: String,
    pub prompt: String,
}

/// A model service able to stream one completion.
pub trait CompletionBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn stream_completion(&self, request: CompletionRequest) -> TextStream;
}

// ============================================================================
// Ollama streaming chat
// ============================================================================

#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<OllamaChatMessage>,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaChatMessage {
    role: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct OllamaChatStreamLine {
    #[serde(default)]
    message: Option<OllamaChatMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

/// One parsed line of an Ollama chat stream.
#[derive(Debug, PartialEq, Eq)]
enum ChatLine {
    Text(String),
    Done(String),
}

fn parse_chat_line(line: &str) -> Result<ChatLine, AgentError> {
    let parsed: OllamaChatStreamLine =
        serde_json::from_str(line).map_err(|e| AgentError::Protocol(e.to_string()))?;

    if let Some(error) = parsed.error {
        return Err(AgentError::Model {
            status: 200,
            message: error,
        });
    }

    let text = parsed.message.map(|m| m.content).unwrap_or_default();
    if parsed.done {
        Ok(ChatLine::Done(text))
    } else {
        Ok(ChatLine::Text(text))
    }
}

#[derive(Debug, Clone)]
pub struct OllamaBackend {
    client: reqwest::Client,
    base_url: String,
}

impl OllamaBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }
}

impl CompletionBackend for OllamaBackend {
    fn name(&self) -> &'static str {
        "ollama"
    }

    fn stream_completion(&self, request: CompletionRequest) -> TextStream {
        let client = self.client.clone();
        let url = self.chat_url();

        Box::pin(async_stream::stream! {
            let body = OllamaChatRequest {
                model: request.model,
                messages: vec![
                    OllamaChatMessage { role: "system".to_string(), content: request.system },
                    OllamaChatMessage { role: "user".to_string(), content: request.prompt },
                ],
                stream: true,
            };

            let response = match client.post(&url).json(&body).send().await {
                Ok(response) => response,
                Err(e) => {
                    yield Err(AgentError::Unavailable(e.to_string()));
                    return;
                }
            };

            let status = response.status();
            if !status.is_success() {
                let message = response.text().await.unwrap_or_default();
                yield Err(AgentError::Model { status: status.as_u16(), message });
                return;
            }

            let mut bytes = response.bytes_stream();
            let mut lines = LineBuffer::new();
            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(AgentError::Transport(e.to_string()));
                        return;
                    }
                };

                for line in lines.push(&chunk) {
                    match parse_chat_line(&line) {
                        Ok(ChatLine::Text(text)) => {
                            if !text.is_empty() {
                                yield Ok(text);
                            }
                        }
                        Ok(ChatLine::Done(text)) => {
                            if !text.is_empty() {
                                yield Ok(text);
                            }
                            return;
                        }
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }
            }

            // The body ended without a `done` line.
            match lines.finish().map(|line| parse_chat_line(&line)) {
                Some(Ok(ChatLine::Text(text))) | Some(Ok(ChatLine::Done(text))) => {
                    if !text.is_empty() {
                        yield Ok(text);
                    }
                }
                Some(Err(e)) => {
                    yield Err(e);
                }
                None => {}
            }
        })
    }
}

// ============================================================================
// Rig one-shot agent
// ============================================================================

const CHUNK_CHARS: usize = 20;
const CHUNK_DELAY: Duration = Duration::from_millis(20);

/// Runs a rig agent to completion and re-emits the answer in small chunks.
#[derive(Clone)]
pub struct RigBackend {
    client: ollama::Client,
}

impl RigBackend {
    pub fn new(base_url: &str) -> Result<Self, AgentError> {
        let client = ollama::Client::builder()
            .api_key(Nothing)
            .base_url(base_url)
            .build()
            .map_err(|e| AgentError::Unavailable(e.to_string()))?;
        Ok(Self { client })
    }
}

impl CompletionBackend for RigBackend {
    fn name(&self) -> &'static str {
        "rig"
    }

    fn stream_completion(&self, request: CompletionRequest) -> TextStream {
        let client = self.client.clone();

        Box::pin(async_stream::stream! {
            let agent = client
                .agent(&request.model)
                .preamble(&request.system)
                .build();

            let response = match agent.prompt(request.prompt.as_str()).await {
                Ok(response) => response,
                Err(e) => {
                    yield Err(AgentError::Unavailable(e.to_string()));
                    return;
                }
            };

            // Send response in chunks for streaming effect
            let chars: Vec<char> = response.chars().collect();
            for chunk in chars.chunks(CHUNK_CHARS) {
                yield Ok(chunk.iter().collect::<String>());
                tokio::time::sleep(CHUNK_DELAY).await;
            }
        })
    }
}
