//! Completion streaming task

use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use voxbridge_foundation::LlmSettings;

use crate::types::{ChatMessage, ChatRole, LlmEvent};

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Process-wide completion client; per-call state lives in the session.
#[derive(Clone)]
pub struct LlmStreamer {
    client: reqwest::Client,
    settings: LlmSettings,
}

impl LlmStreamer {
    pub fn new(client: reqwest::Client, settings: LlmSettings) -> Self {
        Self { client, settings }
    }

    /// Start one streaming completion. Events are posted through
    /// `on_event` from a spawned task; `cancel` aborts the stream
    /// cooperatively and surfaces as `Failed { aborted: true }`.
    pub fn stream_chat(
        &self,
        system_prompt: &str,
        history: &[ChatMessage],
        user_message: &str,
        cancel: CancellationToken,
        on_event: impl Fn(LlmEvent) + Send + Sync + 'static,
    ) -> JoinHandle<()> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(system_prompt));
        messages.extend(history.iter().cloned());
        if !user_message.is_empty() {
            // The greeting turn streams with an empty user message and
            // relies on the system prompt alone.
            if !matches!(messages.last(), Some(m) if m.role == ChatRole::User && m.content == user_message)
            {
                messages.push(ChatMessage::user(user_message));
            }
        }

        let client = self.client.clone();
        let settings = self.settings.clone();

        tokio::spawn(async move {
            let outcome = Self::run(client, settings, messages, cancel, &on_event).await;
            if let Err(event) = outcome {
                on_event(event);
            }
        })
    }

    async fn run(
        client: reqwest::Client,
        settings: LlmSettings,
        messages: Vec<ChatMessage>,
        cancel: CancellationToken,
        on_event: &(impl Fn(LlmEvent) + Send + Sync),
    ) -> Result<(), LlmEvent> {
        let body = json!({
            "model": settings.model,
            "temperature": settings.temperature,
            "stream": true,
            "messages": messages,
        });

        let request = client
            .post(&settings.endpoint)
            .bearer_auth(&settings.api_key)
            .json(&body);

        let response = tokio::select! {
            result = request.send() => result.map_err(|err| LlmEvent::Failed {
                message: err.to_string(),
                aborted: false,
            })?,
            _ = cancel.cancelled() => {
                return Err(LlmEvent::Failed { message: "aborted".into(), aborted: true });
            }
        };

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmEvent::Failed {
                message: format!("{status}: {body}"),
                aborted: false,
            });
        }

        let mut byte_stream = response.bytes_stream();
        let mut line_buf = String::new();
        let mut full = String::new();

        loop {
            let chunk = tokio::select! {
                chunk = byte_stream.next() => chunk,
                _ = cancel.cancelled() => {
                    debug!("completion stream cancelled mid-flight");
                    return Err(LlmEvent::Failed { message: "aborted".into(), aborted: true });
                }
            };

            let bytes = match chunk {
                Some(Ok(bytes)) => bytes,
                Some(Err(err)) => {
                    return Err(LlmEvent::Failed {
                        message: err.to_string(),
                        aborted: false,
                    });
                }
                None => break,
            };

            line_buf.push_str(&String::from_utf8_lossy(&bytes));

            while let Some(pos) = line_buf.find('\n') {
                let line: String = line_buf.drain(..=pos).collect();
                let line = line.trim();
                let Some(data) = line.strip_prefix("data:") else {
                    continue;
                };
                let data = data.trim();
                if data == "[DONE]" {
                    on_event(LlmEvent::Complete { full: full.clone() });
                    return Ok(());
                }
                match serde_json::from_str::<StreamChunk>(data) {
                    Ok(chunk) => {
                        let token = chunk
                            .choices
                            .into_iter()
                            .next()
                            .and_then(|c| c.delta.content);
                        if let Some(token) = token {
                            if !token.is_empty() {
                                full.push_str(&token);
                                on_event(LlmEvent::Token(token));
                            }
                        }
                    }
                    Err(err) => {
                        warn!(%err, "unparseable completion chunk dropped");
                    }
                }
            }
        }

        // Stream ended without the end sentinel; treat what arrived as
        // the complete response.
        on_event(LlmEvent::Complete { full });
        Ok(())
    }
}
