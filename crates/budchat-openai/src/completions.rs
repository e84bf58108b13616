// Chat Completions Transport
//
// Normalizes OpenAI's chat-completion SSE chunks into the internal stream
// vocabulary. Tool-call arguments arrive as string fragments keyed by a
// choice-local index; they are accumulated here and finalized when the
// chunk carrying `finish_reason: "tool_calls"` lands.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use budchat_core::{
    ChatConfig, ChatError, ChatTransport, Event, NormalizedStream, ResponseMetadata, Result,
    StreamEvent,
};
use eventsource_stream::Eventsource;
use futures::{stream, StreamExt};
use reqwest::Client;
use serde_json::json;
use tracing::debug;

use crate::types::{events_to_messages, tools_to_wire, CompletionsRequest, StreamChunk};

const COMPLETIONS_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// One tool call being accumulated across chunks
#[derive(Debug, Clone, Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
    announced: bool,
}

/// Mutable scan state shared by the chunk mapper
#[derive(Debug, Default)]
struct ScanState {
    calls: Vec<PartialCall>,
    next_sequence: u64,
    finished: bool,
    model: Option<String>,
}

/// Chat Completions streaming transport
pub struct CompletionsTransport {
    client: Client,
    api_key: String,
    api_url: String,
}

impl CompletionsTransport {
    /// Requires the OPENAI_API_KEY environment variable
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| ChatError::transport("OPENAI_API_KEY environment variable not set"))?;
        Ok(Self::new(api_key))
    }

    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            api_url: COMPLETIONS_API_URL.to_string(),
        }
    }

    /// Point the transport at a non-default endpoint (proxies, tests)
    pub fn with_base_url(api_key: impl Into<String>, api_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            api_url: api_url.into(),
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }
}

/// Map one SSE frame to zero or more normalized events
fn map_frame(data: &str, state: &Arc<Mutex<ScanState>>, fallback_model: &str) -> Vec<StreamEvent> {
    let mut state = state.lock().expect("completions scan state poisoned");

    if data == "[DONE]" {
        // the finish_reason chunk usually precedes [DONE]; tolerate streams
        // that skip it
        if state.finished {
            return Vec::new();
        }
        state.finished = true;
        let model = state.model.clone().or_else(|| Some(fallback_model.to_string()));
        return vec![StreamEvent::StreamEnd(ResponseMetadata::complete(0, model))];
    }

    let chunk: StreamChunk = match serde_json::from_str(data) {
        Ok(chunk) => chunk,
        Err(error) => {
            debug!(%error, "unparseable completions chunk");
            return vec![StreamEvent::Unknown {
                frame: data.to_string(),
            }];
        }
    };
    if let Some(model) = chunk.model {
        state.model = Some(model);
    }

    let Some(choice) = chunk.choices.first() else {
        return Vec::new();
    };

    let mut out = Vec::new();

    if let Some(tool_calls) = &choice.delta.tool_calls {
        for tc in tool_calls {
            let idx = tc.index as usize;
            while state.calls.len() <= idx {
                state.calls.push(PartialCall::default());
            }
            if let Some(id) = &tc.id {
                state.calls[idx].id = id.clone();
            }
            if let Some(function) = &tc.function {
                if let Some(name) = &function.name {
                    state.calls[idx].name = name.clone();
                }
                if let Some(args) = &function.arguments {
                    state.calls[idx].arguments.push_str(args);
                    if state.calls[idx].announced {
                        out.push(StreamEvent::ToolArgumentsDelta {
                            id: state.calls[idx].id.clone(),
                            delta: args.clone(),
                        });
                    }
                }
            }
            // announce once id and name are both known
            if !state.calls[idx].announced
                && !state.calls[idx].id.is_empty()
                && !state.calls[idx].name.is_empty()
            {
                state.calls[idx].announced = true;
                state.next_sequence += 1;
                out.push(StreamEvent::ToolStart {
                    id: state.calls[idx].id.clone(),
                    name: state.calls[idx].name.clone(),
                    output_index: tc.index,
                    sequence_number: state.next_sequence,
                });
                // arguments that arrived in the announcing chunk
                if !state.calls[idx].arguments.is_empty() {
                    out.push(StreamEvent::ToolArgumentsDelta {
                        id: state.calls[idx].id.clone(),
                        delta: state.calls[idx].arguments.clone(),
                    });
                }
            }
        }
    }

    if let Some(content) = &choice.delta.content {
        if !content.is_empty() {
            out.push(StreamEvent::Token(content.clone()));
        }
    }

    if let Some(finish_reason) = &choice.finish_reason {
        if finish_reason == "tool_calls" {
            for call in state.calls.drain(..) {
                let args = serde_json::from_str(&call.arguments).unwrap_or(json!({}));
                out.push(StreamEvent::ToolFinalized {
                    id: call.id,
                    name: call.name,
                    args,
                });
            }
        }
        state.finished = true;
        let model = state.model.clone().or_else(|| Some(fallback_model.to_string()));
        out.push(StreamEvent::StreamEnd(ResponseMetadata::complete(0, model)));
    }

    out
}

#[async_trait]
impl ChatTransport for CompletionsTransport {
    async fn stream_chat(&self, events: &[Event], config: &ChatConfig) -> Result<NormalizedStream> {
        let request = CompletionsRequest {
            model: config.model.clone(),
            messages: events_to_messages(events, config),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            stream: true,
            tools: tools_to_wire(&config.tools),
        };

        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| ChatError::transport(format!("completions request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::transport(format!(
                "completions request failed with status {status}: {body}"
            )));
        }

        let state = Arc::new(Mutex::new(ScanState::default()));
        let model = config.model.clone();

        // one SSE frame can carry several normalized events (a tool-call
        // announcement plus its first argument fragment), hence the flatten
        let normalized = response
            .bytes_stream()
            .eventsource()
            .map(move |frame| match frame {
                Ok(frame) => map_frame(&frame.data, &state, &model)
                    .into_iter()
                    .map(Ok)
                    .collect::<Vec<_>>(),
                Err(e) => vec![Ok(StreamEvent::Error(format!("stream error: {e}")))],
            })
            .flat_map(stream::iter);

        Ok(Box::pin(normalized))
    }
}
