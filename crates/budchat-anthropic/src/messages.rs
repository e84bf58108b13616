// Anthropic Messages Transport
//
// Normalizes Messages API server-sent events into the internal stream
// vocabulary. Content blocks arrive strictly sequentially, one open block
// at a time: text blocks map to tokens, tool_use blocks accumulate
// input_json_delta fragments until content_block_stop, thinking blocks map
// to reasoning events with a single summary part.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use budchat_core::{
    ChatConfig, ChatError, ChatTransport, Event, NormalizedStream, ResponseMetadata, Result, Role,
    Segment, StreamEvent,
};
use eventsource_stream::Eventsource;
use futures::{stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

const MESSAGES_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Messages API streaming transport
#[derive(Clone)]
pub struct MessagesTransport {
    client: Client,
    api_key: String,
    api_url: String,
}

impl MessagesTransport {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            api_url: MESSAGES_API_URL.to_string(),
        }
    }

    /// Requires the ANTHROPIC_API_KEY environment variable
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| ChatError::transport("ANTHROPIC_API_KEY environment variable not set"))?;
        Ok(Self::new(api_key))
    }

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

impl std::fmt::Debug for MessagesTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessagesTransport")
            .field("api_url", &self.api_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

// ============================================================================
// Request conversion
// ============================================================================

/// Split the event log into (system prompt, wire messages)
///
/// System events become the top-level `system` field; a tool event becomes
/// a user message carrying tool_result blocks, which is how this wire
/// returns tool output to the model.
fn convert_events(events: &[Event], config: &ChatConfig) -> (Option<String>, Vec<WireMessage>) {
    let mut system = config.system_prompt.clone();
    let mut messages = Vec::new();

    for event in events {
        match event.role {
            Role::System => {
                system = Some(event.text());
            }
            Role::Tool => {
                let blocks: Vec<ContentBlock> = event
                    .segments
                    .iter()
                    .filter_map(|s| match s {
                        Segment::ToolResult { id, output, error } => Some(ContentBlock::ToolResult {
                            tool_use_id: id.clone(),
                            content: match error {
                                Some(error) => error.clone(),
                                None => output.to_string(),
                            },
                            is_error: error.is_some().then_some(true),
                        }),
                        _ => None,
                    })
                    .collect();
                if !blocks.is_empty() {
                    messages.push(WireMessage {
                        role: "user".to_string(),
                        content: blocks,
                    });
                }
            }
            Role::Assistant => {
                let mut blocks = Vec::new();
                for segment in &event.segments {
                    match segment {
                        Segment::Text { text, .. } if !text.is_empty() => {
                            blocks.push(ContentBlock::Text { text: text.clone() });
                        }
                        Segment::ToolCall { id, name, args, .. } => {
                            blocks.push(ContentBlock::ToolUse {
                                id: id.clone(),
                                name: name.clone(),
                                input: args.clone(),
                            });
                        }
                        // reasoning is not replayed to the model
                        _ => {}
                    }
                }
                if !blocks.is_empty() {
                    messages.push(WireMessage {
                        role: "assistant".to_string(),
                        content: blocks,
                    });
                }
            }
            Role::User => {
                messages.push(WireMessage {
                    role: "user".to_string(),
                    content: vec![ContentBlock::Text { text: event.text() }],
                });
            }
        }
    }

    (system, messages)
}

// ============================================================================
// Stream normalization
// ============================================================================

/// The content block currently streaming, if any
#[derive(Debug)]
enum OpenBlock {
    Text,
    Tool {
        id: String,
        name: String,
        arguments: String,
    },
    Thinking {
        id: String,
        text: String,
    },
}

#[derive(Debug, Default)]
struct ScanState {
    open: Option<OpenBlock>,
    next_sequence: u64,
    model: Option<String>,
}

fn map_frame(
    event_name: &str,
    data: &str,
    state: &Arc<Mutex<ScanState>>,
    fallback_model: &str,
) -> Vec<StreamEvent> {
    let mut state = state.lock().expect("messages scan state poisoned");

    match event_name {
        "message_start" => {
            if let Ok(start) = serde_json::from_str::<MessageStart>(data) {
                state.model = start.message.model;
            }
            Vec::new()
        }

        "content_block_start" => {
            let Ok(frame) = serde_json::from_str::<BlockStart>(data) else {
                return vec![StreamEvent::Unknown {
                    frame: data.to_string(),
                }];
            };
            let output_index = frame.index;
            match frame.content_block {
                BlockInfo::Text { .. } => {
                    state.open = Some(OpenBlock::Text);
                    Vec::new()
                }
                BlockInfo::ToolUse { id, name } => {
                    state.open = Some(OpenBlock::Tool {
                        id: id.clone(),
                        name: name.clone(),
                        arguments: String::new(),
                    });
                    state.next_sequence += 1;
                    vec![StreamEvent::ToolStart {
                        id,
                        name,
                        output_index,
                        sequence_number: state.next_sequence,
                    }]
                }
                BlockInfo::Thinking => {
                    let id = format!("thinking_{output_index}");
                    state.open = Some(OpenBlock::Thinking {
                        id: id.clone(),
                        text: String::new(),
                    });
                    state.next_sequence += 1;
                    vec![StreamEvent::ReasoningStart {
                        id,
                        output_index,
                        sequence_number: state.next_sequence,
                    }]
                }
            }
        }

        "content_block_delta" => {
            let Ok(frame) = serde_json::from_str::<BlockDeltaEvent>(data) else {
                return vec![StreamEvent::Unknown {
                    frame: data.to_string(),
                }];
            };
            match frame.delta {
                BlockDelta::TextDelta { text } => vec![StreamEvent::Token(text)],
                BlockDelta::InputJsonDelta { partial_json } => {
                    if let Some(OpenBlock::Tool { id, arguments, .. }) = state.open.as_mut() {
                        arguments.push_str(&partial_json);
                        vec![StreamEvent::ToolArgumentsDelta {
                            id: id.clone(),
                            delta: partial_json,
                        }]
                    } else {
                        Vec::new()
                    }
                }
                BlockDelta::ThinkingDelta { thinking } => {
                    if let Some(OpenBlock::Thinking { id, text }) = state.open.as_mut() {
                        text.push_str(&thinking);
                        vec![StreamEvent::ReasoningDelta {
                            id: id.clone(),
                            summary_index: 0,
                            text: thinking,
                        }]
                    } else {
                        Vec::new()
                    }
                }
                // cryptographic signature for the thinking block
                BlockDelta::SignatureDelta => Vec::new(),
            }
        }

        "content_block_stop" => match state.open.take() {
            Some(OpenBlock::Tool {
                id,
                name,
                arguments,
            }) => {
                let args = serde_json::from_str(&arguments).unwrap_or(json!({}));
                vec![StreamEvent::ToolFinalized { id, name, args }]
            }
            Some(OpenBlock::Thinking { id, text }) => vec![StreamEvent::ReasoningComplete {
                id,
                combined_text: Some(text),
            }],
            Some(OpenBlock::Text) | None => Vec::new(),
        },

        // stop_reason arrives here; tool calls were already finalized at
        // their content_block_stop, so there is nothing left to emit
        "message_delta" => Vec::new(),

        "message_stop" => {
            let model = state
                .model
                .clone()
                .or_else(|| Some(fallback_model.to_string()));
            vec![StreamEvent::StreamEnd(ResponseMetadata::complete(0, model))]
        }

        "ping" => Vec::new(),

        "error" => vec![StreamEvent::Error(format!("messages stream error: {data}"))],

        other => {
            debug!(frame = other, "unrecognized messages frame");
            vec![StreamEvent::Unknown {
                frame: other.to_string(),
            }]
        }
    }
}

#[async_trait]
impl ChatTransport for MessagesTransport {
    async fn stream_chat(&self, events: &[Event], config: &ChatConfig) -> Result<NormalizedStream> {
        let (system, messages) = convert_events(events, config);

        let tools: Option<Vec<WireTool>> = (!config.tools.is_empty()).then(|| {
            config
                .tools
                .iter()
                .map(|tool| WireTool {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    input_schema: tool.parameters.clone(),
                })
                .collect()
        });

        let request = MessagesRequest {
            model: config.model.clone(),
            messages,
            // max_tokens is mandatory on this wire
            max_tokens: config.max_tokens.unwrap_or(4096).max(1),
            temperature: config.temperature,
            system,
            stream: true,
            tools,
            thinking: config
                .reasoning_effort
                .as_deref()
                .and_then(Thinking::from_effort),
        };

        let response = self
            .client
            .post(&self.api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| ChatError::transport(format!("messages request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::transport(format!(
                "messages request failed with status {status}: {body}"
            )));
        }

        let state = Arc::new(Mutex::new(ScanState::default()));
        let model = config.model.clone();

        let normalized = response
            .bytes_stream()
            .eventsource()
            .map(move |frame| match frame {
                Ok(frame) => map_frame(&frame.event, &frame.data, &state, &model)
                    .into_iter()
                    .map(Ok)
                    .collect::<Vec<_>>(),
                Err(e) => vec![Ok(StreamEvent::Error(format!("stream error: {e}")))],
            })
            .flat_map(stream::iter);

        Ok(Box::pin(normalized))
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    messages: Vec<WireMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking: Option<Thinking>,
}

/// Extended thinking configuration
#[derive(Debug, Serialize)]
struct Thinking {
    r#type: String,
    budget_tokens: u32,
}

impl Thinking {
    fn from_effort(effort: &str) -> Option<Self> {
        let budget = match effort.to_lowercase().as_str() {
            "low" => 1024,
            "medium" => 4096,
            "high" => 16384,
            "xhigh" => 32768,
            _ => return None,
        };
        Some(Self {
            r#type: "enabled".to_string(),
            budget_tokens: budget,
        })
    }
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
}

#[derive(Debug, Serialize)]
struct WireTool {
    name: String,
    description: String,
    input_schema: Value,
}

// Streaming frame types

#[derive(Debug, Deserialize)]
struct MessageStart {
    message: MessageInfo,
}

#[derive(Debug, Deserialize)]
struct MessageInfo {
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BlockStart {
    index: u32,
    content_block: BlockInfo,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
#[allow(dead_code)]
enum BlockInfo {
    #[serde(rename = "text")]
    Text {
        #[serde(default)]
        text: String,
    },
    #[serde(rename = "tool_use")]
    ToolUse { id: String, name: String },
    #[serde(rename = "thinking")]
    Thinking,
}

#[derive(Debug, Deserialize)]
struct BlockDeltaEvent {
    delta: BlockDelta,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum BlockDelta {
    #[serde(rename = "text_delta")]
    TextDelta { text: String },
    #[serde(rename = "input_json_delta")]
    InputJsonDelta { partial_json: String },
    #[serde(rename = "thinking_delta")]
    ThinkingDelta { thinking: String },
    #[serde(rename = "signature_delta")]
    SignatureDelta,
}
