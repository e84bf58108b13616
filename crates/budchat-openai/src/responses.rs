// Responses Transport
//
// Normalizes the typed semantic events of OpenAI's Responses API. Unlike
// Chat Completions, this wire announces output items explicitly
// (function_call, reasoning, web_search_call, code_interpreter_call) and
// streams reasoning summaries as indexed parts, so most frames map
// one-to-one onto the internal vocabulary.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use budchat_core::{
    BuiltinCallKind, BuiltinCallStatus, ChatConfig, ChatError, ChatTransport, Event,
    NormalizedStream, ResponseMetadata, Result, Role, Segment, StreamEvent,
};
use eventsource_stream::Eventsource;
use futures::{stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::types::tools_to_wire;

const RESPONSES_API_URL: &str = "https://api.openai.com/v1/responses";

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Clone, Serialize)]
struct ResponsesRequest {
    model: String,
    input: Vec<InputItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    instructions: Option<String>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ResponsesTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning: Option<ReasoningParams>,
}

/// Function tools on this wire are flat, not nested under `function`
#[derive(Debug, Clone, Serialize)]
struct ResponsesTool {
    r#type: String,
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Clone, Serialize)]
struct ReasoningParams {
    effort: String,
    summary: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum InputItem {
    Message { role: String, content: String },
    FunctionCall {
        call_id: String,
        name: String,
        arguments: String,
    },
    FunctionCallOutput { call_id: String, output: String },
}

#[derive(Debug, Clone, Deserialize)]
struct ResponsesFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    item_id: Option<String>,
    #[serde(default)]
    output_index: Option<u32>,
    #[serde(default)]
    sequence_number: Option<u64>,
    #[serde(default)]
    summary_index: Option<u32>,
    #[serde(default)]
    delta: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
    #[serde(default)]
    item: Option<OutputItem>,
    #[serde(default)]
    response: Option<ResponseObject>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct OutputItem {
    #[serde(rename = "type")]
    kind: String,
    id: String,
    #[serde(default)]
    call_id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
    #[serde(default)]
    summary: Vec<SummaryPart>,
    #[serde(default)]
    code: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct SummaryPart {
    text: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ResponseObject {
    #[serde(default)]
    model: Option<String>,
}

// ============================================================================
// Transport
// ============================================================================

/// item_id -> call identity; the argument frames carry only the item id
#[derive(Debug, Default)]
struct ScanState {
    call_identity: HashMap<String, (String, String)>,
    finalized: HashSet<String>,
    next_sequence: u64,
}

/// Responses API streaming transport
pub struct ResponsesTransport {
    client: Client,
    api_key: String,
    api_url: String,
}

impl ResponsesTransport {
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
            api_url: RESPONSES_API_URL.to_string(),
        }
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

/// Flatten the event log into Responses input items
fn events_to_input(events: &[Event]) -> Vec<InputItem> {
    let mut input = Vec::new();
    for event in events {
        for segment in &event.segments {
            match segment {
                Segment::Text { text, .. } if !text.is_empty() => {
                    input.push(InputItem::Message {
                        role: match event.role {
                            Role::System => "system",
                            Role::User => "user",
                            Role::Assistant => "assistant",
                            Role::Tool => "user",
                        }
                        .to_string(),
                        content: text.clone(),
                    });
                }
                Segment::ToolCall { id, name, args, .. } => {
                    input.push(InputItem::FunctionCall {
                        call_id: id.clone(),
                        name: name.clone(),
                        arguments: serde_json::to_string(args).unwrap_or_default(),
                    });
                }
                Segment::ToolResult { id, output, error } => {
                    let output = match error {
                        Some(error) => format!("Error: {error}"),
                        None => output.to_string(),
                    };
                    input.push(InputItem::FunctionCallOutput {
                        call_id: id.clone(),
                        output,
                    });
                }
                // reasoning and builtin-call segments are provider-internal;
                // they are not replayed as input
                _ => {}
            }
        }
    }
    input
}

fn map_frame(data: &str, state: &Arc<Mutex<ScanState>>, fallback_model: &str) -> Vec<StreamEvent> {
    let frame: ResponsesFrame = match serde_json::from_str(data) {
        Ok(frame) => frame,
        Err(error) => {
            debug!(%error, "unparseable responses frame");
            return vec![StreamEvent::Unknown {
                frame: data.to_string(),
            }];
        }
    };

    let mut state = state.lock().expect("responses scan state poisoned");
    let sequence = |state: &mut ScanState, wire: Option<u64>| {
        state.next_sequence = wire.unwrap_or(state.next_sequence + 1);
        state.next_sequence
    };

    match frame.kind.as_str() {
        "response.output_text.delta" => frame
            .delta
            .map(StreamEvent::Token)
            .into_iter()
            .collect(),

        "response.output_item.added" => {
            let Some(item) = frame.item else {
                return Vec::new();
            };
            let output_index = frame.output_index.unwrap_or(0);
            let sequence_number = sequence(&mut state, frame.sequence_number);
            match item.kind.as_str() {
                "function_call" => {
                    let call_id = item.call_id.unwrap_or_else(|| item.id.clone());
                    let name = item.name.unwrap_or_default();
                    state
                        .call_identity
                        .insert(item.id, (call_id.clone(), name.clone()));
                    vec![StreamEvent::ToolStart {
                        id: call_id,
                        name,
                        output_index,
                        sequence_number,
                    }]
                }
                "reasoning" => vec![StreamEvent::ReasoningStart {
                    id: item.id,
                    output_index,
                    sequence_number,
                }],
                "web_search_call" => vec![StreamEvent::BuiltinToolCall {
                    id: item.id,
                    kind: BuiltinCallKind::WebSearch,
                    status: BuiltinCallStatus::InProgress,
                    code: None,
                }],
                "code_interpreter_call" => vec![StreamEvent::BuiltinToolCall {
                    id: item.id,
                    kind: BuiltinCallKind::CodeInterpreter,
                    status: BuiltinCallStatus::InProgress,
                    code: item.code,
                }],
                "message" => Vec::new(),
                other => vec![StreamEvent::Unknown {
                    frame: format!("response.output_item.added:{other}"),
                }],
            }
        }

        "response.function_call_arguments.delta" => {
            let (Some(item_id), Some(delta)) = (frame.item_id, frame.delta) else {
                return Vec::new();
            };
            let id = state
                .call_identity
                .get(&item_id)
                .map(|(call_id, _)| call_id.clone())
                .unwrap_or(item_id);
            vec![StreamEvent::ToolArgumentsDelta { id, delta }]
        }

        "response.function_call_arguments.done" => {
            let Some(item_id) = frame.item_id else {
                return Vec::new();
            };
            let Some((call_id, name)) = state.call_identity.get(&item_id).cloned() else {
                return Vec::new();
            };
            if !state.finalized.insert(call_id.clone()) {
                return Vec::new();
            }
            let args = frame
                .arguments
                .as_deref()
                .and_then(|a| serde_json::from_str(a).ok())
                .unwrap_or(json!({}));
            vec![StreamEvent::ToolFinalized {
                id: call_id,
                name,
                args,
            }]
        }

        "response.reasoning_summary_text.delta" => {
            let (Some(item_id), Some(delta)) = (frame.item_id, frame.delta) else {
                return Vec::new();
            };
            vec![StreamEvent::ReasoningDelta {
                id: item_id,
                summary_index: frame.summary_index.unwrap_or(0),
                text: delta,
            }]
        }

        "response.output_item.done" => {
            let Some(item) = frame.item else {
                return Vec::new();
            };
            match item.kind.as_str() {
                "reasoning" => {
                    let combined = (!item.summary.is_empty()).then(|| {
                        item.summary
                            .iter()
                            .map(|p| p.text.as_str())
                            .collect::<Vec<_>>()
                            .join("\n\n")
                    });
                    vec![StreamEvent::ReasoningComplete {
                        id: item.id,
                        combined_text: combined,
                    }]
                }
                // belt and braces: finalize a call whose arguments.done frame
                // never arrived
                "function_call" => {
                    let call_id = item.call_id.unwrap_or_else(|| item.id.clone());
                    if !state.finalized.insert(call_id.clone()) {
                        return Vec::new();
                    }
                    let args = item
                        .arguments
                        .as_deref()
                        .and_then(|a| serde_json::from_str(a).ok())
                        .unwrap_or(json!({}));
                    vec![StreamEvent::ToolFinalized {
                        id: call_id,
                        name: item.name.unwrap_or_default(),
                        args,
                    }]
                }
                "web_search_call" => vec![StreamEvent::BuiltinToolCall {
                    id: item.id,
                    kind: BuiltinCallKind::WebSearch,
                    status: BuiltinCallStatus::Completed,
                    code: None,
                }],
                "code_interpreter_call" => vec![StreamEvent::BuiltinToolCall {
                    id: item.id,
                    kind: BuiltinCallKind::CodeInterpreter,
                    status: BuiltinCallStatus::Completed,
                    code: item.code,
                }],
                _ => Vec::new(),
            }
        }

        "response.code_interpreter_call_code.delta" => {
            let (Some(item_id), Some(delta)) = (frame.item_id, frame.delta) else {
                return Vec::new();
            };
            vec![StreamEvent::BuiltinToolCall {
                id: item_id,
                kind: BuiltinCallKind::CodeInterpreter,
                status: BuiltinCallStatus::InProgress,
                code: Some(delta),
            }]
        }

        "response.web_search_call.in_progress" | "response.web_search_call.searching" => frame
            .item_id
            .map(|id| StreamEvent::BuiltinToolCall {
                id,
                kind: BuiltinCallKind::WebSearch,
                status: BuiltinCallStatus::InProgress,
                code: None,
            })
            .into_iter()
            .collect(),

        "response.web_search_call.completed" => frame
            .item_id
            .map(|id| StreamEvent::BuiltinToolCall {
                id,
                kind: BuiltinCallKind::WebSearch,
                status: BuiltinCallStatus::Completed,
                code: None,
            })
            .into_iter()
            .collect(),

        "response.completed" => {
            let model = frame
                .response
                .and_then(|r| r.model)
                .or_else(|| Some(fallback_model.to_string()));
            vec![StreamEvent::StreamEnd(ResponseMetadata::complete(0, model))]
        }

        "response.incomplete" => vec![StreamEvent::StreamEnd(ResponseMetadata::incomplete(0))],

        "response.failed" | "error" => vec![StreamEvent::Error(
            frame.message.unwrap_or_else(|| "response failed".to_string()),
        )],

        // recognized bookkeeping frames with nothing to contribute
        "response.created"
        | "response.in_progress"
        | "response.output_text.done"
        | "response.content_part.added"
        | "response.content_part.done"
        | "response.reasoning_summary_part.added"
        | "response.reasoning_summary_part.done"
        | "response.reasoning_summary_text.done" => Vec::new(),

        other => vec![StreamEvent::Unknown {
            frame: other.to_string(),
        }],
    }
}

#[async_trait]
impl ChatTransport for ResponsesTransport {
    async fn stream_chat(&self, events: &[Event], config: &ChatConfig) -> Result<NormalizedStream> {
        let tools = tools_to_wire(&config.tools).map(|tools| {
            tools
                .into_iter()
                .map(|t| ResponsesTool {
                    r#type: "function".to_string(),
                    name: t.function.name,
                    description: t.function.description,
                    parameters: t.function.parameters,
                })
                .collect()
        });

        let request = ResponsesRequest {
            model: config.model.clone(),
            input: events_to_input(events),
            instructions: config.system_prompt.clone(),
            stream: true,
            temperature: config.temperature,
            max_output_tokens: config.max_tokens,
            tools,
            reasoning: config.reasoning_effort.as_ref().map(|effort| ReasoningParams {
                effort: effort.clone(),
                summary: "auto".to_string(),
            }),
        };

        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| ChatError::transport(format!("responses request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::transport(format!(
                "responses request failed with status {status}: {body}"
            )));
        }

        let state = Arc::new(Mutex::new(ScanState::default()));
        let model = config.model.clone();

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
