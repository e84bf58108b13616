// OpenAI Wire Types
//
// Request and stream-chunk shapes for the Chat Completions API, plus the
// conversion from the internal event log into wire messages.

use budchat_core::{ChatConfig, Event, Role, Segment, ToolDefinition};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Chat Completions request body
#[derive(Debug, Clone, Serialize)]
pub struct CompletionsRequest {
    pub model: String,
    pub messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<WireTool>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireTool {
    pub r#type: String,
    pub function: WireFunction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireFunction {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireToolCall {
    pub id: String,
    pub r#type: String,
    pub function: WireFunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireFunctionCall {
    pub name: String,
    /// Arguments travel as a JSON-encoded string on this wire
    pub arguments: String,
}

// Streaming chunk types

#[derive(Debug, Clone, Deserialize)]
pub struct StreamChunk {
    #[serde(default)]
    pub model: Option<String>,
    pub choices: Vec<StreamChoice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamChoice {
    pub delta: StreamDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamDelta {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<StreamToolCall>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamToolCall {
    pub index: u32,
    pub id: Option<String>,
    pub function: Option<StreamFunction>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamFunction {
    pub name: Option<String>,
    pub arguments: Option<String>,
}

// ============================================================================
// Conversions
// ============================================================================

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

/// Flatten the event log into Chat Completions messages
///
/// An assistant event fans its tool_call segments into the message's
/// `tool_calls` array; a tool event fans each tool_result segment into its
/// own `role: tool` message keyed by `tool_call_id`.
pub fn events_to_messages(events: &[Event], config: &ChatConfig) -> Vec<WireMessage> {
    let mut messages = Vec::new();

    if let Some(system) = &config.system_prompt {
        if !events.iter().any(|e| e.role == Role::System) {
            messages.push(WireMessage {
                role: "system".to_string(),
                content: Some(system.clone()),
                tool_calls: None,
                tool_call_id: None,
            });
        }
    }

    for event in events {
        match event.role {
            Role::Tool => {
                for segment in &event.segments {
                    if let Segment::ToolResult { id, output, error } = segment {
                        let content = match error {
                            Some(error) => format!("Error: {error}"),
                            None => output.to_string(),
                        };
                        messages.push(WireMessage {
                            role: "tool".to_string(),
                            content: Some(content),
                            tool_calls: None,
                            tool_call_id: Some(id.clone()),
                        });
                    }
                }
            }
            role => {
                let tool_calls: Vec<WireToolCall> = event
                    .segments
                    .iter()
                    .filter_map(|s| match s {
                        Segment::ToolCall { id, name, args, .. } => Some(WireToolCall {
                            id: id.clone(),
                            r#type: "function".to_string(),
                            function: WireFunctionCall {
                                name: name.clone(),
                                arguments: serde_json::to_string(args).unwrap_or_default(),
                            },
                        }),
                        _ => None,
                    })
                    .collect();

                messages.push(WireMessage {
                    role: role_str(role).to_string(),
                    content: Some(event.text()),
                    tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                    tool_call_id: None,
                });
            }
        }
    }

    messages
}

/// Convert tool definitions to the function-calling wire format
pub fn tools_to_wire(tools: &[ToolDefinition]) -> Option<Vec<WireTool>> {
    if tools.is_empty() {
        return None;
    }
    Some(
        tools
            .iter()
            .map(|tool| WireTool {
                r#type: "function".to_string(),
                function: WireFunction {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: tool.parameters.clone(),
                },
            })
            .collect(),
    )
}
