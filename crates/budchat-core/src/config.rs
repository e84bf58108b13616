// Per-request call configuration and transport profile selection

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool the model may call, in provider-neutral form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments
    pub parameters: Value,
}

/// Configuration for one model call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatConfig {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Reasoning effort hint for models that support it ("low".."high")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,
}

impl ChatConfig {
    pub fn for_model(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }
}

/// The three supported wire protocol families
///
/// Selection happens exactly once per request, from the static model table
/// below; it never changes mid-loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportProfile {
    /// Plain chat-completion streaming
    Completions,
    /// Reasoning-capable "responses" streaming
    Responses,
    /// Alternate-vendor message streaming
    AnthropicMessages,
}

impl TransportProfile {
    /// Static model -> profile table
    pub fn for_model(model: &str) -> Self {
        if model.starts_with("claude") {
            TransportProfile::AnthropicMessages
        } else if model.starts_with("gpt-5")
            || model.starts_with("o1")
            || model.starts_with("o3")
            || model.starts_with("o4")
        {
            TransportProfile::Responses
        } else {
            TransportProfile::Completions
        }
    }
}

impl std::fmt::Display for TransportProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TransportProfile::Completions => "completions",
            TransportProfile::Responses => "responses",
            TransportProfile::AnthropicMessages => "anthropic_messages",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_table_is_stable() {
        assert_eq!(
            TransportProfile::for_model("claude-sonnet-4-5"),
            TransportProfile::AnthropicMessages
        );
        assert_eq!(
            TransportProfile::for_model("gpt-5.2"),
            TransportProfile::Responses
        );
        assert_eq!(
            TransportProfile::for_model("o3-mini"),
            TransportProfile::Responses
        );
        assert_eq!(
            TransportProfile::for_model("gpt-4o-mini"),
            TransportProfile::Completions
        );
    }
}
