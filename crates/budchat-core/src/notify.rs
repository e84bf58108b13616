// Caller-visible notification frames
//
// One frame per normalized notification, serialized as newline-delimited
// JSON on the outbound stream.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One outbound NDJSON frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    Token {
        delta: String,
    },
    ToolStart {
        id: String,
        name: String,
    },
    ToolArgumentsDelta {
        id: String,
        delta: String,
    },
    ToolFinalized {
        id: String,
        name: String,
        args: Value,
    },
    ToolResult {
        id: String,
        output: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    ToolComplete {
        id: String,
    },
    ReasoningStart {
        id: String,
    },
    ReasoningDelta {
        id: String,
        summary_index: u32,
        text: String,
    },
    ReasoningComplete {
        id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        combined_text: Option<String>,
    },
    #[serde(rename = "conversationCreated")]
    ConversationCreated {
        conversation_id: Uuid,
    },
    Complete {
        content: String,
    },
    Error {
        message: String,
    },
}

impl Notification {
    /// Serialize as one newline-terminated JSON frame
    pub fn to_ndjson(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"));
        line.push('\n');
        line
    }

    /// Whether this frame terminates the outbound stream
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Notification::Complete { .. } | Notification::Error { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn frames_carry_snake_case_tags() {
        let frame = Notification::ToolStart {
            id: "call_1".into(),
            name: "search".into(),
        };
        assert!(frame.to_ndjson().starts_with("{\"type\":\"tool_start\""));
    }

    #[test]
    fn conversation_created_keeps_its_camel_case_tag() {
        let frame = Notification::ConversationCreated {
            conversation_id: Uuid::now_v7(),
        };
        let line = frame.to_ndjson();
        assert!(line.contains("\"type\":\"conversationCreated\""));
        assert!(line.ends_with('\n'));
    }

    #[test]
    fn tool_result_omits_absent_error() {
        let frame = Notification::ToolResult {
            id: "call_1".into(),
            output: json!({"ok": true}),
            error: None,
        };
        assert!(!frame.to_ndjson().contains("error"));
    }
}
