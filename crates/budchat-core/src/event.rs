// Event and Segment model
//
// An Event is one conversational turn attributed to a role, holding an
// ordered list of typed Segments. Events are mutated only while they are a
// draft inside the assembler; once finalized they are treated as immutable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Role an event is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Lifecycle of a tool_call segment while its arguments stream in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    InProgress,
    Completed,
}

/// Lifecycle of a provider-executed builtin call (web search, code interpreter)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinCallStatus {
    InProgress,
    Completed,
    Failed,
}

/// A source citation attached to a text segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// One streamed piece of a reasoning summary, keyed by summary_index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningPart {
    pub summary_index: u32,
    pub text: String,
    pub is_complete: bool,
}

/// One typed content unit within an event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Segment {
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        citations: Vec<Citation>,
    },
    ToolCall {
        id: String,
        name: String,
        args: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        server_label: Option<String>,
        output_index: u32,
        sequence_number: u64,
        status: ToolCallStatus,
    },
    ToolResult {
        id: String,
        output: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Reasoning {
        id: String,
        output_index: u32,
        sequence_number: u64,
        parts: Vec<ReasoningPart>,
        #[serde(skip_serializing_if = "Option::is_none")]
        combined_text: Option<String>,
        streaming: bool,
    },
    WebSearchCall {
        id: String,
        status: BuiltinCallStatus,
        sequence_number: u64,
    },
    CodeInterpreterCall {
        id: String,
        status: BuiltinCallStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        sequence_number: u64,
    },
}

impl Segment {
    /// Create a plain text segment
    pub fn text(text: impl Into<String>) -> Self {
        Segment::Text {
            text: text.into(),
            citations: Vec::new(),
        }
    }

    /// Create a tool_result segment
    pub fn tool_result(id: impl Into<String>, output: Value, error: Option<String>) -> Self {
        Segment::ToolResult {
            id: id.into(),
            output,
            error,
        }
    }

    /// Sequence number for interleaving order, where the segment carries one
    pub fn sequence_number(&self) -> Option<u64> {
        match self {
            Segment::ToolCall {
                sequence_number, ..
            }
            | Segment::Reasoning {
                sequence_number, ..
            }
            | Segment::WebSearchCall {
                sequence_number, ..
            }
            | Segment::CodeInterpreterCall {
                sequence_number, ..
            } => Some(*sequence_number),
            Segment::Text { .. } | Segment::ToolResult { .. } => None,
        }
    }

    /// Plain text content, empty for non-text segments
    pub fn as_text(&self) -> &str {
        match self {
            Segment::Text { text, .. } => text,
            _ => "",
        }
    }
}

/// Completion status and item counts stamped onto a finalized event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    /// Whether the turn ran to the provider's natural end
    pub complete: bool,
    /// Number of segments the turn produced
    pub item_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl ResponseMetadata {
    pub fn complete(item_count: usize, model: Option<String>) -> Self {
        Self {
            complete: true,
            item_count,
            model,
        }
    }

    pub fn incomplete(item_count: usize) -> Self {
        Self {
            complete: false,
            item_count,
            model: None,
        }
    }
}

/// One conversational turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub role: Role,
    pub segments: Vec<Segment>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_metadata: Option<ResponseMetadata>,
    /// Fractional key for stable ordering among sibling events
    pub order_key: f64,
}

impl Event {
    /// Create an event with the given role and segments
    pub fn new(role: Role, segments: Vec<Segment>) -> Self {
        Self {
            id: Uuid::now_v7(),
            role,
            segments,
            created_at: Utc::now(),
            response_metadata: None,
            order_key: 0.0,
        }
    }

    /// Create a user event from plain text
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![Segment::text(text)])
    }

    /// Create a system event from plain text
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, vec![Segment::text(text)])
    }

    /// Create a tool event carrying one tool_result segment
    pub fn tool_result(id: impl Into<String>, output: Value, error: Option<String>) -> Self {
        Self::new(Role::Tool, vec![Segment::tool_result(id, output, error)])
    }

    /// Concatenated plain text of all text segments, in order
    pub fn text(&self) -> String {
        self.segments.iter().map(Segment::as_text).collect()
    }

    /// Tool call ids in this event that have no matching tool_result at or
    /// after the call within the event itself
    pub fn unresolved_tool_call_ids(&self) -> Vec<&str> {
        let mut pending: Vec<&str> = Vec::new();
        for segment in &self.segments {
            match segment {
                Segment::ToolCall { id, .. } => pending.push(id),
                Segment::ToolResult { id, .. } => pending.retain(|p| *p != id.as_str()),
                _ => {}
            }
        }
        pending
    }

    /// A copy with a freshly generated id, content untouched
    ///
    /// Used by branching: ids are not stable across a conversation copy.
    pub fn with_new_id(&self) -> Self {
        Self {
            id: Uuid::now_v7(),
            ..self.clone()
        }
    }
}

/// Midpoint order key between two neighbours
///
/// `None` on either side means "before the first" / "after the last".
pub fn order_key_between(prev: Option<f64>, next: Option<f64>) -> f64 {
    match (prev, next) {
        (None, None) => 1.0,
        (Some(p), None) => p + 1.0,
        (None, Some(n)) => n / 2.0,
        (Some(p), Some(n)) => (p + n) / 2.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_concatenates_in_order() {
        let event = Event::new(
            Role::Assistant,
            vec![
                Segment::text("Hello"),
                Segment::tool_result("t1", json!({"ok": true}), None),
                Segment::text(", world"),
            ],
        );
        assert_eq!(event.text(), "Hello, world");
    }

    #[test]
    fn unresolved_ids_ignore_results_before_the_call() {
        let event = Event::new(
            Role::Assistant,
            vec![
                Segment::tool_result("a", json!(1), None),
                Segment::ToolCall {
                    id: "a".into(),
                    name: "f".into(),
                    args: json!({}),
                    server_label: None,
                    output_index: 0,
                    sequence_number: 1,
                    status: ToolCallStatus::Completed,
                },
            ],
        );
        assert_eq!(event.unresolved_tool_call_ids(), vec!["a"]);
    }

    #[test]
    fn order_keys_stay_between_neighbours() {
        let mid = order_key_between(Some(1.0), Some(2.0));
        assert!(mid > 1.0 && mid < 2.0);
        assert!(order_key_between(Some(3.0), None) > 3.0);
        assert!(order_key_between(None, Some(1.0)) < 1.0);
    }

    #[test]
    fn segment_round_trips_through_json() {
        let segment = Segment::ToolCall {
            id: "call_1".into(),
            name: "search".into(),
            args: json!({"q": "rust"}),
            server_label: Some("web".into()),
            output_index: 2,
            sequence_number: 7,
            status: ToolCallStatus::InProgress,
        };
        let json = serde_json::to_string(&segment).unwrap();
        assert!(json.contains("\"kind\":\"tool_call\""));
        let back: Segment = serde_json::from_str(&json).unwrap();
        assert_eq!(back, segment);
    }
}
