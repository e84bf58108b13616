// Event assembly
//
// Accumulates normalized stream deltas into one mutable draft event, then
// freezes it. The assembler is an exclusively-owned value per in-flight
// turn; the orchestrator replaces it wholesale at finalize, never aliases
// it. Finalize is idempotent until the next reset so a turn can never be
// persisted twice.

use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::event::{
    BuiltinCallStatus, Event, ReasoningPart, ResponseMetadata, Role, Segment, ToolCallStatus,
};
use crate::stream::BuiltinCallKind;

/// Builds one draft event from stream deltas
#[derive(Debug)]
pub struct EventAssembler {
    draft: Event,
    next_sequence: u64,
    /// Index of the single active text segment, once created
    text_index: Option<usize>,
    /// Cached outcome of `finalize`; `Some(None)` is the empty no-op result
    finalized: Option<Option<Event>>,
}

impl EventAssembler {
    pub fn new(role: Role) -> Self {
        Self {
            draft: Event::new(role, Vec::new()),
            next_sequence: 0,
            text_index: None,
            finalized: None,
        }
    }

    /// Id of the draft event (stable across the whole turn)
    pub fn event_id(&self) -> Uuid {
        self.draft.id
    }

    pub fn is_empty(&self) -> bool {
        self.draft.segments.is_empty()
    }

    /// Whether any reasoning segment is still streaming
    pub fn is_streaming(&self) -> bool {
        self.draft.segments.iter().any(
            |s| matches!(s, Segment::Reasoning { streaming, .. } if *streaming),
        )
    }

    /// Discard the current draft and start a new one
    pub fn reset(&mut self, role: Role) {
        *self = Self::new(role);
    }

    /// Clone of the draft's current state, for partial persistence
    pub fn snapshot(&self) -> Event {
        self.draft.clone()
    }

    fn next_sequence(&mut self) -> u64 {
        self.next_sequence += 1;
        self.next_sequence
    }

    /// Append to the single active text segment, creating it on first call
    pub fn add_text_chunk(&mut self, delta: &str) {
        if self.finalized.is_some() || delta.is_empty() {
            return;
        }
        match self.text_index {
            Some(index) => {
                if let Segment::Text { text, .. } = &mut self.draft.segments[index] {
                    text.push_str(delta);
                }
            }
            None => {
                self.draft.segments.push(Segment::text(delta));
                self.text_index = Some(self.draft.segments.len() - 1);
            }
        }
    }

    /// Upsert a tool_call segment, stamping a monotonic sequence number on
    /// insert so interleaving with reasoning/text is preserved
    pub fn add_tool_call(
        &mut self,
        id: &str,
        name: &str,
        args: Value,
        output_index: u32,
        server_label: Option<String>,
        status: ToolCallStatus,
    ) {
        if self.finalized.is_some() {
            return;
        }
        for segment in &mut self.draft.segments {
            if let Segment::ToolCall {
                id: existing,
                name: existing_name,
                args: existing_args,
                status: existing_status,
                ..
            } = segment
            {
                if existing == id {
                    if !name.is_empty() {
                        *existing_name = name.to_string();
                    }
                    *existing_args = args;
                    *existing_status = status;
                    return;
                }
            }
        }
        let sequence_number = self.next_sequence();
        self.draft.segments.push(Segment::ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            args,
            server_label,
            output_index,
            sequence_number,
            status,
        });
    }

    /// Mark a tool call's arguments complete
    pub fn finalize_tool_call(&mut self, id: &str, name: &str, args: Value) {
        self.add_tool_call(id, name, args, 0, None, ToolCallStatus::Completed);
    }

    /// Upsert a tool_result segment (provider-executed tools resolve inside
    /// the same turn)
    pub fn add_tool_result(&mut self, id: &str, output: Value, error: Option<String>) {
        if self.finalized.is_some() {
            return;
        }
        for segment in &mut self.draft.segments {
            if let Segment::ToolResult {
                id: existing,
                output: existing_output,
                error: existing_error,
            } = segment
            {
                if existing == id {
                    *existing_output = output;
                    *existing_error = error;
                    return;
                }
            }
        }
        self.draft
            .segments
            .push(Segment::tool_result(id, output, error));
    }

    /// Upsert a reasoning segment, merging `parts` by summary_index
    ///
    /// At most one reasoning segment streams at a time: marking this one
    /// streaming clears the flag everywhere else.
    pub fn upsert_reasoning(
        &mut self,
        id: &str,
        output_index: u32,
        parts: Vec<ReasoningPart>,
        streaming: bool,
    ) {
        if self.finalized.is_some() {
            return;
        }
        if streaming {
            for segment in &mut self.draft.segments {
                if let Segment::Reasoning { streaming, .. } = segment {
                    *streaming = false;
                }
            }
        }
        for segment in &mut self.draft.segments {
            if let Segment::Reasoning {
                id: existing,
                parts: existing_parts,
                streaming: existing_streaming,
                ..
            } = segment
            {
                if existing == id {
                    for part in parts {
                        merge_part(existing_parts, part);
                    }
                    *existing_streaming = streaming;
                    return;
                }
            }
        }
        let sequence_number = self.next_sequence();
        self.draft.segments.push(Segment::Reasoning {
            id: id.to_string(),
            output_index,
            sequence_number,
            parts,
            combined_text: None,
            streaming,
        });
    }

    /// Open a reasoning segment with no text yet
    pub fn start_reasoning(&mut self, id: &str, output_index: u32) {
        self.upsert_reasoning(id, output_index, Vec::new(), true);
    }

    /// Append reasoning summary text to the part at `summary_index`
    pub fn add_reasoning_delta(&mut self, id: &str, summary_index: u32, text: &str) {
        self.upsert_reasoning(
            id,
            0,
            vec![ReasoningPart {
                summary_index,
                text: text.to_string(),
                is_complete: false,
            }],
            true,
        );
    }

    /// Close a reasoning segment, stamping its combined text
    pub fn complete_reasoning(&mut self, id: &str, combined_text: Option<String>) {
        if self.finalized.is_some() {
            return;
        }
        for segment in &mut self.draft.segments {
            if let Segment::Reasoning {
                id: existing,
                parts,
                combined_text: existing_combined,
                streaming,
                ..
            } = segment
            {
                if existing == id {
                    for part in parts.iter_mut() {
                        part.is_complete = true;
                    }
                    *existing_combined = combined_text.or_else(|| {
                        Some(parts.iter().map(|p| p.text.as_str()).collect::<String>())
                    });
                    *streaming = false;
                    return;
                }
            }
        }
        debug!(reasoning_id = id, "complete for unknown reasoning segment");
    }

    /// Upsert a builtin call segment (web search / code interpreter)
    pub fn upsert_builtin_call(
        &mut self,
        id: &str,
        kind: BuiltinCallKind,
        status: BuiltinCallStatus,
        code: Option<String>,
    ) {
        if self.finalized.is_some() {
            return;
        }
        for segment in &mut self.draft.segments {
            match segment {
                Segment::WebSearchCall {
                    id: existing,
                    status: existing_status,
                    ..
                } if existing == id => {
                    *existing_status = status;
                    return;
                }
                Segment::CodeInterpreterCall {
                    id: existing,
                    status: existing_status,
                    code: existing_code,
                    ..
                } if existing == id => {
                    *existing_status = status;
                    if code.is_some() {
                        *existing_code = code;
                    }
                    return;
                }
                _ => {}
            }
        }
        let sequence_number = self.next_sequence();
        let segment = match kind {
            BuiltinCallKind::WebSearch => Segment::WebSearchCall {
                id: id.to_string(),
                status,
                sequence_number,
            },
            BuiltinCallKind::CodeInterpreter => Segment::CodeInterpreterCall {
                id: id.to_string(),
                status,
                code,
                sequence_number,
            },
        };
        self.draft.segments.push(segment);
    }

    /// Freeze the draft into an immutable event
    ///
    /// Idempotent: a second call without an intervening `reset` returns the
    /// same result and performs no new side effects. A draft with no content
    /// and nothing streaming yields `None` - "nothing happened", not an
    /// error.
    pub fn finalize(&mut self, complete: bool, model: Option<String>) -> Option<Event> {
        if let Some(outcome) = &self.finalized {
            return outcome.clone();
        }
        if self.is_empty() && !self.is_streaming() {
            self.finalized = Some(None);
            return None;
        }
        for segment in &mut self.draft.segments {
            if let Segment::Reasoning { streaming, .. } = segment {
                *streaming = false;
            }
        }
        self.draft.response_metadata = Some(ResponseMetadata {
            complete,
            item_count: self.draft.segments.len(),
            model,
        });
        let event = self.draft.clone();
        self.finalized = Some(Some(event.clone()));
        Some(event)
    }
}

fn merge_part(parts: &mut Vec<ReasoningPart>, incoming: ReasoningPart) {
    for part in parts.iter_mut() {
        if part.summary_index == incoming.summary_index {
            part.text.push_str(&incoming.text);
            part.is_complete = incoming.is_complete;
            return;
        }
    }
    parts.push(incoming);
    parts.sort_by_key(|p| p.summary_index);
}
