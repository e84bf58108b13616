// EventLog - append-only ordered list of events per conversation
//
// Replaced wholesale when a conversation is branched or migrated from a
// temporary id to a real one; never mutated in place beyond appends.

use serde_json::Value;

use crate::event::{order_key_between, Event, Segment};

/// A tool call awaiting execution, extracted from the log
#[derive(Debug, Clone, PartialEq)]
pub struct PendingToolCall {
    pub id: String,
    pub name: String,
    pub args: Value,
}

/// Append-only ordered event list for one conversation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventLog {
    events: Vec<Event>,
}

impl EventLog {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    /// Build a log from already-ordered events, preserving their order keys
    pub fn from_events(events: Vec<Event>) -> Self {
        Self { events }
    }

    /// Append an event, stamping its order key after the current last
    pub fn push(&mut self, mut event: Event) {
        event.order_key = order_key_between(self.events.last().map(|e| e.order_key), None);
        self.events.push(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn last(&self) -> Option<&Event> {
        self.events.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Event> {
        self.events.iter()
    }

    /// Tool calls with no matching tool_result at or after them, in call order
    pub fn unresolved_tool_calls(&self) -> Vec<PendingToolCall> {
        let mut pending: Vec<PendingToolCall> = Vec::new();
        for event in &self.events {
            for segment in &event.segments {
                match segment {
                    Segment::ToolCall { id, name, args, .. } => pending.push(PendingToolCall {
                        id: id.clone(),
                        name: name.clone(),
                        args: args.clone(),
                    }),
                    Segment::ToolResult { id, .. } => pending.retain(|p| p.id != *id),
                    _ => {}
                }
            }
        }
        pending
    }

    /// Prefix copy through `index` inclusive, with freshly generated event ids
    ///
    /// Branching matches events by position, not id, so the copy never
    /// carries ids from the source.
    pub fn branch_prefix(&self, index: usize) -> EventLog {
        let end = (index + 1).min(self.events.len());
        Self {
            events: self.events[..end].iter().map(Event::with_new_id).collect(),
        }
    }

    /// Concatenated plain text of every event, in order
    pub fn combined_text(&self) -> String {
        self.events.iter().map(|e| e.text()).collect()
    }
}

impl IntoIterator for EventLog {
    type Item = Event;
    type IntoIter = std::vec::IntoIter<Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Role, ToolCallStatus};
    use serde_json::json;

    fn call(id: &str, seq: u64) -> Segment {
        Segment::ToolCall {
            id: id.into(),
            name: "lookup".into(),
            args: json!({}),
            server_label: None,
            output_index: 0,
            sequence_number: seq,
            status: ToolCallStatus::Completed,
        }
    }

    #[test]
    fn push_stamps_increasing_order_keys() {
        let mut log = EventLog::new();
        log.push(Event::user("a"));
        log.push(Event::user("b"));
        log.push(Event::user("c"));
        let keys: Vec<f64> = log.iter().map(|e| e.order_key).collect();
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn result_in_later_event_resolves_the_call() {
        let mut log = EventLog::new();
        log.push(Event::user("question"));
        log.push(Event::new(Role::Assistant, vec![call("c1", 1), call("c2", 2)]));
        assert_eq!(log.unresolved_tool_calls().len(), 2);

        log.push(Event::tool_result("c1", json!("ok"), None));
        let pending = log.unresolved_tool_calls();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "c2");

        log.push(Event::tool_result("c2", json!("ok"), None));
        assert!(log.unresolved_tool_calls().is_empty());
    }

    #[test]
    fn branch_prefix_copies_content_with_fresh_ids() {
        let mut log = EventLog::new();
        for i in 0..5 {
            log.push(Event::user(format!("turn {i}")));
        }
        let before = log.clone();

        let branch = log.branch_prefix(2);
        assert_eq!(branch.len(), 3);
        for (src, copy) in log.iter().zip(branch.iter()) {
            assert_ne!(src.id, copy.id);
            assert_eq!(src.segments, copy.segments);
        }
        // source untouched
        assert_eq!(log, before);
    }

    #[test]
    fn combined_text_skips_non_text_segments() {
        let mut log = EventLog::new();
        log.push(Event::user("one "));
        log.push(Event::tool_result("c1", json!({"n": 2}), None));
        log.push(Event::user("two"));
        assert_eq!(log.combined_text(), "one two");
    }
}
