// Injected collaborator traits
//
// The engine never owns storage, tool execution, or the outbound channel;
// all three are injected behind these seams so the loop can run against a
// database, a webhook backend, and an HTTP response stream in production,
// and against in-memory fakes in tests.

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::error::Result;
use crate::event::Event;
use crate::notify::Notification;

// ============================================================================
// EventStore - persistence collaborator
// ============================================================================

/// Persistence collaborator for conversations and their events
///
/// `save_event` must upsert by event id: the orchestrator re-saves the same
/// draft event as its segment list grows, bounding data loss on crash.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Load the full ordered event list of a conversation
    async fn load_events(&self, conversation_id: Uuid) -> Result<Vec<Event>>;

    /// Insert or replace one event
    async fn save_event(&self, conversation_id: Uuid, event: &Event) -> Result<()>;

    /// Save several events in order
    async fn save_events(&self, conversation_id: Uuid, events: &[Event]) -> Result<()> {
        for event in events {
            self.save_event(conversation_id, event).await?;
        }
        Ok(())
    }

    /// Materialize a brand-new conversation seeded with `events`,
    /// returning its assigned id
    async fn create_conversation(
        &self,
        events: &[Event],
        workspace_id: Uuid,
        persona_id: Option<Uuid>,
    ) -> Result<Uuid>;
}

// ============================================================================
// ToolBackend - external tool execution
// ============================================================================

/// One pending tool call handed to the backend
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    pub args: Value,
}

/// Outcome of one tool execution; `error` set means the tool failed but the
/// turn continues
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub id: String,
    pub output: Value,
    pub error: Option<String>,
}

impl ToolOutcome {
    pub fn ok(id: impl Into<String>, output: Value) -> Self {
        Self {
            id: id.into(),
            output,
            error: None,
        }
    }

    pub fn err(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            output: Value::Null,
            error: Some(error.into()),
        }
    }
}

/// External tool backend, called once per pending tool call
#[async_trait]
pub trait ToolBackend: Send + Sync {
    /// Execute one tool call. Implementations report failure through
    /// `ToolOutcome::error`, not through `Err` - an `Err` here is an
    /// infrastructure fault, which the orchestrator also folds into the
    /// outcome rather than aborting the turn.
    async fn execute(&self, invocation: &ToolInvocation) -> Result<ToolOutcome>;
}

// ============================================================================
// NotificationSink - outbound frame channel
// ============================================================================

/// Outbound channel for caller-visible frames
///
/// `send` returning `ChatError::Cancelled` means the caller closed the
/// stream; the orchestrator treats that like a vendor stream_end with the
/// terminal `complete` suppressed.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, notification: Notification) -> Result<()>;
}
