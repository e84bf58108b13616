// In-memory implementations for examples and testing
//
// These keep all state in memory: the event store, a scripted transport
// that replays canned normalized streams, a static tool backend, and two
// notification sinks (channel-backed and collecting).

use async_trait::async_trait;
use futures::stream;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use uuid::Uuid;

use crate::config::ChatConfig;
use crate::error::{ChatError, Result};
use crate::event::Event;
use crate::notify::Notification;
use crate::stream::{ChatTransport, NormalizedStream, StreamEvent};
use crate::traits::{EventStore, NotificationSink, ToolBackend, ToolInvocation, ToolOutcome};

// ============================================================================
// InMemoryEventStore
// ============================================================================

/// In-memory event store
///
/// Events are upserted by id within a conversation, mirroring the partial
/// write contract of the persistence collaborator.
#[derive(Debug, Default, Clone)]
pub struct InMemoryEventStore {
    conversations: Arc<RwLock<HashMap<Uuid, Vec<Event>>>>,
    fail_creates: Arc<AtomicBool>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `create_conversation` fail, for rollback tests
    pub fn fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::SeqCst);
    }

    /// Pre-populate a conversation
    pub async fn seed(&self, conversation_id: Uuid, events: Vec<Event>) {
        self.conversations
            .write()
            .await
            .insert(conversation_id, events);
    }

    /// All events of a conversation, test inspection helper
    pub async fn events(&self, conversation_id: Uuid) -> Vec<Event> {
        self.conversations
            .read()
            .await
            .get(&conversation_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn conversation_ids(&self) -> Vec<Uuid> {
        self.conversations.read().await.keys().copied().collect()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn load_events(&self, conversation_id: Uuid) -> Result<Vec<Event>> {
        self.conversations
            .read()
            .await
            .get(&conversation_id)
            .cloned()
            .ok_or(ChatError::ConversationNotFound(conversation_id))
    }

    async fn save_event(&self, conversation_id: Uuid, event: &Event) -> Result<()> {
        let mut conversations = self.conversations.write().await;
        let events = conversations.entry(conversation_id).or_default();
        match events.iter_mut().find(|e| e.id == event.id) {
            Some(existing) => *existing = event.clone(),
            None => events.push(event.clone()),
        }
        Ok(())
    }

    async fn create_conversation(
        &self,
        events: &[Event],
        _workspace_id: Uuid,
        _persona_id: Option<Uuid>,
    ) -> Result<Uuid> {
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(ChatError::store("conversation creation refused"));
        }
        let id = Uuid::now_v7();
        self.conversations
            .write()
            .await
            .insert(id, events.to_vec());
        Ok(id)
    }
}

// ============================================================================
// ScriptedTransport
// ============================================================================

/// Transport replaying canned normalized streams, one script per call
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    scripts: Mutex<Vec<Vec<StreamEvent>>>,
    call_log: Mutex<Vec<Vec<Event>>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the normalized events one call will replay
    pub async fn push_script(&self, events: Vec<StreamEvent>) {
        self.scripts.lock().await.push(events);
    }

    /// Event histories the transport was called with
    pub async fn calls(&self) -> Vec<Vec<Event>> {
        self.call_log.lock().await.clone()
    }
}

#[async_trait]
impl ChatTransport for ScriptedTransport {
    async fn stream_chat(&self, events: &[Event], _config: &ChatConfig) -> Result<NormalizedStream> {
        self.call_log.lock().await.push(events.to_vec());
        let mut scripts = self.scripts.lock().await;
        if scripts.is_empty() {
            return Err(ChatError::transport("no scripted response left"));
        }
        let script = scripts.remove(0);
        Ok(Box::pin(stream::iter(script.into_iter().map(Ok))))
    }
}

// ============================================================================
// StaticToolBackend
// ============================================================================

/// Tool backend answering from a fixed name -> outcome table
#[derive(Debug, Default)]
pub struct StaticToolBackend {
    outputs: Mutex<HashMap<String, std::result::Result<Value, String>>>,
    call_log: Mutex<Vec<ToolInvocation>>,
}

impl StaticToolBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn answer(&self, name: impl Into<String>, output: Value) {
        self.outputs.lock().await.insert(name.into(), Ok(output));
    }

    pub async fn fail(&self, name: impl Into<String>, error: impl Into<String>) {
        self.outputs
            .lock()
            .await
            .insert(name.into(), Err(error.into()));
    }

    pub async fn calls(&self) -> Vec<ToolInvocation> {
        self.call_log.lock().await.clone()
    }
}

#[async_trait]
impl ToolBackend for StaticToolBackend {
    async fn execute(&self, invocation: &ToolInvocation) -> Result<ToolOutcome> {
        self.call_log.lock().await.push(invocation.clone());
        match self.outputs.lock().await.get(&invocation.name) {
            Some(Ok(output)) => Ok(ToolOutcome::ok(&invocation.id, output.clone())),
            Some(Err(error)) => Ok(ToolOutcome::err(&invocation.id, error.clone())),
            None => Ok(ToolOutcome::err(
                &invocation.id,
                format!("unknown tool: {}", invocation.name),
            )),
        }
    }
}

// ============================================================================
// Notification sinks
// ============================================================================

/// Sink writing frames into an mpsc channel
///
/// A dropped receiver surfaces as `ChatError::Cancelled`, which is how the
/// orchestrator learns the caller went away.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl NotificationSink for ChannelSink {
    async fn send(&self, notification: Notification) -> Result<()> {
        self.tx
            .send(notification)
            .map_err(|_| ChatError::Cancelled)
    }
}

/// Sink collecting frames in memory for assertions
#[derive(Debug, Default)]
pub struct CollectingSink {
    frames: Mutex<Vec<Notification>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn frames(&self) -> Vec<Notification> {
        self.frames.lock().await.clone()
    }
}

#[async_trait]
impl NotificationSink for CollectingSink {
    async fn send(&self, notification: Notification) -> Result<()> {
        self.frames.lock().await.push(notification);
        Ok(())
    }
}
