// Conversation orchestrator
//
// The per-request control loop alternating model inference and tool
// execution: STREAMING_RESPONSE -> RESOLVING_TOOLS -> (loop) -> DONE |
// ERROR. Exactly one assistant turn is in flight per conversation; the
// loop is non-reentrant per conversation by construction (the assembler is
// exclusively owned by the turn that created it).

use futures::StreamExt;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::builder::EventAssembler;
use crate::bus::{BufferKey, BufferKind, StreamBus};
use crate::config::{ChatConfig, ToolDefinition, TransportProfile};
use crate::error::{ChatError, Result};
use crate::event::{Event, Role, ToolCallStatus};
use crate::event_log::EventLog;
use crate::notify::Notification;
use crate::stream::{ChatTransport, NormalizedStream, StreamEvent};
use crate::traits::{EventStore, NotificationSink, ToolBackend, ToolInvocation, ToolOutcome};

/// Loop limits and per-call timeouts
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Hard cap on tool-execution rounds per request; exceeding it is an
    /// explicit error, never a silent truncation
    pub max_tool_rounds: usize,
    /// Timeout for one provider connect, one stream read, or one tool call
    pub call_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: 8,
            call_timeout: Duration::from_secs(120),
        }
    }
}

/// Inbound request: prior history or a message to resume a conversation
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Resume this conversation; `None` creates a brand-new one
    pub conversation_id: Option<Uuid>,
    /// New user message to append
    pub message: Option<String>,
    /// Prior event history, used only when no conversation id is given
    pub history: Vec<Event>,
    pub workspace_id: Uuid,
    /// Persona ("bud") applied as defaults by the caller
    pub persona_id: Option<Uuid>,
    pub model: String,
    pub system_prompt: Option<String>,
    pub tools: Vec<ToolDefinition>,
}

impl ChatRequest {
    pub fn new_message(
        workspace_id: Uuid,
        model: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id: None,
            message: Some(message.into()),
            history: Vec::new(),
            workspace_id,
            persona_id: None,
            model: model.into(),
            system_prompt: None,
            tools: Vec::new(),
        }
    }
}

/// What one request produced
#[derive(Debug, Clone)]
pub struct TurnResult {
    pub conversation_id: Uuid,
    /// Events appended by this request, in order
    pub appended: Vec<Event>,
    /// Concatenated plain text of the assistant output
    pub content: String,
    /// Tool-execution rounds consumed
    pub tool_rounds: usize,
    /// False when the caller closed the stream mid-turn
    pub completed: bool,
}

struct StreamOutcome {
    event: Option<Event>,
    cancelled: bool,
}

/// The per-request control loop
pub struct ChatOrchestrator<S, T>
where
    S: EventStore,
    T: ToolBackend,
{
    store: Arc<S>,
    tools: Arc<T>,
    transports: HashMap<TransportProfile, Arc<dyn ChatTransport>>,
    bus: Arc<StreamBus>,
    config: OrchestratorConfig,
}

impl<S, T> ChatOrchestrator<S, T>
where
    S: EventStore,
    T: ToolBackend,
{
    pub fn new(store: Arc<S>, tools: Arc<T>) -> Self {
        Self {
            store,
            tools,
            transports: HashMap::new(),
            bus: Arc::new(StreamBus::new()),
            config: OrchestratorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Register the transport serving one profile
    pub fn register_transport(
        mut self,
        profile: TransportProfile,
        transport: Arc<dyn ChatTransport>,
    ) -> Self {
        self.transports.insert(profile, transport);
        self
    }

    /// The bus observers can read delta snapshots from
    pub fn bus(&self) -> Arc<StreamBus> {
        Arc::clone(&self.bus)
    }

    /// Run one request to completion, streaming frames into `sink`
    ///
    /// Any uncaught error emits a single terminal `error` frame before
    /// propagating; the caller rolls back its own optimistic state.
    pub async fn run(&self, request: ChatRequest, sink: &dyn NotificationSink) -> Result<TurnResult> {
        match self.run_inner(request, sink).await {
            Ok(result) => Ok(result),
            Err(error) => {
                let _ = sink
                    .send(Notification::Error {
                        message: error.to_string(),
                    })
                    .await;
                Err(error)
            }
        }
    }

    async fn run_inner(
        &self,
        request: ChatRequest,
        sink: &dyn NotificationSink,
    ) -> Result<TurnResult> {
        // Transport selection is fixed once per request from the static
        // model table; it never changes mid-loop.
        let profile = TransportProfile::for_model(&request.model);
        let transport = self
            .transports
            .get(&profile)
            .cloned()
            .ok_or_else(|| ChatError::NoTransport(profile.to_string()))?;

        let call_config = ChatConfig {
            model: request.model.clone(),
            system_prompt: request.system_prompt.clone(),
            tools: request.tools.clone(),
            ..Default::default()
        };

        let (conversation_id, mut log) = self.resolve_conversation(&request, sink).await?;
        info!(%conversation_id, model = %request.model, %profile, "turn started");

        let mut appended: Vec<Event> = Vec::new();
        let mut tool_rounds = 0usize;

        loop {
            let pending = log.unresolved_tool_calls();
            if !pending.is_empty() {
                tool_rounds += 1;
                if tool_rounds > self.config.max_tool_rounds {
                    warn!(%conversation_id, rounds = tool_rounds, "tool round cap exceeded");
                    return Err(ChatError::ToolRoundLimit(self.config.max_tool_rounds));
                }
                debug!(%conversation_id, pending = pending.len(), round = tool_rounds, "resolving tools");

                let mut cancelled = false;
                for call in pending {
                    let invocation = ToolInvocation {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        args: call.args.clone(),
                    };
                    let outcome = self.execute_tool(&invocation).await;

                    let event =
                        Event::tool_result(&outcome.id, outcome.output.clone(), outcome.error.clone());
                    log.push(event);
                    if let Some(saved) = log.last() {
                        self.store.save_event(conversation_id, saved).await?;
                        appended.push(saved.clone());
                    }

                    let frames = [
                        Notification::ToolResult {
                            id: outcome.id.clone(),
                            output: outcome.output.clone(),
                            error: outcome.error.clone(),
                        },
                        Notification::ToolComplete {
                            id: outcome.id.clone(),
                        },
                    ];
                    for frame in frames {
                        if sink.send(frame).await.is_err() {
                            cancelled = true;
                        }
                    }
                }
                if cancelled {
                    return Ok(TurnResult {
                        conversation_id,
                        content: turn_text(&appended),
                        appended,
                        tool_rounds,
                        completed: false,
                    });
                }
                continue;
            }

            // STREAMING_RESPONSE: full ordered history to the provider
            let stream = timeout(
                self.config.call_timeout,
                transport.stream_chat(log.events(), &call_config),
            )
            .await
            .map_err(|_| ChatError::transport("provider connect timed out"))??;

            let outcome = self.drive_stream(stream, conversation_id, sink).await?;

            if let Some(event) = outcome.event {
                let event_id = event.id;
                log.push(event);
                if let Some(saved) = log.last() {
                    let persisted = self.store.save_event(conversation_id, saved).await;
                    // the draft is finalized either way; its buffers must
                    // not survive a failed save
                    self.bus.clear_event(event_id);
                    persisted?;
                    appended.push(saved.clone());
                }

                if outcome.cancelled {
                    // caller went away: complete suppressed, draft kept
                    // explicitly incomplete but persisted
                    return Ok(TurnResult {
                        conversation_id,
                        content: turn_text(&appended),
                        appended,
                        tool_rounds,
                        completed: false,
                    });
                }
                if !log.unresolved_tool_calls().is_empty() {
                    continue;
                }
            } else if outcome.cancelled {
                return Ok(TurnResult {
                    conversation_id,
                    content: turn_text(&appended),
                    appended,
                    tool_rounds,
                    completed: false,
                });
            }
            // empty finalize means "nothing happened", not an error
            break;
        }

        let content = turn_text(&appended);
        let _ = sink
            .send(Notification::Complete {
                content: content.clone(),
            })
            .await;
        info!(%conversation_id, rounds = tool_rounds, "turn done");

        Ok(TurnResult {
            conversation_id,
            appended,
            content,
            tool_rounds,
            completed: true,
        })
    }

    /// Load or create the conversation and append the new user message
    async fn resolve_conversation(
        &self,
        request: &ChatRequest,
        sink: &dyn NotificationSink,
    ) -> Result<(Uuid, EventLog)> {
        if let Some(conversation_id) = request.conversation_id {
            let mut log = EventLog::from_events(self.store.load_events(conversation_id).await?);
            if let Some(message) = &request.message {
                log.push(Event::user(message.clone()));
                if let Some(user) = log.last() {
                    self.store.save_event(conversation_id, user).await?;
                }
            }
            if log.is_empty() {
                return Err(ChatError::EmptyRequest);
            }
            return Ok((conversation_id, log));
        }

        let mut log = EventLog::from_events(request.history.clone());
        if let Some(message) = &request.message {
            log.push(Event::user(message.clone()));
        }
        if log.is_empty() {
            return Err(ChatError::EmptyRequest);
        }
        let conversation_id = self
            .store
            .create_conversation(log.events(), request.workspace_id, request.persona_id)
            .await?;
        // the only conversationCreated frame this request may emit
        let _ = sink
            .send(Notification::ConversationCreated { conversation_id })
            .await;
        Ok((conversation_id, log))
    }

    /// Execute one tool call; failures become an error-carrying outcome,
    /// never an abort of the turn
    async fn execute_tool(&self, invocation: &ToolInvocation) -> ToolOutcome {
        debug!(id = %invocation.id, name = %invocation.name, "executing tool");
        match timeout(self.config.call_timeout, self.tools.execute(invocation)).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(error)) => {
                warn!(id = %invocation.id, %error, "tool backend error");
                ToolOutcome::err(&invocation.id, error.to_string())
            }
            Err(_) => ToolOutcome::err(&invocation.id, "tool call timed out"),
        }
    }

    /// Drive one provider stream through the assembler, mirroring raw
    /// deltas into the bus and notifying the caller
    async fn drive_stream(
        &self,
        stream: NormalizedStream,
        conversation_id: Uuid,
        sink: &dyn NotificationSink,
    ) -> Result<StreamOutcome> {
        let mut assembler = EventAssembler::new(Role::Assistant);
        let event_id = assembler.event_id();
        let outcome = self
            .drive_stream_inner(stream, conversation_id, sink, &mut assembler)
            .await;
        // only a durable event reaches the clear in run_inner; every other
        // exit must release the draft's buffers here, or they outlive the
        // turn in the orchestrator-scoped bus
        if !matches!(&outcome, Ok(StreamOutcome { event: Some(_), .. })) {
            self.bus.clear_event(event_id);
        }
        outcome
    }

    async fn drive_stream_inner(
        &self,
        mut stream: NormalizedStream,
        conversation_id: Uuid,
        sink: &dyn NotificationSink,
        assembler: &mut EventAssembler,
    ) -> Result<StreamOutcome> {
        let event_id = assembler.event_id();
        let text_key = BufferKey::new(event_id, BufferKind::Text);

        let mut last_flush = Instant::now();
        let mut cancelled = false;
        let mut stream_complete = false;
        let mut model = None;

        loop {
            let item = match timeout(self.config.call_timeout, stream.next()).await {
                Ok(Some(item)) => item,
                Ok(None) => break,
                // stalled mid-body: same terminal path as a failed connect
                Err(_) => return Err(ChatError::transport("provider stream stalled")),
            };
            let event = item?;
            match event {
                StreamEvent::Token(delta) => {
                    // raw token deltas go through the bus; the assembler
                    // only ever sees drained text, so there is one consumed
                    // offset and finalize can never double-append
                    self.bus.append(text_key, &delta);
                    if last_flush.elapsed() >= self.bus.flush_interval(text_key) {
                        last_flush = Instant::now();
                        cancelled |= self.flush_text(text_key, assembler, sink).await;
                    }
                }
                StreamEvent::ToolStart {
                    id,
                    name,
                    output_index,
                    ..
                } => {
                    cancelled |= self.flush_text(text_key, assembler, sink).await;
                    assembler.add_tool_call(
                        &id,
                        &name,
                        json!({}),
                        output_index,
                        None,
                        ToolCallStatus::InProgress,
                    );
                    cancelled |= sink
                        .send(Notification::ToolStart { id, name })
                        .await
                        .is_err();
                }
                StreamEvent::ToolArgumentsDelta { id, delta } => {
                    self.bus
                        .append(BufferKey::new(event_id, BufferKind::ToolArgs), &delta);
                    cancelled |= sink
                        .send(Notification::ToolArgumentsDelta { id, delta })
                        .await
                        .is_err();
                }
                StreamEvent::ToolFinalized { id, name, args } => {
                    assembler.finalize_tool_call(&id, &name, args.clone());
                    // finalized tool_call segments bound crash loss
                    self.store
                        .save_event(conversation_id, &assembler.snapshot())
                        .await?;
                    cancelled |= sink
                        .send(Notification::ToolFinalized { id, name, args })
                        .await
                        .is_err();
                }
                StreamEvent::ToolResult { id, output } => {
                    assembler.add_tool_result(&id, output.clone(), None);
                    self.store
                        .save_event(conversation_id, &assembler.snapshot())
                        .await?;
                    cancelled |= sink
                        .send(Notification::ToolResult {
                            id,
                            output,
                            error: None,
                        })
                        .await
                        .is_err();
                }
                StreamEvent::ReasoningStart {
                    id, output_index, ..
                } => {
                    cancelled |= self.flush_text(text_key, assembler, sink).await;
                    assembler.start_reasoning(&id, output_index);
                    cancelled |= sink
                        .send(Notification::ReasoningStart { id })
                        .await
                        .is_err();
                }
                StreamEvent::ReasoningDelta {
                    id,
                    summary_index,
                    text,
                } => {
                    assembler.add_reasoning_delta(&id, summary_index, &text);
                    self.bus
                        .append(BufferKey::new(event_id, BufferKind::Reasoning), &text);
                    cancelled |= sink
                        .send(Notification::ReasoningDelta {
                            id,
                            summary_index,
                            text,
                        })
                        .await
                        .is_err();
                }
                StreamEvent::ReasoningComplete { id, combined_text } => {
                    assembler.complete_reasoning(&id, combined_text.clone());
                    // finalized reasoning segments bound crash loss
                    self.store
                        .save_event(conversation_id, &assembler.snapshot())
                        .await?;
                    cancelled |= sink
                        .send(Notification::ReasoningComplete { id, combined_text })
                        .await
                        .is_err();
                }
                StreamEvent::BuiltinToolCall {
                    id,
                    kind,
                    status,
                    code,
                } => {
                    if let Some(code) = &code {
                        self.bus
                            .append(BufferKey::new(event_id, BufferKind::Code), code);
                    }
                    assembler.upsert_builtin_call(&id, kind, status, code);
                }
                StreamEvent::Unknown { frame } => {
                    // logged and skipped; never aborts the stream
                    debug!(%conversation_id, frame, "unrecognized provider frame");
                }
                StreamEvent::Error(message) => {
                    return Err(ChatError::transport(message));
                }
                StreamEvent::StreamEnd(metadata) => {
                    stream_complete = metadata.complete;
                    model = metadata.model;
                    break;
                }
            }
            if cancelled {
                break;
            }
        }

        // drain the remainder exactly once
        let rest = self.bus.drain(text_key);
        if !rest.is_empty() {
            assembler.add_text_chunk(&rest);
            if !cancelled {
                cancelled = sink
                    .send(Notification::Token { delta: rest })
                    .await
                    .is_err();
            }
        }

        let complete = stream_complete && !cancelled;
        let event = assembler.finalize(complete, model);
        Ok(StreamOutcome { event, cancelled })
    }

    /// Drain buffered text into the assembler and notify; returns true when
    /// the caller has gone away
    async fn flush_text(
        &self,
        key: BufferKey,
        assembler: &mut EventAssembler,
        sink: &dyn NotificationSink,
    ) -> bool {
        let delta = self.bus.drain(key);
        if delta.is_empty() {
            return false;
        }
        assembler.add_text_chunk(&delta);
        sink.send(Notification::Token { delta }).await.is_err()
    }
}

/// Plain text the turn appended so far, concatenated in log order
fn turn_text(appended: &[Event]) -> String {
    EventLog::from_events(appended.to_vec()).combined_text()
}
