// Conversation Engine
//
// Storage-agnostic, streamable implementation of a multi-turn chat loop
// (provider stream -> tool execution -> repeat) over a typed event log.
//
// Key design decisions:
// - Three vendor wire protocols normalize into one StreamEvent vocabulary
//   behind the ChatTransport trait; everything downstream is vendor-agnostic
// - The draft event is an exclusively-owned EventAssembler per in-flight
//   turn, replaced wholesale at finalize, never aliased
// - High-frequency deltas ride the StreamBus (an injectable registry, not
//   ambient global state); durable commits happen on segment finalization
// - Branching is a compensating-transaction state machine with an explicit
//   PENDING -> COMMITTED | ROLLED_BACK lifecycle
// - Persistence, tool execution, and the outbound channel are injected
//   behind traits (EventStore, ToolBackend, NotificationSink)

pub mod builder;
pub mod branch;
pub mod bus;
pub mod config;
pub mod error;
pub mod event;
pub mod event_log;
pub mod notify;
pub mod orchestrator;
pub mod stream;
pub mod traits;

// In-memory implementations for examples and testing
pub mod memory;

// Re-exports for convenience
pub use branch::{BranchManager, BranchOutcome, BranchStatus, Conversation, ConversationCache};
pub use builder::EventAssembler;
pub use bus::{BufferKey, BufferKind, StreamBus};
pub use config::{ChatConfig, ToolDefinition, TransportProfile};
pub use error::{ChatError, Result};
pub use event::{
    BuiltinCallStatus, Citation, Event, ReasoningPart, ResponseMetadata, Role, Segment,
    ToolCallStatus,
};
pub use event_log::{EventLog, PendingToolCall};
pub use notify::Notification;
pub use orchestrator::{ChatOrchestrator, ChatRequest, OrchestratorConfig, TurnResult};
pub use stream::{BuiltinCallKind, ChatTransport, NormalizedStream, StreamEvent};
pub use traits::{EventStore, NotificationSink, ToolBackend, ToolInvocation, ToolOutcome};
