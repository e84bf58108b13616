// Normalized stream vocabulary and the transport seam
//
// Each vendor transport converts its native frame protocol into this one
// vocabulary. Everything downstream - assembler, orchestrator, bus - is
// vendor-agnostic. Unrecognized frames pass through as Unknown; a transport
// never aborts the stream on one.

use async_trait::async_trait;
use futures::Stream;
use serde_json::Value;
use std::pin::Pin;

use crate::config::ChatConfig;
use crate::error::Result;
use crate::event::{BuiltinCallStatus, Event, ResponseMetadata};

/// Type alias for a normalized provider stream
pub type NormalizedStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// Kind of provider-executed builtin call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinCallKind {
    WebSearch,
    CodeInterpreter,
}

/// Internal events produced by a stream normalizer, in frame order
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Plain answer text delta
    Token(String),
    /// A tool call has been announced; arguments may still be streaming
    ToolStart {
        id: String,
        name: String,
        output_index: u32,
        sequence_number: u64,
    },
    /// Raw tool-argument text delta
    ToolArgumentsDelta { id: String, delta: String },
    /// The tool call's arguments are complete and parsed
    ToolFinalized { id: String, name: String, args: Value },
    /// A result for a provider-executed tool arrived inside the stream
    ToolResult { id: String, output: Value },
    /// A reasoning item opened
    ReasoningStart {
        id: String,
        output_index: u32,
        sequence_number: u64,
    },
    /// Incremental reasoning summary text, keyed by summary part
    ReasoningDelta {
        id: String,
        summary_index: u32,
        text: String,
    },
    /// The reasoning item closed
    ReasoningComplete {
        id: String,
        combined_text: Option<String>,
    },
    /// State change of a builtin call (web search, code interpreter)
    BuiltinToolCall {
        id: String,
        kind: BuiltinCallKind,
        status: BuiltinCallStatus,
        code: Option<String>,
    },
    /// Pass-through for a frame the adapter does not recognize
    Unknown { frame: String },
    /// Vendor-reported stream error; terminal for the turn
    Error(String),
    /// Natural end of the vendor stream
    StreamEnd(ResponseMetadata),
}

/// Per-vendor stream adapter
///
/// Given the full ordered event history, opens a native streaming request
/// and yields the normalized vocabulary lazily, preserving frame order.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn stream_chat(&self, events: &[Event], config: &ChatConfig) -> Result<NormalizedStream>;
}

#[async_trait]
impl ChatTransport for Box<dyn ChatTransport> {
    async fn stream_chat(&self, events: &[Event], config: &ChatConfig) -> Result<NormalizedStream> {
        (**self).stream_chat(events, config).await
    }
}
