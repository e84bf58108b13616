// OpenAI Transport Adapters
//
// Two ChatTransport implementations over OpenAI-shaped wire protocols:
// - CompletionsTransport: classic chat-completion SSE chunks
// - ResponsesTransport: typed semantic events with reasoning summaries
//   and provider-executed builtin tools
//
// Both normalize into the internal StreamEvent vocabulary, preserve frame
// order, and pass unrecognized frames through as Unknown rather than
// aborting the stream.

pub mod completions;
pub mod responses;
pub mod types;

#[cfg(test)]
mod tests;

pub use completions::CompletionsTransport;
pub use responses::ResponsesTransport;
