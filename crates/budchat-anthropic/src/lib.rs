// Anthropic Transport Adapter
//
// ChatTransport implementation over the Messages API. Streams normalize
// into the internal vocabulary: text_delta -> Token, tool_use blocks ->
// ToolStart/ToolArgumentsDelta/ToolFinalized, thinking blocks ->
// reasoning events. Pings are tolerated; unrecognized frames pass
// through as Unknown.

pub mod messages;


pub use messages::MessagesTransport;
