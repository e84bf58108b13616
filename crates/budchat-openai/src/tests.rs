// Unit tests for the OpenAI transports

use budchat_core::{ChatConfig, ChatTransport, Event, StreamEvent, ToolDefinition};
use futures::StreamExt;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::{CompletionsTransport, ResponsesTransport};

fn sse_body(frames: &[serde_json::Value]) -> String {
    let mut body = String::new();
    for frame in frames {
        body.push_str(&format!("data: {frame}\n\n"));
    }
    body
}

async fn collect(
    transport: &dyn ChatTransport,
    events: &[Event],
    config: &ChatConfig,
) -> Vec<StreamEvent> {
    let stream = transport.stream_chat(events, config).await.unwrap();
    stream
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect()
}

mod completions {
    use super::*;

    async fn mock_completions(frames: &[serde_json::Value], done: bool) -> MockServer {
        let mut body = sse_body(frames);
        if done {
            body.push_str("data: [DONE]\n\n");
        }
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"),
            )
            .mount(&server)
            .await;
        server
    }

    fn transport(server: &MockServer) -> CompletionsTransport {
        CompletionsTransport::with_base_url(
            "test-key",
            format!("{}/v1/chat/completions", server.uri()),
        )
    }

    #[tokio::test]
    async fn text_deltas_normalize_to_tokens() {
        let server = mock_completions(
            &[
                json!({"model": "gpt-4o-mini", "choices": [{"delta": {"content": "Hel"}}]}),
                json!({"choices": [{"delta": {"content": "lo"}}]}),
                json!({"choices": [{"delta": {}, "finish_reason": "stop"}]}),
            ],
            true,
        )
        .await;

        let events = collect(
            &transport(&server),
            &[Event::user("hi")],
            &ChatConfig::for_model("gpt-4o-mini"),
        )
        .await;

        assert_eq!(
            events,
            vec![
                StreamEvent::Token("Hel".into()),
                StreamEvent::Token("lo".into()),
                StreamEvent::StreamEnd(budchat_core::ResponseMetadata::complete(
                    0,
                    Some("gpt-4o-mini".into())
                )),
            ]
        );
    }

    #[tokio::test]
    async fn tool_call_fragments_accumulate_by_index() {
        let server = mock_completions(
            &[
                json!({"choices": [{"delta": {"tool_calls": [
                    {"index": 0, "id": "call_1", "function": {"name": "lookup", "arguments": ""}}
                ]}}]}),
                json!({"choices": [{"delta": {"tool_calls": [
                    {"index": 0, "function": {"arguments": "{\"city\":"}}
                ]}}]}),
                json!({"choices": [{"delta": {"tool_calls": [
                    {"index": 0, "function": {"arguments": "\"Oslo\"}"}}
                ]}}]}),
                json!({"choices": [{"delta": {}, "finish_reason": "tool_calls"}]}),
            ],
            true,
        )
        .await;

        let events = collect(
            &transport(&server),
            &[Event::user("weather?")],
            &ChatConfig::for_model("gpt-4o-mini"),
        )
        .await;

        assert!(matches!(
            &events[0],
            StreamEvent::ToolStart { id, name, .. } if id == "call_1" && name == "lookup"
        ));
        let arg_deltas: String = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::ToolArgumentsDelta { delta, .. } => Some(delta.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(arg_deltas, "{\"city\":\"Oslo\"}");
        assert!(events.iter().any(|e| matches!(
            e,
            StreamEvent::ToolFinalized { id, name, args }
                if id == "call_1" && name == "lookup" && args == &json!({"city": "Oslo"})
        )));
        assert!(matches!(events.last(), Some(StreamEvent::StreamEnd(m)) if m.complete));
    }

    #[tokio::test]
    async fn two_parallel_tool_calls_both_finalize() {
        let server = mock_completions(
            &[
                json!({"choices": [{"delta": {"tool_calls": [
                    {"index": 0, "id": "call_a", "function": {"name": "a", "arguments": "{}"}},
                    {"index": 1, "id": "call_b", "function": {"name": "b", "arguments": "{}"}}
                ]}}]}),
                json!({"choices": [{"delta": {}, "finish_reason": "tool_calls"}]}),
            ],
            true,
        )
        .await;

        let events = collect(
            &transport(&server),
            &[Event::user("both")],
            &ChatConfig::for_model("gpt-4o-mini"),
        )
        .await;

        let finalized: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::ToolFinalized { id, .. } => Some(id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(finalized, vec!["call_a", "call_b"]);
    }

    #[tokio::test]
    async fn malformed_chunk_passes_through_as_unknown() {
        let body = "data: not json at all\n\ndata: {\"choices\": [{\"delta\": {\"content\": \"ok\"}, \"finish_reason\": \"stop\"}]}\n\ndata: [DONE]\n\n";
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let events = collect(
            &transport(&server),
            &[Event::user("hi")],
            &ChatConfig::for_model("gpt-4o-mini"),
        )
        .await;

        assert!(matches!(&events[0], StreamEvent::Unknown { .. }));
        assert!(events.contains(&StreamEvent::Token("ok".into())));
    }

    #[tokio::test]
    async fn non_success_status_is_a_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let result = transport(&server)
            .stream_chat(&[Event::user("hi")], &ChatConfig::for_model("gpt-4o-mini"))
            .await;
        assert!(result.is_err());
    }
}

mod responses {
    use super::*;

    async fn mock_responses(frames: &[serde_json::Value]) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/responses"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(sse_body(frames), "text/event-stream"),
            )
            .mount(&server)
            .await;
        server
    }

    fn transport(server: &MockServer) -> ResponsesTransport {
        ResponsesTransport::with_base_url("test-key", format!("{}/v1/responses", server.uri()))
    }

    #[tokio::test]
    async fn reasoning_then_text_keeps_frame_order() {
        let server = mock_responses(&[
            json!({"type": "response.created"}),
            json!({"type": "response.output_item.added", "output_index": 0, "sequence_number": 1,
                   "item": {"type": "reasoning", "id": "rs_1"}}),
            json!({"type": "response.reasoning_summary_text.delta", "item_id": "rs_1",
                   "summary_index": 0, "delta": "thinking"}),
            json!({"type": "response.output_item.done", "output_index": 0,
                   "item": {"type": "reasoning", "id": "rs_1", "summary": [{"text": "thinking"}]}}),
            json!({"type": "response.output_text.delta", "delta": "42"}),
            json!({"type": "response.completed", "response": {"model": "gpt-5.2"}}),
        ])
        .await;

        let events = collect(
            &transport(&server),
            &[Event::user("?")],
            &ChatConfig::for_model("gpt-5.2"),
        )
        .await;

        assert_eq!(
            events,
            vec![
                StreamEvent::ReasoningStart {
                    id: "rs_1".into(),
                    output_index: 0,
                    sequence_number: 1,
                },
                StreamEvent::ReasoningDelta {
                    id: "rs_1".into(),
                    summary_index: 0,
                    text: "thinking".into(),
                },
                StreamEvent::ReasoningComplete {
                    id: "rs_1".into(),
                    combined_text: Some("thinking".into()),
                },
                StreamEvent::Token("42".into()),
                StreamEvent::StreamEnd(budchat_core::ResponseMetadata::complete(
                    0,
                    Some("gpt-5.2".into())
                )),
            ]
        );
    }

    #[tokio::test]
    async fn function_call_finalizes_exactly_once() {
        let server = mock_responses(&[
            json!({"type": "response.output_item.added", "output_index": 0, "sequence_number": 2,
                   "item": {"type": "function_call", "id": "fc_1", "call_id": "call_1",
                            "name": "lookup", "arguments": ""}}),
            json!({"type": "response.function_call_arguments.delta", "item_id": "fc_1",
                   "delta": "{\"q\":\"x\"}"}),
            json!({"type": "response.function_call_arguments.done", "item_id": "fc_1",
                   "arguments": "{\"q\":\"x\"}"}),
            json!({"type": "response.output_item.done", "output_index": 0,
                   "item": {"type": "function_call", "id": "fc_1", "call_id": "call_1",
                            "name": "lookup", "arguments": "{\"q\":\"x\"}"}}),
            json!({"type": "response.completed", "response": {"model": "o3"}}),
        ])
        .await;

        let events = collect(
            &transport(&server),
            &[Event::user("?")],
            &ChatConfig::for_model("o3"),
        )
        .await;

        // argument frames carry the item id; normalized events carry call_id
        assert!(matches!(
            &events[0],
            StreamEvent::ToolStart { id, .. } if id == "call_1"
        ));
        assert!(matches!(
            &events[1],
            StreamEvent::ToolArgumentsDelta { id, .. } if id == "call_1"
        ));
        let finalized = events
            .iter()
            .filter(|e| matches!(e, StreamEvent::ToolFinalized { .. }))
            .count();
        assert_eq!(finalized, 1);
        assert!(events.iter().any(|e| matches!(
            e,
            StreamEvent::ToolFinalized { id, args, .. }
                if id == "call_1" && args == &json!({"q": "x"})
        )));
    }

    #[tokio::test]
    async fn builtin_web_search_states_pass_through() {
        let server = mock_responses(&[
            json!({"type": "response.output_item.added", "output_index": 0,
                   "item": {"type": "web_search_call", "id": "ws_1"}}),
            json!({"type": "response.web_search_call.searching", "item_id": "ws_1"}),
            json!({"type": "response.web_search_call.completed", "item_id": "ws_1"}),
            json!({"type": "response.completed", "response": {"model": "gpt-5.2"}}),
        ])
        .await;

        let events = collect(
            &transport(&server),
            &[Event::user("search")],
            &ChatConfig::for_model("gpt-5.2"),
        )
        .await;

        let builtin = events
            .iter()
            .filter(|e| matches!(e, StreamEvent::BuiltinToolCall { .. }))
            .count();
        assert_eq!(builtin, 3);
        assert!(matches!(
            &events[events.len() - 2],
            StreamEvent::BuiltinToolCall {
                status: budchat_core::BuiltinCallStatus::Completed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn unrecognized_frame_type_becomes_unknown() {
        let server = mock_responses(&[
            json!({"type": "response.audio.delta", "delta": "???"}),
            json!({"type": "response.completed", "response": {}}),
        ])
        .await;

        let events = collect(
            &transport(&server),
            &[Event::user("hi")],
            &ChatConfig::for_model("gpt-5.2"),
        )
        .await;

        assert!(matches!(
            &events[0],
            StreamEvent::Unknown { frame } if frame == "response.audio.delta"
        ));
    }
}

mod conversion {
    use super::*;
    use crate::types::events_to_messages;
    use budchat_core::{Role, Segment};

    #[test]
    fn system_prompt_is_injected_once() {
        let config = ChatConfig {
            system_prompt: Some("be brief".into()),
            ..ChatConfig::for_model("gpt-4o-mini")
        };
        let messages = events_to_messages(&[Event::user("hi")], &config);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[0].content.as_deref(), Some("be brief"));

        // not injected when the log already carries a system event
        let messages = events_to_messages(
            &[Event::system("existing"), Event::user("hi")],
            &config,
        );
        assert_eq!(messages.iter().filter(|m| m.role == "system").count(), 1);
        assert_eq!(messages[0].content.as_deref(), Some("existing"));
    }

    #[test]
    fn tool_segments_fan_out_to_wire_messages() {
        let assistant = Event::new(
            Role::Assistant,
            vec![Segment::ToolCall {
                id: "call_1".into(),
                name: "lookup".into(),
                args: json!({"q": "x"}),
                server_label: None,
                output_index: 0,
                sequence_number: 1,
                status: budchat_core::ToolCallStatus::Completed,
            }],
        );
        let tool = Event::tool_result("call_1", json!({"hits": 3}), None);

        let messages = events_to_messages(
            &[Event::user("q"), assistant, tool],
            &ChatConfig::for_model("gpt-4o-mini"),
        );

        assert_eq!(messages.len(), 3);
        let call = messages[1].tool_calls.as_ref().unwrap();
        assert_eq!(call[0].id, "call_1");
        assert_eq!(call[0].function.arguments, "{\"q\":\"x\"}");
        assert_eq!(messages[2].role, "tool");
        assert_eq!(messages[2].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(messages[2].content.as_deref(), Some("{\"hits\":3}"));
    }

    #[test]
    fn failing_tool_result_carries_the_error_text() {
        let tool = Event::tool_result("call_1", serde_json::Value::Null, Some("timeout".into()));
        let messages = events_to_messages(&[tool], &ChatConfig::for_model("gpt-4o-mini"));
        assert_eq!(messages[0].content.as_deref(), Some("Error: timeout"));
    }

    #[test]
    fn tools_convert_to_function_declarations() {
        let config = ChatConfig {
            tools: vec![ToolDefinition {
                name: "lookup".into(),
                description: "search".into(),
                parameters: json!({"type": "object"}),
            }],
            ..ChatConfig::for_model("gpt-4o-mini")
        };
        let tools = crate::types::tools_to_wire(&config.tools).unwrap();
        assert_eq!(tools[0].r#type, "function");
        assert_eq!(tools[0].function.name, "lookup");
    }
}
