use agproxy_protocol::claude::create_message::response::ContentBlock;
use agproxy_protocol::claude::types::StopReason;
use agproxy_protocol::sse::{SseLine, SseLineDecoder};
use agproxy_transform::generate_content::claude2gemini::{
    ClaudeStreamTranscoder, transform_response_bytes,
};
use agproxy_transform::{Emitted, SseTranscoder, UsageAccumulator};
use serde_json::{Value as JsonValue, json};

fn enveloped(response: JsonValue) -> String {
    json!({ "response": response, "traceId": "t-1" }).to_string()
}

/// Splits transcoder output into `(event name, data)` pairs.
fn frames(bytes: &[u8]) -> Vec<(String, JsonValue)> {
    let mut decoder = SseLineDecoder::new();
    let mut lines = decoder.push_bytes(bytes).unwrap();
    lines.extend(decoder.finish());

    let mut out = Vec::new();
    let mut event = None;
    for line in lines {
        match line {
            SseLine::Other(line) if line.starts_with("event:") => {
                event = Some(line.trim_start_matches("event:").trim().to_string());
            }
            SseLine::Data(data) => {
                let name = event.take().unwrap();
                out.push((name, serde_json::from_str(&data).unwrap()));
            }
            _ => {}
        }
    }
    out
}

fn names(frames: &[(String, JsonValue)]) -> Vec<&str> {
    frames.iter().map(|(name, _)| name.as_str()).collect()
}

#[test]
fn non_stream_response_keeps_original_model_and_usage() {
    let body = enveloped(json!({
        "candidates": [{
            "content": {"role": "model", "parts": [
                {"text": "plan", "thought": true},
                {"text": "Hello", "thoughtSignature": "sig-1"},
                {"text": " world"}
            ]},
            "finishReason": "STOP"
        }],
        "usageMetadata": {
            "promptTokenCount": 50,
            "cachedContentTokenCount": 10,
            "candidatesTokenCount": 7,
            "thoughtsTokenCount": 3
        },
        "responseId": "abc"
    }));

    let (bytes, usage) =
        transform_response_bytes(body.as_bytes(), "claude-sonnet-4-5-20250929").unwrap();
    let message: JsonValue = serde_json::from_slice(&bytes).unwrap();

    assert_eq!(message["model"], "claude-sonnet-4-5-20250929");
    assert_eq!(message["id"], "msg_abc");
    assert_eq!(message["stop_reason"], "end_turn");
    assert_eq!(
        message["content"],
        json!([
            {"type": "thinking", "thinking": "plan", "signature": "sig-1"},
            {"type": "text", "text": "Hello world"}
        ])
    );
    assert_eq!(usage.input_tokens, 40);
    assert_eq!(usage.cache_read_input_tokens, 10);
    assert_eq!(usage.output_tokens, 10);
    assert_eq!(message["usage"]["input_tokens"], 40);
}

#[test]
fn non_stream_function_call_sets_tool_use_stop() {
    let body = json!({
        "candidates": [{
            "content": {"parts": [{"functionCall": {"name": "ls", "args": {"path": "/"}}}]},
            "finishReason": "STOP"
        }]
    })
    .to_string();

    let (bytes, _) = transform_response_bytes(body.as_bytes(), "claude-opus-4-5").unwrap();
    let message: agproxy_protocol::claude::create_message::response::CreateMessageResponse =
        serde_json::from_slice(&bytes).unwrap();
    assert_eq!(message.stop_reason, Some(StopReason::ToolUse));
    match &message.content[0] {
        ContentBlock::ToolUse { id, name, input, .. } => {
            assert!(id.starts_with("toolu_"));
            assert_eq!(name, "ls");
            assert_eq!(input, &json!({"path": "/"}));
        }
        other => panic!("unexpected block {other:?}"),
    }
}

#[test]
fn non_stream_max_tokens_maps_stop_reason() {
    let body = json!({
        "candidates": [{"content": {"parts": [{"text": "cut"}]}, "finishReason": "MAX_TOKENS"}]
    })
    .to_string();
    let (bytes, _) = transform_response_bytes(body.as_bytes(), "m").unwrap();
    let message: JsonValue = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(message["stop_reason"], "max_tokens");
}

#[test]
fn non_stream_rejects_garbage() {
    assert!(transform_response_bytes(b"not json", "m").is_err());
}

#[test]
fn stream_emits_claude_event_sequence() {
    let mut transcoder = ClaudeStreamTranscoder::new("claude-sonnet-4-5");
    let mut out = Emitted::new();

    transcoder.on_data(
        &enveloped(json!({
            "candidates": [{"content": {"parts": [{"text": "hmm", "thought": true}]}}],
            "usageMetadata": {"promptTokenCount": 20}
        })),
        &mut out,
    );
    transcoder.on_data(
        &enveloped(json!({
            "candidates": [{"content": {"parts": [{"text": "Hi", "thoughtSignature": "sig-9"}]}}]
        })),
        &mut out,
    );
    transcoder.on_data(
        &enveloped(json!({
            "candidates": [{"content": {"parts": [{"text": "!"}]}, "finishReason": "STOP"}],
            "usageMetadata": {"promptTokenCount": 20, "candidatesTokenCount": 4}
        })),
        &mut out,
    );

    let frames = frames(&out.bytes);
    assert_eq!(
        names(&frames),
        vec![
            "message_start",
            "content_block_start",
            "content_block_delta",
            "content_block_delta",
            "content_block_stop",
            "content_block_start",
            "content_block_delta",
            "content_block_delta",
            "content_block_stop",
            "message_delta",
            "message_stop",
        ]
    );
    assert_eq!(frames[0].1["message"]["model"], "claude-sonnet-4-5");
    assert_eq!(frames[0].1["message"]["usage"]["input_tokens"], 20);
    assert_eq!(frames[2].1["delta"], json!({"type": "thinking_delta", "thinking": "hmm"}));
    assert_eq!(frames[3].1["delta"], json!({"type": "signature_delta", "signature": "sig-9"}));
    assert_eq!(frames[5].1["index"], 1);
    assert_eq!(frames[6].1["delta"], json!({"type": "text_delta", "text": "Hi"}));
    assert_eq!(frames[9].1["delta"]["stop_reason"], "end_turn");
    assert_eq!(frames[9].1["usage"]["output_tokens"], 4);

    let mut acc = UsageAccumulator::new();
    for observation in out.usage {
        acc.observe(observation);
    }
    assert_eq!(acc.snapshot().input_tokens, 20);
    assert_eq!(acc.snapshot().output_tokens, 4);

    // Anything after the final frame is ignored.
    let mut tail = Emitted::new();
    transcoder.on_done(&mut tail);
    assert!(tail.is_empty());
}

#[test]
fn stream_tool_call_is_a_complete_block() {
    let mut transcoder = ClaudeStreamTranscoder::new("m");
    let mut out = Emitted::new();
    transcoder.on_data(
        &enveloped(json!({
            "candidates": [{
                "content": {"parts": [
                    {"text": "Looking"},
                    {"functionCall": {"id": "call_1", "name": "read", "args": {"p": 1}}}
                ]},
                "finishReason": "STOP"
            }]
        })),
        &mut out,
    );

    let frames = frames(&out.bytes);
    let tool_start = frames
        .iter()
        .find(|(name, data)| {
            name == "content_block_start" && data["content_block"]["type"] == "tool_use"
        })
        .unwrap();
    assert_eq!(tool_start.1["content_block"]["id"], "call_1");
    assert_eq!(tool_start.1["content_block"]["input"], json!({}));

    let partial = frames
        .iter()
        .find(|(_, data)| data["delta"]["type"] == "input_json_delta")
        .unwrap();
    assert_eq!(partial.1["delta"]["partial_json"], r#"{"p":1}"#);

    let delta = frames.iter().find(|(name, _)| name == "message_delta").unwrap();
    assert_eq!(delta.1["delta"]["stop_reason"], "tool_use");
}

#[test]
fn stream_without_finish_reason_is_closed_on_done() {
    let mut transcoder = ClaudeStreamTranscoder::new("m");
    let mut out = Emitted::new();
    transcoder.on_data(
        &json!({"candidates": [{"content": {"parts": [{"text": "partial"}]}}]}).to_string(),
        &mut out,
    );
    transcoder.on_done(&mut out);

    let frames = frames(&out.bytes);
    assert_eq!(
        names(&frames)[frames.len() - 3..],
        ["content_block_stop", "message_delta", "message_stop"]
    );
}

#[test]
fn empty_stream_still_produces_a_message() {
    let mut transcoder = ClaudeStreamTranscoder::new("m");
    let mut out = Emitted::new();
    transcoder.on_data("{not json", &mut out);
    assert!(out.is_empty());
    transcoder.finish(&mut out);

    let frames = frames(&out.bytes);
    assert_eq!(names(&frames), vec!["message_start", "message_delta", "message_stop"]);
    assert_eq!(frames[1].1["delta"]["stop_reason"], "end_turn");
}
