use agproxy_protocol::claude::create_message::request::CreateMessageRequestBody;
use agproxy_protocol::gemini::generate_content::types::FunctionCallingMode;
use agproxy_protocol::gemini::types::{ContentRole, Part};
use agproxy_transform::SchemaSanitizer;
use agproxy_transform::generate_content::claude2gemini::request::{
    DUMMY_THOUGHT_SIGNATURE, SYNTHETIC_THINKING_TEXT, TOOL_RESULT_EMPTY_ERROR,
    TOOL_RESULT_EMPTY_SUCCESS, TransformOptions, tool_result_text, transform_request,
};
use serde_json::{Value as JsonValue, json};

fn parse(body: JsonValue) -> CreateMessageRequestBody {
    serde_json::from_value(body).unwrap()
}

fn transform(body: JsonValue, model: &str) -> agproxy_protocol::gemini::generate_content::GenerateContentRequestBody {
    transform_request(
        &parse(body),
        model,
        &TransformOptions::default(),
        &SchemaSanitizer::new(false),
    )
}

fn result_text(part: &Part) -> &str {
    part.function_response.as_ref().unwrap().response["result"]
        .as_str()
        .unwrap()
}

#[test]
fn empty_tool_result_uses_fixed_sentences() {
    for (is_error, expected) in [
        (false, TOOL_RESULT_EMPTY_SUCCESS),
        (true, TOOL_RESULT_EMPTY_ERROR),
    ] {
        let out = transform(
            json!({
                "model": "claude-sonnet-4-5",
                "messages": [{
                    "role": "user",
                    "content": [{"type": "tool_result", "tool_use_id": "toolu_1", "content": "", "is_error": is_error}]
                }]
            }),
            "claude-sonnet-4-5",
        );
        assert_eq!(result_text(&out.contents[0].parts[0]), expected);
    }
}

#[test]
fn tool_result_content_shapes_reduce_to_text() {
    assert_eq!(
        tool_result_text(Some(&json!([{"type": "text", "text": "a"}, {"type": "text", "text": "b"}])), false),
        "a\nb"
    );
    assert_eq!(tool_result_text(Some(&json!("  ")), true), TOOL_RESULT_EMPTY_ERROR);
    assert_eq!(tool_result_text(Some(&json!({"k": 1})), false), r#"{"k":1}"#);
    assert_eq!(tool_result_text(None, false), TOOL_RESULT_EMPTY_SUCCESS);
}

#[test]
fn tool_result_recovers_function_name_from_earlier_tool_use() {
    let out = transform(
        json!({
            "model": "claude-sonnet-4-5",
            "messages": [
                {"role": "user", "content": "list files"},
                {"role": "assistant", "content": [
                    {"type": "tool_use", "id": "toolu_1", "name": "ls", "input": {"path": "."}}
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "toolu_1", "content": [{"type": "text", "text": "a.txt"}]}
                ]}
            ]
        }),
        "claude-sonnet-4-5",
    );
    let response = out.contents[2].parts[0].function_response.as_ref().unwrap();
    assert_eq!(response.name, "ls");
    assert_eq!(response.id.as_deref(), Some("toolu_1"));
    assert_eq!(response.response, json!({"result": "a.txt"}));

    let call = out.contents[1].parts[0].function_call.as_ref().unwrap();
    assert_eq!(call.args, Some(json!({"path": "."})));
    assert_eq!(out.contents[1].role, Some(ContentRole::Model));
}

#[test]
fn synthetic_prefill_only_on_final_assistant_turn() {
    let messages = json!([
        {"role": "user", "content": "hi"},
        {"role": "assistant", "content": [{"type": "text", "text": "earlier answer"}]},
        {"role": "user", "content": "again"},
        {"role": "assistant", "content": [{"type": "text", "text": "partial"}]}
    ]);
    let out = transform(
        json!({
            "model": "claude-haiku-4-5",
            "thinking": {"type": "enabled", "budget_tokens": 1024},
            "messages": messages
        }),
        "gemini-3-flash",
    );

    let last = out.contents.last().unwrap();
    let thoughts: Vec<&Part> = last.parts.iter().filter(|part| part.is_thought()).collect();
    assert_eq!(thoughts.len(), 1);
    assert!(last.parts[0].is_thought());
    assert_eq!(last.parts[0].text.as_deref(), Some(SYNTHETIC_THINKING_TEXT));
    assert_eq!(
        last.parts[0].thought_signature.as_deref(),
        Some(DUMMY_THOUGHT_SIGNATURE)
    );

    let earlier = &out.contents[1];
    assert_eq!(earlier.role, Some(ContentRole::Model));
    assert!(earlier.parts.iter().all(|part| !part.is_thought()));
}

#[test]
fn no_prefill_without_thinking_or_for_genuine_backends() {
    let messages = json!([
        {"role": "user", "content": "hi"},
        {"role": "assistant", "content": "partial"}
    ]);
    let out = transform(
        json!({"model": "m", "messages": messages.clone()}),
        "gemini-3-flash",
    );
    assert!(out.contents[1].parts.iter().all(|part| !part.is_thought()));

    let out = transform(
        json!({
            "model": "m",
            "thinking": {"type": "enabled", "budget_tokens": 1024},
            "messages": messages
        }),
        "claude-sonnet-4-5-thinking",
    );
    assert!(out.contents[1].parts.iter().all(|part| !part.is_thought()));
}

#[test]
fn unsigned_thinking_downgrades_for_genuine_backends() {
    let out = transform(
        json!({
            "model": "claude-sonnet-4-5-20250929",
            "thinking": {"type": "enabled", "budget_tokens": 2048},
            "messages": [
                {"role": "user", "content": "q"},
                {"role": "assistant", "content": [
                    {"type": "thinking", "thinking": "let me think"},
                    {"type": "text", "text": "answer"}
                ]},
                {"role": "user", "content": "more"}
            ]
        }),
        "claude-sonnet-4-5-thinking",
    );
    let assistant = &out.contents[1];
    assert_eq!(assistant.parts[0].text.as_deref(), Some("let me think"));
    assert!(!assistant.parts[0].is_thought());
    let config = out.generation_config.unwrap();
    assert!(config.thinking_config.is_none());
}

#[test]
fn signed_thinking_keeps_signature_and_thinking_config() {
    let out = transform(
        json!({
            "model": "claude-opus-4-5-20251101",
            "thinking": {"type": "enabled", "budget_tokens": 4096},
            "messages": [
                {"role": "user", "content": "q"},
                {"role": "assistant", "content": [
                    {"type": "thinking", "thinking": "trace", "signature": "sig-abc"},
                    {"type": "tool_use", "id": "t1", "name": "f", "input": {}, "signature": DUMMY_THOUGHT_SIGNATURE}
                ]}
            ]
        }),
        "claude-opus-4-5-thinking",
    );
    let assistant = &out.contents[1];
    assert!(assistant.parts[0].is_thought());
    assert_eq!(assistant.parts[0].thought_signature.as_deref(), Some("sig-abc"));
    // The dummy sentinel is never forwarded to a signature-checking backend.
    assert_eq!(assistant.parts[1].thought_signature, None);
    let thinking = out.generation_config.unwrap().thinking_config.unwrap();
    assert!(thinking.include_thoughts);
    assert_eq!(thinking.thinking_budget, Some(4096));
}

#[test]
fn flash_budget_is_capped() {
    let out = transform(
        json!({
            "model": "m",
            "thinking": {"type": "enabled", "budget_tokens": 50000},
            "messages": [{"role": "user", "content": "q"}]
        }),
        "gemini-2.5-flash",
    );
    let thinking = out.generation_config.unwrap().thinking_config.unwrap();
    assert_eq!(thinking.thinking_budget, Some(24576));
}

#[test]
fn placeholder_text_is_dropped() {
    let out = transform(
        json!({
            "model": "m",
            "messages": [
                {"role": "user", "content": "(no content)"},
                {"role": "user", "content": [{"type": "text", "text": "  "}, {"type": "text", "text": "kept"}]}
            ]
        }),
        "claude-sonnet-4-5",
    );
    assert_eq!(out.contents.len(), 1);
    assert_eq!(out.contents[0].parts, vec![Part::text("kept")]);
}

#[test]
fn system_instruction_has_identity_patch_then_text_blocks() {
    let out = transform(
        json!({
            "model": "m",
            "system": [
                {"type": "text", "text": "be brief"},
                {"type": "image", "text": "ignored"},
                {"type": "text", "text": "   "}
            ],
            "messages": [{"role": "user", "content": "q"}]
        }),
        "claude-sonnet-4-5",
    );
    let system = out.system_instruction.unwrap();
    assert_eq!(system.role, Some(ContentRole::User));
    assert_eq!(system.parts.len(), 2);
    let identity = system.parts[0].text.as_deref().unwrap();
    assert!(identity.starts_with("<identity>\\nYou are Antigravity, a powerful agentic AI"));
    for section in [
        "<tool_calling>",
        "<web_application_development>",
        "<ephemeral_message>",
        "<communication_style>",
    ] {
        assert!(identity.contains(section), "missing {section}");
    }
    assert!(identity.ends_with("</communication_style>"));
    assert_eq!(system.parts[1], Part::text("be brief"));

    let custom = transform_request(
        &parse(json!({"model": "m", "messages": [{"role": "user", "content": "q"}]})),
        "claude-sonnet-4-5",
        &TransformOptions {
            identity_patch: Some("  stay in character  ".to_string()),
            ..TransformOptions::default()
        },
        &SchemaSanitizer::new(false),
    );
    assert_eq!(
        custom.system_instruction.unwrap().parts,
        vec![Part::text("stay in character")]
    );

    let without_patch = transform_request(
        &parse(json!({"model": "m", "messages": [{"role": "user", "content": "q"}]})),
        "claude-sonnet-4-5",
        &TransformOptions {
            identity_patch: None,
            ..TransformOptions::default()
        },
        &SchemaSanitizer::new(false),
    );
    assert!(without_patch.system_instruction.is_none());
}

#[test]
fn tools_are_sanitized_and_validated_mode_is_set() {
    let out = transform(
        json!({
            "model": "m",
            "messages": [{"role": "user", "content": "q"}],
            "tools": [
                {"name": "read", "description": "read a file", "input_schema": {
                    "type": "object",
                    "properties": {"path": {"type": "string", "minLength": 1}},
                    "required": ["path"]
                }},
                {"name": "noop"},
                {"name": "", "input_schema": {"type": "object"}},
                {"name": "broken", "type": "custom", "custom": {"description": "no schema"}},
                {"name": "wrapped", "type": "custom", "custom": {"description": "d", "input_schema": {"type": "object"}}}
            ]
        }),
        "claude-sonnet-4-5",
    );
    let tools = out.tools.unwrap();
    let declarations = tools[0].function_declarations.as_ref().unwrap();
    let names: Vec<&str> = declarations.iter().map(|decl| decl.name.as_str()).collect();
    assert_eq!(names, vec!["read", "noop", "wrapped"]);
    assert_eq!(
        declarations[0].parameters,
        Some(json!({
            "type": "OBJECT",
            "properties": {"path": {"type": "STRING"}},
            "required": ["path"]
        }))
    );
    assert_eq!(
        declarations[1].parameters,
        Some(json!({"type": "OBJECT", "properties": {}}))
    );
    assert_eq!(declarations[2].description, "d");
    assert_eq!(
        out.tool_config.unwrap().function_calling_config.mode,
        FunctionCallingMode::Validated
    );
}

#[test]
fn web_search_replaces_function_declarations() {
    let out = transform(
        json!({
            "model": "m",
            "messages": [{"role": "user", "content": "q"}],
            "tools": [
                {"name": "web_search", "type": "web_search_20250305"},
                {"name": "read", "input_schema": {"type": "object"}}
            ]
        }),
        "gemini-3-pro-high",
    );
    let value = serde_json::to_value(out.tools.unwrap()).unwrap();
    assert_eq!(
        value,
        json!([{"googleSearch": {"enhancedContent": {"imageSearch": {"maxResultCount": 5}}}}])
    );
}

#[test]
fn metadata_user_id_becomes_session_and_sampling_passes_through() {
    let out = transform(
        json!({
            "model": "m",
            "temperature": 0.3,
            "top_k": 40,
            "metadata": {"user_id": "user-42"},
            "messages": [{"role": "user", "content": "q"}]
        }),
        "claude-sonnet-4-5",
    );
    assert_eq!(out.session_id.as_deref(), Some("user-42"));
    let config = out.generation_config.unwrap();
    assert_eq!(config.temperature, Some(0.3));
    assert_eq!(config.top_k, Some(40));
    assert_eq!(config.top_p, None);
    assert_eq!(config.max_output_tokens, Some(64000));
    assert!(out.safety_settings.unwrap().len() >= 4);
}

#[test]
fn base64_images_become_inline_data() {
    let out = transform(
        json!({
            "model": "m",
            "messages": [{"role": "user", "content": [
                {"type": "image", "source": {"type": "base64", "media_type": "image/png", "data": "iVBOR"}},
                {"type": "image", "source": {"type": "url", "url": "https://example.com/a.png"}}
            ]}]
        }),
        "gemini-3-flash",
    );
    let parts = &out.contents[0].parts;
    assert_eq!(parts.len(), 1);
    let blob = parts[0].inline_data.as_ref().unwrap();
    assert_eq!(blob.mime_type, "image/png");
    assert_eq!(blob.data, "iVBOR");
}
