use agproxy_protocol::claude::create_message::response::{
    ContentBlock as ClaudeContentBlock, CreateMessageResponse, MessageType,
};
use agproxy_protocol::claude::types::{MessageRole, StopReason, Usage as ClaudeUsage};
use agproxy_protocol::gemini::generate_content::response::GenerateContentResponse;
use agproxy_protocol::gemini::generate_content::types::FinishReason;
use agproxy_protocol::gemini::types::{FunctionCall as GeminiFunctionCall, Part as GeminiPart};
use serde_json::json;

use crate::error::TransformError;
use crate::generate_content::gemini_internal::unwrap_response_value;
use crate::usage::UsageSnapshot;

/// Decodes a (possibly enveloped) Gemini body and re-encodes it as a Claude message.
pub fn transform_response_bytes(
    body: &[u8],
    original_model: &str,
) -> Result<(Vec<u8>, UsageSnapshot), TransformError> {
    let value = unwrap_response_value(body)
        .map_err(|err| TransformError::InvalidResponse(err.to_string()))?;
    let response: GenerateContentResponse = serde_json::from_value(value)
        .map_err(|err| TransformError::InvalidResponse(err.to_string()))?;
    let (message, usage) = transform_response(response, original_model);
    let bytes = serde_json::to_vec(&message)
        .map_err(|err| TransformError::InvalidResponse(err.to_string()))?;
    Ok((bytes, usage))
}

pub fn transform_response(
    response: GenerateContentResponse,
    original_model: &str,
) -> (CreateMessageResponse, UsageSnapshot) {
    let usage = response
        .usage_metadata
        .as_ref()
        .map(UsageSnapshot::from_gemini)
        .unwrap_or_default();

    let mut content = Vec::new();
    let mut finish_reason = None;
    if let Some(candidate) = response.candidates.into_iter().next() {
        finish_reason = candidate.finish_reason;
        for part in candidate.content.parts {
            push_part(&mut content, part);
        }
    }

    let has_tool_use = content
        .iter()
        .any(|block| matches!(block, ClaudeContentBlock::ToolUse { .. }));
    let stop_reason = map_stop_reason(finish_reason, has_tool_use);

    let message = CreateMessageResponse {
        id: message_id(response.response_id.as_deref()),
        r#type: MessageType::Message,
        role: MessageRole::Assistant,
        content,
        model: original_model.to_string(),
        stop_reason: Some(stop_reason),
        stop_sequence: None,
        usage: ClaudeUsage {
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            cache_creation_input_tokens: usage.cache_creation_input_tokens,
            cache_read_input_tokens: usage.cache_read_input_tokens,
        },
    };
    (message, usage)
}

fn push_part(content: &mut Vec<ClaudeContentBlock>, part: GeminiPart) {
    let is_thought = part.is_thought();
    let GeminiPart {
        text,
        function_call,
        thought_signature,
        ..
    } = part;

    if let Some(call) = function_call {
        content.push(tool_use_block(call, thought_signature));
        return;
    }

    let Some(text) = text else {
        if let Some(signature) = thought_signature {
            attach_signature(content, signature);
        }
        return;
    };

    if is_thought {
        match content.last_mut() {
            Some(ClaudeContentBlock::Thinking {
                thinking,
                signature,
            }) if signature.is_empty() => {
                thinking.push_str(&text);
                if let Some(incoming) = thought_signature {
                    *signature = incoming;
                }
            }
            _ => content.push(ClaudeContentBlock::Thinking {
                thinking: text,
                signature: thought_signature.unwrap_or_default(),
            }),
        }
        return;
    }

    if let Some(signature) = thought_signature {
        attach_signature(content, signature);
    }
    if text.is_empty() {
        return;
    }
    match content.last_mut() {
        Some(ClaudeContentBlock::Text { text: existing }) => existing.push_str(&text),
        _ => content.push(ClaudeContentBlock::Text { text }),
    }
}

/// Gemini may place the signature for a thought on the following part.
fn attach_signature(content: &mut [ClaudeContentBlock], incoming: String) {
    let last_thinking = content.iter_mut().rev().find_map(|block| match block {
        ClaudeContentBlock::Thinking { signature, .. } => Some(signature),
        _ => None,
    });
    if let Some(signature) = last_thinking
        && signature.is_empty()
    {
        *signature = incoming;
    }
}

pub(crate) fn tool_use_block(
    call: GeminiFunctionCall,
    signature: Option<String>,
) -> ClaudeContentBlock {
    ClaudeContentBlock::ToolUse {
        id: call
            .id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(generate_tool_use_id),
        name: call.name,
        input: call.args.unwrap_or_else(|| json!({})),
        signature,
    }
}

pub(crate) fn generate_tool_use_id() -> String {
    format!("toolu_{}", uuid::Uuid::new_v4().simple())
}

pub(crate) fn message_id(response_id: Option<&str>) -> String {
    match response_id.filter(|id| !id.is_empty()) {
        Some(id) => format!("msg_{id}"),
        None => format!("msg_{}", uuid::Uuid::new_v4().simple()),
    }
}

pub(crate) fn map_stop_reason(finish: Option<FinishReason>, has_tool_use: bool) -> StopReason {
    if has_tool_use {
        return StopReason::ToolUse;
    }
    match finish {
        Some(FinishReason::MaxTokens) => StopReason::MaxTokens,
        _ => StopReason::EndTurn,
    }
}
