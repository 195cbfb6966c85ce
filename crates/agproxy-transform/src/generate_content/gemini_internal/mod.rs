//! Envelope handling for the `v1internal` API.

pub mod stream;

use agproxy_protocol::gemini::generate_content::UsageMetadata;
use agproxy_protocol::gemini::internal::V1InternalRequest;
use serde_json::Value as JsonValue;

use crate::usage::UsageSnapshot;

pub use stream::GeminiPassthroughTranscoder;

pub const INTERNAL_USER_AGENT: &str = "antigravity";

pub fn request_type_for_model(model: &str) -> &'static str {
    if model.contains("image") {
        "image_gen"
    } else {
        "agent"
    }
}

pub fn wrap_request<R>(project: &str, model: &str, request: R) -> V1InternalRequest<R> {
    V1InternalRequest {
        project: project.to_string(),
        request_id: format!("agent-{}", uuid::Uuid::new_v4()),
        user_agent: INTERNAL_USER_AGENT.to_string(),
        request_type: request_type_for_model(model).to_string(),
        model: model.to_string(),
        request,
    }
}

/// Returns the `response` member when present, otherwise the whole document.
pub fn unwrap_response_value(body: &[u8]) -> Result<JsonValue, serde_json::Error> {
    let value: JsonValue = serde_json::from_slice(body)?;
    Ok(match value {
        JsonValue::Object(mut map) => match map.remove("response") {
            Some(inner) => inner,
            None => JsonValue::Object(map),
        },
        other => other,
    })
}

/// Like [`unwrap_response_value`] but passes unparsable bodies through untouched.
pub fn unwrap_response_bytes(body: &[u8]) -> Vec<u8> {
    match unwrap_response_value(body) {
        Ok(value) => serde_json::to_vec(&value).unwrap_or_else(|_| body.to_vec()),
        Err(_) => body.to_vec(),
    }
}

pub fn extract_gemini_usage(response: &JsonValue) -> Option<UsageSnapshot> {
    let metadata = response.get("usageMetadata")?;
    let metadata: UsageMetadata = serde_json::from_value(metadata.clone()).ok()?;
    Some(UsageSnapshot::from_gemini(&metadata))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unwraps_response_member() {
        let body = br#"{"response":{"candidates":[]},"traceId":"t"}"#;
        assert_eq!(unwrap_response_value(body).unwrap(), json!({"candidates": []}));
        let bare = br#"{"candidates":[]}"#;
        assert_eq!(unwrap_response_value(bare).unwrap(), json!({"candidates": []}));
        assert_eq!(unwrap_response_bytes(b"not json"), b"not json".to_vec());
    }

    #[test]
    fn envelope_shape() {
        let wrapped = wrap_request("proj-1", "gemini-3-pro-image", json!({"contents": []}));
        let value = serde_json::to_value(&wrapped).unwrap();
        assert_eq!(value["project"], json!("proj-1"));
        assert_eq!(value["requestType"], json!("image_gen"));
        assert_eq!(value["userAgent"], json!("antigravity"));
        assert!(value["requestId"].as_str().unwrap().starts_with("agent-"));
        assert_eq!(value["request"], json!({"contents": []}));
    }

    #[test]
    fn usage_from_metadata() {
        let usage = extract_gemini_usage(&json!({
            "usageMetadata": {"promptTokenCount": 9, "candidatesTokenCount": 4}
        }))
        .unwrap();
        assert_eq!(usage.input_tokens, 9);
        assert_eq!(usage.output_tokens, 4);
        assert!(extract_gemini_usage(&json!({})).is_none());
    }
}
