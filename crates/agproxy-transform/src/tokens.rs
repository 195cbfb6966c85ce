use serde_json::Value as JsonValue;

/// Rough local estimate, four characters per token.
pub fn estimate_tokens_from_text(text: &str) -> u32 {
    let chars = u32::try_from(text.chars().count()).unwrap_or(u32::MAX);
    chars.div_ceil(4)
}

/// Estimates a Gemini `countTokens` body from its text parts.
///
/// Accepts both `{contents:[...]}` and `{generateContentRequest:{contents:[...]}}`;
/// bodies without any text part are estimated from their raw JSON.
pub fn estimate_gemini_request_tokens(body: &[u8]) -> u32 {
    let Ok(value) = serde_json::from_slice::<JsonValue>(body) else {
        return estimate_tokens_from_text(&String::from_utf8_lossy(body));
    };
    let request = value.get("generateContentRequest").unwrap_or(&value);

    let mut text = String::new();
    if let Some(system) = request.get("systemInstruction") {
        collect_part_text(system, &mut text);
    }
    if let Some(contents) = request.get("contents").and_then(JsonValue::as_array) {
        for content in contents {
            collect_part_text(content, &mut text);
        }
    }
    if text.is_empty() {
        return estimate_tokens_from_text(&value.to_string());
    }
    estimate_tokens_from_text(&text)
}

fn collect_part_text(content: &JsonValue, out: &mut String) {
    let Some(parts) = content.get("parts").and_then(JsonValue::as_array) else {
        return;
    };
    for part in parts {
        if let Some(text) = part.get("text").and_then(JsonValue::as_str) {
            out.push_str(text);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_up() {
        assert_eq!(estimate_tokens_from_text(""), 0);
        assert_eq!(estimate_tokens_from_text("abcde"), 2);
        assert_eq!(estimate_tokens_from_text("日本語です"), 2);
    }

    #[test]
    fn counts_text_parts_only() {
        let body = br#"{"contents":[{"role":"user","parts":[{"text":"12345678"},{"inlineData":{"mimeType":"image/png","data":"AAAA"}}]}]}"#;
        assert_eq!(estimate_gemini_request_tokens(body), 2);
        let wrapped = br#"{"generateContentRequest":{"contents":[{"parts":[{"text":"1234"}]}]}}"#;
        assert_eq!(estimate_gemini_request_tokens(wrapped), 1);
    }
}
