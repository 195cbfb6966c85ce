use agproxy_protocol::sse::encode_data_line;

use crate::generate_content::gemini_internal::{extract_gemini_usage, unwrap_response_value};
use crate::transcoder::{Emitted, SseTranscoder};
use crate::usage::UsageObservation;

/// Native Gemini streaming: every `data:` payload is unwrapped from the
/// envelope, everything else passes through.
#[derive(Debug, Default)]
pub struct GeminiPassthroughTranscoder;

impl GeminiPassthroughTranscoder {
    pub fn new() -> Self {
        Self
    }
}

impl SseTranscoder for GeminiPassthroughTranscoder {
    fn on_data(&mut self, payload: &str, out: &mut Emitted) {
        let data = match unwrap_response_value(payload.as_bytes()) {
            Ok(inner) => {
                if let Some(usage) = extract_gemini_usage(&inner) {
                    out.usage.push(UsageObservation::Delta(usage));
                }
                inner.to_string()
            }
            Err(_) => payload.to_string(),
        };
        out.bytes.extend_from_slice(&encode_data_line(&data));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwraps_payload_and_reports_usage() {
        let mut transcoder = GeminiPassthroughTranscoder::new();
        let mut out = Emitted::new();
        transcoder.on_data(
            r#"{"response":{"candidates":[],"usageMetadata":{"promptTokenCount":3,"candidatesTokenCount":2}}}"#,
            &mut out,
        );
        let text = String::from_utf8(out.bytes.clone()).unwrap();
        assert!(text.starts_with("data: {"));
        assert!(!text.contains("\"response\""));
        assert_eq!(out.usage.len(), 1);

        out.clear();
        transcoder.on_other("", &mut out);
        assert_eq!(out.bytes, b"\n".to_vec());
    }

    #[test]
    fn unparsable_payload_passes_through() {
        let mut transcoder = GeminiPassthroughTranscoder::new();
        let mut out = Emitted::new();
        transcoder.on_data("not-json", &mut out);
        assert_eq!(out.bytes, b"data: not-json\n".to_vec());
        assert!(out.usage.is_empty());
    }
}
