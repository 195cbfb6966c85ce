pub type Headers = Vec<(String, String)>;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

pub fn header_set(headers: &mut Headers, name: impl Into<String>, value: impl Into<String>) {
    let name = name.into();
    let value = value.into();
    if let Some((_, v)) = headers
        .iter_mut()
        .find(|(k, _)| k.eq_ignore_ascii_case(&name))
    {
        *v = value;
        return;
    }
    headers.push((name, value));
}

pub fn header_get<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Headers for a single JSON response body.
pub fn json_response_headers(request_id: Option<&str>) -> Headers {
    let mut headers = vec![("content-type".to_string(), "application/json".to_string())];
    echo_request_id(&mut headers, request_id);
    headers
}

/// Headers for an incrementally delivered SSE body; proxy buffering is disabled.
pub fn stream_response_headers(content_type: &str, request_id: Option<&str>) -> Headers {
    let mut headers = vec![
        ("content-type".to_string(), content_type.to_string()),
        ("cache-control".to_string(), "no-cache".to_string()),
        ("connection".to_string(), "keep-alive".to_string()),
        ("x-accel-buffering".to_string(), "no".to_string()),
    ];
    echo_request_id(&mut headers, request_id);
    headers
}

fn echo_request_id(headers: &mut Headers, request_id: Option<&str>) {
    if let Some(request_id) = request_id.filter(|id| !id.is_empty()) {
        header_set(headers, REQUEST_ID_HEADER, request_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookups_ignore_case() {
        let mut headers = Headers::new();
        header_set(&mut headers, "X-Request-Id", "a");
        header_set(&mut headers, "x-request-id", "b");
        assert_eq!(headers.len(), 1);
        assert_eq!(header_get(&headers, "X-REQUEST-ID"), Some("b"));
    }

    #[test]
    fn stream_headers_disable_buffering() {
        let headers = stream_response_headers("text/event-stream", Some("req-1"));
        assert_eq!(header_get(&headers, "x-accel-buffering"), Some("no"));
        assert_eq!(header_get(&headers, "cache-control"), Some("no-cache"));
        assert_eq!(header_get(&headers, REQUEST_ID_HEADER), Some("req-1"));
        assert_eq!(header_get(&json_response_headers(Some("")), REQUEST_ID_HEADER), None);
    }
}
