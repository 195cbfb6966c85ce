pub const DATA_PREFIX: &str = "data:";
pub const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseLine {
    /// Payload of a `data:` field, prefix and one leading space removed.
    Data(String),
    /// `data: [DONE]`
    Done,
    /// Blank separators, comments, `event:`/`id:` fields. Kept verbatim.
    Other(String),
}

impl SseLine {
    pub fn classify(line: &str) -> Self {
        match line.strip_prefix(DATA_PREFIX) {
            Some(value) => {
                let value = value.strip_prefix(' ').unwrap_or(value);
                if value.trim() == DONE_SENTINEL {
                    SseLine::Done
                } else {
                    SseLine::Data(value.to_string())
                }
            }
            None => SseLine::Other(line.to_string()),
        }
    }
}

/// Longest line the decoder buffers before giving up on the stream.
pub const DEFAULT_MAX_LINE_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("sse line exceeds {limit} bytes")]
pub struct LineTooLong {
    pub limit: usize,
}

/// Splits an SSE byte stream into lines.
///
/// Bytes are buffered until a `\n` arrives, so multi-byte characters split
/// across chunks are decoded intact.
#[derive(Debug)]
pub struct SseLineDecoder {
    buffer: Vec<u8>,
    max_line_bytes: usize,
}

impl Default for SseLineDecoder {
    fn default() -> Self {
        Self {
            buffer: Vec::new(),
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }
}

impl SseLineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line_bytes(max_line_bytes: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_line_bytes,
        }
    }

    /// Complete lines found so far. Fails once an unterminated line grows past
    /// the limit; the partial line is discarded.
    pub fn push_bytes(&mut self, chunk: &[u8]) -> Result<Vec<SseLine>, LineTooLong> {
        self.buffer.extend_from_slice(chunk);
        let mut lines = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            if pos > self.max_line_bytes {
                return Err(self.overflow());
            }
            let mut raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            raw.pop();
            if raw.last() == Some(&b'\r') {
                raw.pop();
            }
            lines.push(SseLine::classify(&String::from_utf8_lossy(&raw)));
        }

        if self.buffer.len() > self.max_line_bytes {
            return Err(self.overflow());
        }
        Ok(lines)
    }

    fn overflow(&mut self) -> LineTooLong {
        self.buffer = Vec::new();
        LineTooLong {
            limit: self.max_line_bytes,
        }
    }

    /// Flushes a trailing line that was not newline-terminated.
    pub fn finish(&mut self) -> Option<SseLine> {
        if self.buffer.is_empty() {
            return None;
        }
        let mut raw = std::mem::take(&mut self.buffer);
        if raw.last() == Some(&b'\r') {
            raw.pop();
        }
        Some(SseLine::classify(&String::from_utf8_lossy(&raw)))
    }
}

/// `event: <name>\ndata: <data>\n\n`
pub fn encode_named_event(event: &str, data: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(event.len() + data.len() + 16);
    out.extend_from_slice(b"event: ");
    out.extend_from_slice(event.as_bytes());
    out.extend_from_slice(b"\ndata: ");
    out.extend_from_slice(data.as_bytes());
    out.extend_from_slice(b"\n\n");
    out
}

/// `data: <data>\n`; the blank separator travels as its own line.
pub fn encode_data_line(data: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 8);
    out.extend_from_slice(b"data: ");
    out.extend_from_slice(data.as_bytes());
    out.push(b'\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_split_across_chunks() {
        let mut decoder = SseLineDecoder::new();
        assert!(decoder.push_bytes(b"data: {\"a\"").unwrap().is_empty());
        let lines = decoder.push_bytes(b":1}\r\n\r\ndata: [DONE]\n").unwrap();
        assert_eq!(
            lines,
            vec![
                SseLine::Data("{\"a\":1}".to_string()),
                SseLine::Other(String::new()),
                SseLine::Done,
            ]
        );
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn multibyte_char_split_across_chunks() {
        let text = "data: héllo\n".as_bytes();
        let (head, tail) = text.split_at(8);
        let mut decoder = SseLineDecoder::new();
        assert!(decoder.push_bytes(head).unwrap().is_empty());
        assert_eq!(
            decoder.push_bytes(tail).unwrap(),
            vec![SseLine::Data("héllo".to_string())]
        );
    }

    #[test]
    fn trailing_line_without_newline() {
        let mut decoder = SseLineDecoder::new();
        assert!(decoder.push_bytes(b"event: ping").unwrap().is_empty());
        assert_eq!(
            decoder.finish(),
            Some(SseLine::Other("event: ping".to_string()))
        );
    }

    #[test]
    fn unterminated_line_past_limit_fails() {
        let mut decoder = SseLineDecoder::with_max_line_bytes(8);
        assert_eq!(
            decoder.push_bytes(b"data: 1\ndata: 12").unwrap(),
            vec![SseLine::Data("1".to_string())]
        );
        assert_eq!(decoder.push_bytes(b"345"), Err(LineTooLong { limit: 8 }));
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn long_line_inside_one_chunk_fails() {
        let mut decoder = SseLineDecoder::with_max_line_bytes(4);
        assert!(decoder.push_bytes(b"data: 123456\n").is_err());
        assert_eq!(
            decoder.push_bytes(b"ok\n").unwrap(),
            vec![SseLine::Other("ok".to_string())]
        );
    }

    #[test]
    fn named_event_framing() {
        assert_eq!(
            encode_named_event("ping", "{}"),
            b"event: ping\ndata: {}\n\n".to_vec()
        );
    }
}
