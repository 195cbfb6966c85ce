use crate::usage::UsageObservation;

/// Output produced for one upstream SSE line.
#[derive(Debug, Default)]
pub struct Emitted {
    pub bytes: Vec<u8>,
    pub usage: Vec<UsageObservation>,
}

impl Emitted {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty() && self.usage.is_empty()
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
        self.usage.clear();
    }
}

/// Per-line hook driven by the streaming re-encoder.
///
/// Implementations are stateful and owned by a single stream.
pub trait SseTranscoder: Send {
    /// One `data:` payload, already stripped of its prefix.
    fn on_data(&mut self, payload: &str, out: &mut Emitted);

    /// A line without the `data:` prefix.
    fn on_other(&mut self, line: &str, out: &mut Emitted) {
        out.bytes.extend_from_slice(line.as_bytes());
        out.bytes.push(b'\n');
    }

    /// `data: [DONE]`.
    fn on_done(&mut self, out: &mut Emitted) {
        out.bytes.extend_from_slice(b"data: [DONE]\n");
    }

    /// End of the upstream body; emit whatever the client still needs.
    fn finish(&mut self, _out: &mut Emitted) {}
}
