use std::ops::ControlFlow;
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use agproxy_protocol::sse::{SseLine, SseLineDecoder};
use agproxy_transform::{Emitted, SseTranscoder, UsageAccumulator, UsageSnapshot};

use crate::deadline::{RequestDeadline, within};
use crate::error::StreamFailure;
use crate::sink::ResponseSink;
use crate::upstream_client::UpstreamChunk;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EncoderState {
    Reading,
    Emitting,
    Finished,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamReport {
    pub usage: UsageSnapshot,
    pub first_token_ms: Option<u64>,
}

/// Re-encodes an upstream SSE body onto the sink, one upstream chunk at a time.
///
/// Every write is flushed. On failure the report still carries the usage seen
/// so far. An upstream error, an oversized line or the request deadline still
/// finalises the client stream before the failure is returned.
pub(crate) struct StreamReencoder<T> {
    transcoder: T,
    decoder: SseLineDecoder,
    usage: UsageAccumulator,
    tracking_usage: bool,
    pending: Emitted,
    pending_has_data: bool,
    started: Instant,
    first_token_ms: Option<u64>,
    deadline: Option<RequestDeadline>,
}

impl<T: SseTranscoder> StreamReencoder<T> {
    pub(crate) fn new(transcoder: T, started: Instant, max_line_bytes: usize) -> Self {
        Self {
            transcoder,
            decoder: SseLineDecoder::with_max_line_bytes(max_line_bytes),
            usage: UsageAccumulator::new(),
            tracking_usage: true,
            pending: Emitted::new(),
            pending_has_data: false,
            started,
            first_token_ms: None,
            deadline: None,
        }
    }

    pub(crate) fn with_deadline(mut self, deadline: Option<RequestDeadline>) -> Self {
        self.deadline = deadline;
        self
    }

    pub(crate) async fn run(
        mut self,
        upstream: &mut mpsc::Receiver<UpstreamChunk>,
        sink: &mut dyn ResponseSink,
    ) -> (StreamReport, Option<StreamFailure>) {
        let mut state = EncoderState::Reading;
        let mut upstream_done = false;
        let mut failure = None;

        loop {
            state = match state {
                EncoderState::Reading => {
                    let read = match within(self.deadline, upstream.recv()).await {
                        Ok(Some(Ok(chunk))) => match self.decoder.push_bytes(&chunk) {
                            Ok(lines) => {
                                for line in lines {
                                    self.dispatch(line);
                                }
                                ControlFlow::Continue(())
                            }
                            Err(err) => {
                                warn!(event = "upstream_line_too_long", limit = err.limit);
                                ControlFlow::Break(Some(StreamFailure::Line(err)))
                            }
                        },
                        Ok(Some(Err(err))) => {
                            warn!(event = "upstream_stream_failed", error = %err);
                            ControlFlow::Break(Some(StreamFailure::Upstream(err)))
                        }
                        Ok(None) => ControlFlow::Break(None),
                        Err(limit) => {
                            warn!(event = "stream_deadline_exceeded", limit_ms = limit.as_millis());
                            ControlFlow::Break(Some(StreamFailure::Deadline(limit)))
                        }
                    };
                    if let ControlFlow::Break(stop) = read {
                        failure = stop;
                        self.finish_upstream();
                        upstream_done = true;
                    }
                    EncoderState::Emitting
                }
                EncoderState::Emitting => {
                    if let Err(err) = self.emit(sink).await {
                        debug!(event = "client_write_failed", error = %err);
                        return (self.report(), Some(StreamFailure::Write(err)));
                    }
                    if upstream_done {
                        EncoderState::Finished
                    } else {
                        EncoderState::Reading
                    }
                }
                EncoderState::Finished => break,
            };
        }

        (self.report(), failure)
    }

    fn dispatch(&mut self, line: SseLine) {
        let done = line == SseLine::Done;
        match line {
            SseLine::Data(payload) => {
                if !payload.trim().is_empty() {
                    self.pending_has_data = true;
                }
                self.transcoder.on_data(&payload, &mut self.pending);
            }
            SseLine::Done => self.transcoder.on_done(&mut self.pending),
            SseLine::Other(line) => self.transcoder.on_other(&line, &mut self.pending),
        }
        self.drain_usage();
        // Nothing after the terminal sentinel counts towards usage.
        if done {
            self.tracking_usage = false;
        }
    }

    fn finish_upstream(&mut self) {
        if let Some(line) = self.decoder.finish() {
            self.dispatch(line);
        }
        self.transcoder.finish(&mut self.pending);
        self.drain_usage();
    }

    fn drain_usage(&mut self) {
        for observation in self.pending.usage.drain(..) {
            if self.tracking_usage {
                self.usage.observe(observation);
            }
        }
    }

    async fn emit(&mut self, sink: &mut dyn ResponseSink) -> std::io::Result<()> {
        if self.pending.bytes.is_empty() {
            return Ok(());
        }
        if self.pending_has_data && self.first_token_ms.is_none() {
            let elapsed = self.started.elapsed().as_millis();
            self.first_token_ms = Some(u64::try_from(elapsed).unwrap_or(u64::MAX));
        }
        let bytes = Bytes::from(std::mem::take(&mut self.pending.bytes));
        self.pending_has_data = false;
        sink.send_chunk(bytes).await?;
        sink.flush().await
    }

    fn report(&self) -> StreamReport {
        StreamReport {
            usage: self.usage.snapshot(),
            first_token_ms: self.first_token_ms,
        }
    }
}
