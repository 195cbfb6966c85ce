use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::headers::Headers;

/// Client-facing half of a forward call.
///
/// `send_head` is called at most once and always before any chunk.
#[async_trait]
pub trait ResponseSink: Send {
    async fn send_head(&mut self, status: u16, headers: &Headers) -> io::Result<()>;
    async fn send_chunk(&mut self, chunk: Bytes) -> io::Result<()>;
    async fn flush(&mut self) -> io::Result<()>;
}

/// Writes bodies to any async writer and drops the head.
pub struct WriterSink<W> {
    writer: W,
    status: Option<u16>,
}

impl<W> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            status: None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[async_trait]
impl<W> ResponseSink for WriterSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send_head(&mut self, status: u16, _headers: &Headers) -> io::Result<()> {
        self.status = Some(status);
        Ok(())
    }

    async fn send_chunk(&mut self, chunk: Bytes) -> io::Result<()> {
        self.writer.write_all(&chunk).await
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.writer.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writer_sink_keeps_status_and_body() {
        let mut sink = WriterSink::new(Vec::new());
        sink.send_head(200, &Headers::new()).await.unwrap();
        sink.send_chunk(Bytes::from_static(b"event: ping\n")).await.unwrap();
        sink.flush().await.unwrap();
        assert_eq!(sink.status(), Some(200));
        assert_eq!(sink.into_inner(), b"event: ping\n".to_vec());
    }
}
