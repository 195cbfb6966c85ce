use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use wreq::{Client, Method, Proxy};

use agproxy_common::ForwardConfig;

use crate::headers::Headers;

pub type UpstreamChunk = Result<Bytes, UpstreamFailure>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamHttpRequest {
    pub url: String,
    pub headers: Headers,
    pub body: Bytes,
    pub is_stream: bool,
    /// Outbound proxy for this account; `None` connects directly.
    pub proxy: Option<String>,
}

#[derive(Debug)]
pub enum UpstreamBody {
    Bytes(Bytes),
    /// Chunks in arrival order. An `Err` item ends the body early.
    Stream(mpsc::Receiver<UpstreamChunk>),
}

impl UpstreamBody {
    /// Uniform chunk receiver; a buffered body arrives as one chunk.
    pub fn into_receiver(self) -> mpsc::Receiver<UpstreamChunk> {
        match self {
            UpstreamBody::Stream(rx) => rx,
            UpstreamBody::Bytes(bytes) => {
                let (tx, rx) = mpsc::channel(1);
                if !bytes.is_empty() {
                    let _ = tx.try_send(Ok(bytes));
                }
                rx
            }
        }
    }
}

#[derive(Debug)]
pub struct UpstreamHttpResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: UpstreamBody,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamTransportErrorKind {
    Timeout,
    ReadTimeout,
    Connect,
    Dns,
    Tls,
    Other,
}

impl fmt::Display for UpstreamTransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Timeout => "timeout",
            Self::ReadTimeout => "read timeout",
            Self::Connect => "connect",
            Self::Dns => "dns",
            Self::Tls => "tls",
            Self::Other => "transport",
        };
        f.write_str(name)
    }
}

/// Transport-level failure: no usable HTTP response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} error: {message}")]
pub struct UpstreamFailure {
    pub kind: UpstreamTransportErrorKind,
    pub message: String,
}

impl UpstreamFailure {
    pub fn new(kind: UpstreamTransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

pub trait UpstreamClient: Send + Sync {
    fn send<'a>(
        &'a self,
        req: UpstreamHttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamHttpResponse, UpstreamFailure>> + Send + 'a>>;
}

#[derive(Debug, Clone)]
pub struct UpstreamClientConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub stream_idle_timeout: Duration,
    /// Cap applied when a body is buffered instead of streamed.
    pub max_buffered_body_bytes: usize,
}

impl UpstreamClientConfig {
    pub fn from_forward(config: &ForwardConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            request_timeout: config.request_timeout(),
            stream_idle_timeout: config.stream_idle_timeout(),
            max_buffered_body_bytes: config
                .max_response_body_bytes
                .max(config.max_error_body_bytes),
        }
    }
}

impl Default for UpstreamClientConfig {
    fn default() -> Self {
        Self::from_forward(&ForwardConfig::default())
    }
}

/// `wreq` transport with one pooled client per outbound proxy.
///
/// The direct client is built eagerly so a bad timeout setup fails at startup;
/// proxied clients are built on first use and kept for the process lifetime.
#[derive(Clone)]
pub struct WreqUpstreamClient {
    config: UpstreamClientConfig,
    pool: Arc<Mutex<HashMap<String, Client>>>,
}

/// Pool key of the client without an outbound proxy.
const DIRECT: &str = "";

impl WreqUpstreamClient {
    pub fn new(config: UpstreamClientConfig) -> Result<Self, wreq::Error> {
        let direct = client_with_proxy(&config, None)?;
        Ok(Self {
            config,
            pool: Arc::new(Mutex::new(HashMap::from([(DIRECT.to_string(), direct)]))),
        })
    }

    fn pooled_client(&self, proxy: Option<&str>) -> Result<Client, UpstreamFailure> {
        let key = proxy.map(str::trim).unwrap_or(DIRECT);
        let mut pool = self.pool.lock().map_err(|_| {
            UpstreamFailure::new(UpstreamTransportErrorKind::Other, "client pool poisoned")
        })?;
        if let Some(client) = pool.get(key) {
            return Ok(client.clone());
        }
        let proxy = (!key.is_empty()).then_some(key);
        let client = client_with_proxy(&self.config, proxy).map_err(map_wreq_error)?;
        pool.insert(key.to_string(), client.clone());
        Ok(client)
    }
}

fn client_with_proxy(
    config: &UpstreamClientConfig,
    proxy: Option<&str>,
) -> Result<Client, wreq::Error> {
    let builder = Client::builder()
        .connect_timeout(config.connect_timeout)
        .timeout(config.request_timeout)
        .read_timeout(config.stream_idle_timeout);
    match proxy {
        Some(url) => builder.proxy(Proxy::all(url)?).build(),
        None => builder.build(),
    }
}

impl UpstreamClient for WreqUpstreamClient {
    fn send<'a>(
        &'a self,
        req: UpstreamHttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamHttpResponse, UpstreamFailure>> + Send + 'a>>
    {
        Box::pin(async move {
            let UpstreamHttpRequest {
                url,
                headers,
                body,
                is_stream,
                proxy,
            } = req;
            let client = self.pooled_client(proxy.as_deref())?;
            let request = headers
                .iter()
                .fold(client.request(Method::POST, &url), |request, (name, value)| {
                    request.header(name, value)
                })
                .body(body);
            let resp = request.send().await.map_err(map_wreq_error)?;
            into_upstream_response(resp, is_stream, &self.config).await
        })
    }
}

async fn into_upstream_response(
    resp: wreq::Response,
    want_stream: bool,
    config: &UpstreamClientConfig,
) -> Result<UpstreamHttpResponse, UpstreamFailure> {
    let status = resp.status();
    let headers = collect_headers(resp.headers());

    // Error bodies are always buffered so the retry loop can inspect them.
    if !(want_stream && status.is_success()) {
        let body = collect_limited(resp, config.max_buffered_body_bytes).await?;
        return Ok(UpstreamHttpResponse {
            status: status.as_u16(),
            headers,
            body: UpstreamBody::Bytes(body),
        });
    }

    // The pump stops once the receiver is dropped, so abandoning the
    // response also abandons the upstream read.
    let (tx, rx) = mpsc::channel::<UpstreamChunk>(16);
    let idle = config.stream_idle_timeout;
    tokio::spawn(async move {
        let mut chunks = resp.bytes_stream();
        loop {
            let item = match tokio::time::timeout(idle, chunks.next()).await {
                Ok(Some(Ok(chunk))) => Ok(chunk),
                Ok(Some(Err(err))) => Err(map_wreq_error(err)),
                Ok(None) => break,
                Err(_) => Err(UpstreamFailure::new(
                    UpstreamTransportErrorKind::ReadTimeout,
                    format!("no stream data for {}s", idle.as_secs()),
                )),
            };
            let failed = item.is_err();
            if tx.send(item).await.is_err() || failed {
                break;
            }
        }
    });

    Ok(UpstreamHttpResponse {
        status: status.as_u16(),
        headers,
        body: UpstreamBody::Stream(rx),
    })
}

async fn collect_limited(resp: wreq::Response, limit: usize) -> Result<Bytes, UpstreamFailure> {
    let mut chunks = resp.bytes_stream();
    let mut body = Vec::new();
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk.map_err(map_wreq_error)?;
        if push_limited(&mut body, &chunk, limit) {
            break;
        }
    }
    Ok(Bytes::from(body))
}

/// Reads a whole body, keeping at most `limit` bytes.
pub async fn read_body_limited(body: UpstreamBody, limit: usize) -> Result<Bytes, UpstreamFailure> {
    match body {
        UpstreamBody::Bytes(bytes) if bytes.len() > limit => Ok(bytes.slice(..limit)),
        UpstreamBody::Bytes(bytes) => Ok(bytes),
        UpstreamBody::Stream(mut rx) => {
            let mut body = Vec::new();
            while let Some(chunk) = rx.recv().await {
                if push_limited(&mut body, &chunk?, limit) {
                    break;
                }
            }
            Ok(Bytes::from(body))
        }
    }
}

/// Appends what fits; returns true once the limit is reached.
fn push_limited(body: &mut Vec<u8>, chunk: &[u8], limit: usize) -> bool {
    let room = limit.saturating_sub(body.len());
    body.extend_from_slice(&chunk[..chunk.len().min(room)]);
    body.len() >= limit
}

/// Non-UTF-8 header values are dropped.
fn collect_headers(map: &wreq::header::HeaderMap) -> Headers {
    map.iter()
        .filter_map(|(name, value)| {
            let value = value.to_str().ok()?;
            Some((name.as_str().to_string(), value.to_string()))
        })
        .collect()
}

fn map_wreq_error(err: wreq::Error) -> UpstreamFailure {
    UpstreamFailure::new(transport_kind(&err), err.to_string())
}

fn transport_kind(err: &wreq::Error) -> UpstreamTransportErrorKind {
    let text = err.to_string().to_ascii_lowercase();
    let mentions = |needles: &[&str]| needles.iter().any(|needle| text.contains(needle));
    match (err.is_timeout(), err.is_connect()) {
        (true, _) if mentions(&["read", "idle"]) => UpstreamTransportErrorKind::ReadTimeout,
        (true, _) => UpstreamTransportErrorKind::Timeout,
        (false, true) if mentions(&["dns", "resolve"]) => UpstreamTransportErrorKind::Dns,
        (false, _) if mentions(&["tls", "ssl", "certificate"]) => UpstreamTransportErrorKind::Tls,
        (false, true) => UpstreamTransportErrorKind::Connect,
        (false, false) => UpstreamTransportErrorKind::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn buffered_body_is_capped() {
        let body = UpstreamBody::Bytes(Bytes::from_static(b"0123456789"));
        assert_eq!(read_body_limited(body, 4).await.unwrap(), Bytes::from_static(b"0123"));
    }

    #[tokio::test]
    async fn streamed_body_is_capped_and_errors_surface() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(Ok(Bytes::from_static(b"abc"))).await.unwrap();
        tx.send(Ok(Bytes::from_static(b"def"))).await.unwrap();
        drop(tx);
        let body = read_body_limited(UpstreamBody::Stream(rx), 5).await.unwrap();
        assert_eq!(body, Bytes::from_static(b"abcde"));

        let (tx, rx) = mpsc::channel(4);
        tx.send(Err(UpstreamFailure::new(UpstreamTransportErrorKind::ReadTimeout, "idle")))
            .await
            .unwrap();
        drop(tx);
        assert!(read_body_limited(UpstreamBody::Stream(rx), 5).await.is_err());
    }

    #[test]
    fn proxied_clients_are_pooled_by_url() {
        let client = WreqUpstreamClient::new(UpstreamClientConfig::default()).unwrap();
        client.pooled_client(Some(" http://127.0.0.1:9 ")).unwrap();
        client.pooled_client(Some("http://127.0.0.1:9")).unwrap();
        client.pooled_client(None).unwrap();
        assert_eq!(client.pool.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn buffered_body_becomes_single_chunk() {
        let mut rx = UpstreamBody::Bytes(Bytes::from_static(b"data: x\n")).into_receiver();
        assert_eq!(rx.recv().await.unwrap().unwrap(), Bytes::from_static(b"data: x\n"));
        assert!(rx.recv().await.is_none());
    }
}
