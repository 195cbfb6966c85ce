use std::io;
use std::time::Duration;

use bytes::Bytes;

use agproxy_protocol::claude::error::{ErrorResponse, ErrorTypeKnown};
use agproxy_protocol::gemini::error::GoogleErrorResponse;
use agproxy_protocol::sse::LineTooLong;

use crate::collab::TokenError;
use crate::forward::ForwardOutcome;
use crate::upstream_client::UpstreamFailure;

#[derive(Debug, thiserror::Error)]
pub enum StreamFailure {
    #[error("upstream stream failed: {0}")]
    Upstream(#[from] UpstreamFailure),
    #[error("client write failed: {0}")]
    Write(#[from] io::Error),
    #[error("upstream stream rejected: {0}")]
    Line(#[from] LineTooLong),
    #[error("request deadline of {0:?} exceeded mid-stream")]
    Deadline(Duration),
}

#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    /// Malformed or incomplete caller request. Never retried.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// Account or token configuration is missing. Never retried.
    #[error("precondition failed: {0}")]
    Precondition(String),
    #[error(transparent)]
    Token(#[from] TokenError),
    /// The account should be rotated; nothing was written to the client.
    #[error("upstream status {status}, failover to another account")]
    Failover { status: u16 },
    /// Terminal upstream status, already written to the client.
    #[error("upstream error: {status}")]
    Upstream { status: u16 },
    #[error("upstream unavailable after {attempts} attempts: {source}")]
    UpstreamUnavailable {
        attempts: u32,
        source: UpstreamFailure,
    },
    /// Upstream answered 2xx with a body that could not be read or converted.
    #[error("invalid upstream response: {0}")]
    InvalidResponse(String),
    /// The stream broke after the client started receiving it.
    #[error("stream interrupted: {source}")]
    StreamInterrupted {
        outcome: Box<ForwardOutcome>,
        source: StreamFailure,
    },
    #[error("failed to write response: {0}")]
    Write(#[from] io::Error),
    /// Ran out of time before anything was written to the client.
    #[error("request deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),
}

impl ForwardError {
    pub fn is_failover(&self) -> bool {
        matches!(self, ForwardError::Failover { .. })
    }

    /// Whether an error body already went to the client; if not, the caller owns the reply.
    pub fn response_written(&self) -> bool {
        matches!(
            self,
            ForwardError::InvalidRequest(_)
                | ForwardError::Upstream { .. }
                | ForwardError::UpstreamUnavailable { .. }
                | ForwardError::InvalidResponse(_)
                | ForwardError::StreamInterrupted { .. }
        )
    }

    /// Usage gathered before a mid-stream failure.
    pub fn partial_outcome(&self) -> Option<&ForwardOutcome> {
        match self {
            ForwardError::StreamInterrupted { outcome, .. } => Some(outcome),
            _ => None,
        }
    }
}

/// Client status and Claude error body for a terminal upstream status.
pub fn claude_error_for_status(upstream_status: u16) -> (u16, ErrorResponse) {
    let (status, kind, message) = match upstream_status {
        400 => (
            400,
            Some(ErrorTypeKnown::InvalidRequestError),
            "Invalid request",
        ),
        401 => (
            502,
            Some(ErrorTypeKnown::AuthenticationError),
            "Upstream authentication failed",
        ),
        403 => (
            502,
            Some(ErrorTypeKnown::PermissionError),
            "Upstream access forbidden",
        ),
        429 => (
            429,
            Some(ErrorTypeKnown::RateLimitError),
            "Upstream rate limit exceeded",
        ),
        529 => (
            503,
            Some(ErrorTypeKnown::OverloadedError),
            "Upstream service overloaded",
        ),
        _ => (502, None, "Upstream request failed"),
    };
    let body = match kind {
        Some(kind) => ErrorResponse::known(kind, message),
        None => ErrorResponse::custom(UPSTREAM_ERROR_TYPE, message),
    };
    (status, body)
}

pub const UPSTREAM_ERROR_TYPE: &str = "upstream_error";

pub(crate) fn claude_error_bytes(error: &ErrorResponse) -> Bytes {
    serde_json::to_vec(error).map(Bytes::from).unwrap_or_default()
}

pub(crate) fn google_error_bytes(code: u16, message: impl Into<String>) -> Bytes {
    serde_json::to_vec(&GoogleErrorResponse::new(code, message))
        .map(Bytes::from)
        .unwrap_or_default()
}
