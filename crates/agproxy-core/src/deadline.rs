use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

/// Overall time budget of one forward call, fixed when the call starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RequestDeadline {
    at: Instant,
    limit: Duration,
}

impl RequestDeadline {
    pub(crate) fn start(limit: Option<Duration>) -> Option<Self> {
        limit.map(|limit| Self {
            at: Instant::now() + limit,
            limit,
        })
    }
}

/// Awaits `fut` unless the deadline passes first; the error is the configured limit.
pub(crate) async fn within<F: Future>(
    deadline: Option<RequestDeadline>,
    fut: F,
) -> Result<F::Output, Duration> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline.at, fut)
            .await
            .map_err(|_| deadline.limit),
        None => Ok(fut.await),
    }
}
