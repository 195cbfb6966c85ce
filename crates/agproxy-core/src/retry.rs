use std::time::{Duration, Instant};

use bytes::Bytes;
use rand::Rng;
use tracing::{info, warn};

use agproxy_common::ForwardConfig;

use crate::account::Account;
use crate::collab::RateLimitNotifier;
use crate::headers::Headers;
use crate::upstream_client::{
    UpstreamClient, UpstreamFailure, UpstreamHttpRequest, UpstreamHttpResponse, read_body_limited,
};

pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504 | 529)
}

pub fn is_failover_status(status: u16) -> bool {
    matches!(status, 401 | 403 | 429 | 529) || status >= 500
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_error_body_bytes: usize,
}

impl RetryPolicy {
    pub fn from_config(config: &ForwardConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            max_error_body_bytes: config.max_error_body_bytes,
        }
    }

    /// Delay after failed attempt `attempt` (1-based): base doubled per
    /// attempt plus up to 20% jitter, capped at `max_delay`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let step = attempt.saturating_sub(1).min(16);
        let base_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        let backoff = base_ms.saturating_mul(1u64 << step);
        let jitter = if backoff >= 5 {
            rand::rng().random_range(0..=backoff / 5)
        } else {
            0
        };
        let max_ms = u64::try_from(self.max_delay.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(backoff.saturating_add(jitter).min(max_ms))
    }
}

/// Error status with its (size-capped) body, held for handling after the loop.
#[derive(Debug, Clone)]
pub struct CapturedResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Bytes,
}

#[derive(Debug)]
pub enum RetryOutcome {
    Success(UpstreamHttpResponse),
    /// Final status >= 400: either non-retryable or retries exhausted.
    Failed(CapturedResponse),
    /// Every attempt failed at the transport level.
    Unavailable {
        attempts: u32,
        failure: UpstreamFailure,
    },
}

enum Attempt {
    Done(RetryOutcome),
    Retry,
}

pub(crate) struct RetryContext<'a> {
    pub client: &'a dyn UpstreamClient,
    pub notifier: &'a dyn RateLimitNotifier,
    pub account: &'a Account,
    pub policy: RetryPolicy,
}

impl RetryContext<'_> {
    pub(crate) async fn send(&self, request: UpstreamHttpRequest) -> RetryOutcome {
        let max = self.policy.max_attempts;
        let mut attempt: u32 = 1;
        loop {
            match self.attempt(&request, attempt).await {
                Attempt::Done(outcome) => return outcome,
                Attempt::Retry => {
                    let delay = self.policy.backoff_delay(attempt);
                    info!(
                        event = "upstream_retry",
                        account = %self.account.name,
                        attempt,
                        max_attempts = max,
                        delay_ms = delay.as_millis()
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
            }
        }
    }

    async fn attempt(&self, request: &UpstreamHttpRequest, attempt: u32) -> Attempt {
        let is_last = attempt >= self.policy.max_attempts;
        let started = Instant::now();
        let result = self.client.send(request.clone()).await;
        let elapsed_ms = started.elapsed().as_millis();

        let resp = match result {
            Ok(resp) => resp,
            Err(failure) => {
                warn!(
                    event = "upstream_request",
                    account = %self.account.name,
                    attempt,
                    elapsed_ms,
                    error = %failure
                );
                if is_last {
                    return Attempt::Done(RetryOutcome::Unavailable {
                        attempts: attempt,
                        failure,
                    });
                }
                return Attempt::Retry;
            }
        };

        info!(
            event = "upstream_request",
            account = %self.account.name,
            attempt,
            status = resp.status,
            elapsed_ms
        );
        if resp.status < 400 {
            return Attempt::Done(RetryOutcome::Success(resp));
        }

        let captured = self.capture(resp).await;
        if !is_retryable_status(captured.status) || is_last {
            return Attempt::Done(RetryOutcome::Failed(captured));
        }
        // Exhaustion is reported once by the caller, so only intermediate 429s are sent here.
        if captured.status == 429 {
            self.notifier.handle_upstream_error(
                self.account,
                captured.status,
                &captured.headers,
                &captured.body,
            );
        }
        Attempt::Retry
    }

    async fn capture(&self, resp: UpstreamHttpResponse) -> CapturedResponse {
        let body = read_body_limited(resp.body, self.policy.max_error_body_bytes)
            .await
            .unwrap_or_default();
        CapturedResponse {
            status: resp.status,
            headers: resp.headers,
            body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(base_ms: u64, max_ms: u64) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(base_ms),
            max_delay: Duration::from_millis(max_ms),
            max_error_body_bytes: 1024,
        }
    }

    #[test]
    fn status_classes() {
        for status in [429, 500, 502, 503, 504, 529] {
            assert!(is_retryable_status(status));
        }
        assert!(!is_retryable_status(400));
        assert!(!is_retryable_status(401));
        for status in [401, 403, 429, 529, 500, 501, 599] {
            assert!(is_failover_status(status));
        }
        assert!(!is_failover_status(400));
        assert!(!is_failover_status(404));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = policy(1_000, 16_000);
        let first = policy.backoff_delay(1);
        assert!(first >= Duration::from_millis(1_000) && first <= Duration::from_millis(1_200));
        let third = policy.backoff_delay(3);
        assert!(third >= Duration::from_millis(4_000) && third <= Duration::from_millis(4_800));
        assert_eq!(policy.backoff_delay(10), Duration::from_millis(16_000));
        assert_eq!(policy(0, 0).backoff_delay(4), Duration::ZERO);
    }
}
