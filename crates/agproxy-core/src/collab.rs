use async_trait::async_trait;
use bytes::Bytes;

use crate::account::Account;
use crate::headers::Headers;

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("no access token for account {0}")]
    Missing(String),
    #[error("token refresh failed: {0}")]
    Refresh(String),
}

/// Supplies a valid bearer token for an account, refreshing it if needed.
#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    async fn access_token(&self, account: &Account) -> Result<String, TokenError>;
}

/// Told about upstream error statuses so account health can be adjusted.
///
/// Called inline on the forwarding path: implementations must return
/// promptly and move any slow work onto their own task.
pub trait RateLimitNotifier: Send + Sync {
    fn handle_upstream_error(&self, account: &Account, status: u16, headers: &Headers, body: &Bytes);
}

/// Notifier for callers without health tracking.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRateLimitNotifier;

impl RateLimitNotifier for NoopRateLimitNotifier {
    fn handle_upstream_error(&self, _: &Account, _: u16, _: &Headers, _: &Bytes) {}
}
