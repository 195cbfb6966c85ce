use async_trait::async_trait;
use bytes::Bytes;
use tracing::warn;

use agproxy_core::headers::header_get;
use agproxy_core::{AccessTokenProvider, Account, Headers, RateLimitNotifier, TokenError};

pub(crate) const ACCESS_TOKEN_CREDENTIAL: &str = "access_token";

/// Reads the bearer token stored in the account file; no refresh.
pub(crate) struct CredentialTokenProvider;

#[async_trait]
impl AccessTokenProvider for CredentialTokenProvider {
    async fn access_token(&self, account: &Account) -> Result<String, TokenError> {
        account
            .credential(ACCESS_TOKEN_CREDENTIAL)
            .map(str::to_string)
            .ok_or_else(|| TokenError::Missing(account.name.clone()))
    }
}

/// Logs upstream error statuses off the forwarding path.
pub(crate) struct LoggingRateLimitNotifier;

impl RateLimitNotifier for LoggingRateLimitNotifier {
    fn handle_upstream_error(&self, account: &Account, status: u16, headers: &Headers, body: &Bytes) {
        let account = account.name.clone();
        let retry_after = header_get(headers, "retry-after").map(str::to_string);
        let body = String::from_utf8_lossy(body).into_owned();
        tokio::spawn(async move {
            warn!(
                event = "upstream_error_status",
                account = %account,
                status,
                retry_after = retry_after.as_deref().unwrap_or(""),
                body = %body
            );
        });
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[tokio::test]
    async fn token_comes_from_credentials() {
        let account = Account {
            name: "a".to_string(),
            credentials: HashMap::from([(ACCESS_TOKEN_CREDENTIAL.to_string(), " tok ".to_string())]),
            ..Account::default()
        };
        assert_eq!(CredentialTokenProvider.access_token(&account).await.unwrap(), "tok");

        let empty = Account::default();
        assert!(matches!(
            CredentialTokenProvider.access_token(&empty).await,
            Err(TokenError::Missing(_))
        ));
    }
}
