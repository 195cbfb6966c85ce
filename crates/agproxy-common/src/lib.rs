use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_BASE_URL: &str = "https://daily-cloudcode-pa.sandbox.googleapis.com";
pub const DEFAULT_USER_AGENT: &str = "antigravity/1.15.8 (Windows; AMD64)";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max_attempts must be at least 1")]
    ZeroAttempts,
    #[error("base_delay_ms ({base}) exceeds max_delay_ms ({max})")]
    DelayOrder { base: u64, max: u64 },
    #[error("invalid base_url {url:?}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },
}

/// Final, merged configuration for the forwarding engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwardConfig {
    pub base_url: String,
    pub user_agent: String,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Prepend the identity preamble to the system instruction.
    pub identity_patch: bool,
    /// Replaces the built-in preamble text when set.
    pub identity_patch_text: Option<String>,
    pub max_output_tokens: u32,
    pub connect_timeout_secs: u64,
    /// Total lifetime of one upstream HTTP exchange, body included. Streams
    /// are policed by the idle timeout, so this stays day-scale.
    pub request_timeout_secs: u64,
    /// Longest silence tolerated between two chunks of a streamed body.
    pub stream_idle_timeout_secs: u64,
    /// Overall deadline for one forward call. Expiry before the response
    /// starts fails the call; expiry mid-stream finalises the client stream.
    pub request_deadline_secs: Option<u64>,
    pub max_error_body_bytes: usize,
    pub max_response_body_bytes: usize,
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_attempts: 5,
            base_delay_ms: 1_000,
            max_delay_ms: 16_000,
            identity_patch: true,
            identity_patch_text: None,
            max_output_tokens: 64_000,
            connect_timeout_secs: 10,
            request_timeout_secs: 86_400,
            stream_idle_timeout_secs: 120,
            request_deadline_secs: None,
            max_error_body_bytes: 2 * 1024 * 1024,
            max_response_body_bytes: 8 * 1024 * 1024,
        }
    }
}

impl ForwardConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(ConfigError::DelayOrder {
                base: self.base_delay_ms,
                max: self.max_delay_ms,
            });
        }
        let invalid = |reason: &str| ConfigError::InvalidBaseUrl {
            url: self.base_url.clone(),
            reason: reason.to_string(),
        };
        let uri: http::Uri = self
            .base_url
            .parse()
            .map_err(|err: http::uri::InvalidUri| invalid(&err.to_string()))?;
        match uri.scheme_str() {
            Some("http") | Some("https") => {}
            _ => return Err(invalid("scheme must be http or https")),
        }
        if uri.host().is_none_or(str::is_empty) {
            return Err(invalid("missing host"));
        }
        Ok(())
    }

    /// Endpoint for one `v1internal` action, without query string.
    pub fn endpoint(&self, action: &str) -> String {
        format!("{}/v1internal:{action}", self.base_url.trim_end_matches('/'))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_idle_timeout_secs)
    }

    pub fn request_deadline(&self) -> Option<Duration> {
        self.request_deadline_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

/// Optional layer used for merging forward config.
///
/// Merge order: CLI > ENV > config file > defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwardConfigPatch {
    pub base_url: Option<String>,
    pub user_agent: Option<String>,
    pub max_attempts: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub identity_patch: Option<bool>,
    pub identity_patch_text: Option<String>,
    pub max_output_tokens: Option<u32>,
    pub connect_timeout_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
    pub stream_idle_timeout_secs: Option<u64>,
    pub request_deadline_secs: Option<u64>,
    pub max_error_body_bytes: Option<usize>,
    pub max_response_body_bytes: Option<usize>,
}

macro_rules! overlay_fields {
    ($self:ident, $other:ident, $($field:ident),+ $(,)?) => {
        $(
            if $other.$field.is_some() {
                $self.$field = $other.$field;
            }
        )+
    };
}

impl ForwardConfigPatch {
    pub fn overlay(&mut self, other: ForwardConfigPatch) {
        overlay_fields!(
            self,
            other,
            base_url,
            user_agent,
            max_attempts,
            base_delay_ms,
            max_delay_ms,
            identity_patch,
            identity_patch_text,
            max_output_tokens,
            connect_timeout_secs,
            request_timeout_secs,
            stream_idle_timeout_secs,
            request_deadline_secs,
            max_error_body_bytes,
            max_response_body_bytes,
        );
    }

    pub fn into_config(self) -> Result<ForwardConfig, ConfigError> {
        let defaults = ForwardConfig::default();
        let config = ForwardConfig {
            base_url: self.base_url.unwrap_or(defaults.base_url),
            user_agent: self.user_agent.unwrap_or(defaults.user_agent),
            max_attempts: self.max_attempts.unwrap_or(defaults.max_attempts),
            base_delay_ms: self.base_delay_ms.unwrap_or(defaults.base_delay_ms),
            max_delay_ms: self.max_delay_ms.unwrap_or(defaults.max_delay_ms),
            identity_patch: self.identity_patch.unwrap_or(defaults.identity_patch),
            identity_patch_text: self.identity_patch_text.or(defaults.identity_patch_text),
            max_output_tokens: self.max_output_tokens.unwrap_or(defaults.max_output_tokens),
            connect_timeout_secs: self
                .connect_timeout_secs
                .unwrap_or(defaults.connect_timeout_secs),
            request_timeout_secs: self
                .request_timeout_secs
                .unwrap_or(defaults.request_timeout_secs),
            stream_idle_timeout_secs: self
                .stream_idle_timeout_secs
                .unwrap_or(defaults.stream_idle_timeout_secs),
            request_deadline_secs: self.request_deadline_secs.or(defaults.request_deadline_secs),
            max_error_body_bytes: self
                .max_error_body_bytes
                .unwrap_or(defaults.max_error_body_bytes),
            max_response_body_bytes: self
                .max_response_body_bytes
                .unwrap_or(defaults.max_response_body_bytes),
        };
        config.validate()?;
        Ok(config)
    }
}

impl From<ForwardConfig> for ForwardConfigPatch {
    fn from(value: ForwardConfig) -> Self {
        Self {
            base_url: Some(value.base_url),
            user_agent: Some(value.user_agent),
            max_attempts: Some(value.max_attempts),
            base_delay_ms: Some(value.base_delay_ms),
            max_delay_ms: Some(value.max_delay_ms),
            identity_patch: Some(value.identity_patch),
            identity_patch_text: value.identity_patch_text,
            max_output_tokens: Some(value.max_output_tokens),
            connect_timeout_secs: Some(value.connect_timeout_secs),
            request_timeout_secs: Some(value.request_timeout_secs),
            stream_idle_timeout_secs: Some(value.stream_idle_timeout_secs),
            request_deadline_secs: value.request_deadline_secs,
            max_error_body_bytes: Some(value.max_error_body_bytes),
            max_response_body_bytes: Some(value.max_response_body_bytes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ForwardConfigPatch::default().into_config().unwrap();
        assert_eq!(config, ForwardConfig::default());
        assert_eq!(
            config.endpoint("streamGenerateContent"),
            "https://daily-cloudcode-pa.sandbox.googleapis.com/v1internal:streamGenerateContent"
        );
    }

    #[test]
    fn later_layers_win() {
        let mut merged: ForwardConfigPatch =
            serde_json::from_str(r#"{"max_attempts": 3, "base_url": "http://file:1"}"#).unwrap();
        merged.overlay(ForwardConfigPatch {
            base_url: Some("http://cli:2/".to_string()),
            ..ForwardConfigPatch::default()
        });
        let config = merged.into_config().unwrap();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.endpoint("countTokens"), "http://cli:2/v1internal:countTokens");
    }

    #[test]
    fn validation_rejects_bad_values() {
        let zero = ForwardConfigPatch {
            max_attempts: Some(0),
            ..ForwardConfigPatch::default()
        };
        assert_eq!(zero.into_config(), Err(ConfigError::ZeroAttempts));

        let inverted = ForwardConfigPatch {
            base_delay_ms: Some(5),
            max_delay_ms: Some(1),
            ..ForwardConfigPatch::default()
        };
        assert_eq!(
            inverted.into_config(),
            Err(ConfigError::DelayOrder { base: 5, max: 1 })
        );

        for url in ["not a url", "ftp://host", "/relative"] {
            let patch = ForwardConfigPatch {
                base_url: Some(url.to_string()),
                ..ForwardConfigPatch::default()
            };
            assert!(matches!(
                patch.into_config(),
                Err(ConfigError::InvalidBaseUrl { .. })
            ));
        }
    }

    #[test]
    fn long_streams_outlive_the_idle_timeout() {
        let config = ForwardConfig::default();
        assert_eq!(config.request_timeout(), Duration::from_secs(86_400));
        assert!(config.request_timeout() > config.stream_idle_timeout() * 60);
    }

    #[test]
    fn zero_deadline_means_none() {
        let config = ForwardConfig {
            request_deadline_secs: Some(0),
            ..ForwardConfig::default()
        };
        assert_eq!(config.request_deadline(), None);
    }
}
