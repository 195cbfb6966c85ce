use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use agproxy_common::ForwardConfigPatch;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "agproxy",
    version,
    about = "Forward Claude Messages or Gemini requests to the Antigravity backend"
)]
pub(crate) struct Cli {
    /// JSON file with forward settings; CLI and env values win over it.
    #[arg(long, env = "AGPROXY_CONFIG")]
    pub(crate) config: Option<PathBuf>,

    /// JSON file describing the upstream account.
    #[arg(long, env = "AGPROXY_ACCOUNT")]
    pub(crate) account: PathBuf,

    /// Request body file, `-` for stdin.
    #[arg(long, default_value = "-")]
    pub(crate) request: String,

    /// Send the body as a native Gemini request for this model.
    #[arg(long, requires = "gemini_action")]
    pub(crate) gemini_model: Option<String>,

    /// Gemini action: generateContent, streamGenerateContent or countTokens.
    #[arg(long, requires = "gemini_model")]
    pub(crate) gemini_action: Option<String>,

    /// Ask for a streamed Gemini response.
    #[arg(long)]
    pub(crate) stream: bool,

    #[arg(long, env = "AGPROXY_BASE_URL")]
    pub(crate) base_url: Option<String>,

    #[arg(long, env = "AGPROXY_USER_AGENT")]
    pub(crate) user_agent: Option<String>,

    #[arg(long, env = "AGPROXY_MAX_ATTEMPTS")]
    pub(crate) max_attempts: Option<String>,

    /// Prepend the identity preamble to system prompts.
    #[arg(long, env = "AGPROXY_IDENTITY_PATCH")]
    pub(crate) identity_patch: Option<String>,

    /// Overall deadline for one request in seconds; 0 disables it.
    #[arg(long, env = "AGPROXY_REQUEST_DEADLINE_SECS")]
    pub(crate) request_deadline_secs: Option<String>,

    /// Outbound proxy; replaces the one in the account file.
    #[arg(long, env = "AGPROXY_PROXY")]
    pub(crate) proxy: Option<String>,
}

impl Cli {
    /// CLI/ENV layer of the forward config. clap already resolves CLI over ENV.
    pub(crate) fn config_patch(&self) -> anyhow::Result<ForwardConfigPatch> {
        Ok(ForwardConfigPatch {
            base_url: sanitize_optional_env_value(self.base_url.clone()),
            user_agent: sanitize_optional_env_value(self.user_agent.clone()),
            max_attempts: parse_env_value(self.max_attempts.clone(), "AGPROXY_MAX_ATTEMPTS")?,
            identity_patch: parse_bool_env_value(
                self.identity_patch.clone(),
                "AGPROXY_IDENTITY_PATCH",
            )?,
            request_deadline_secs: parse_env_value(
                self.request_deadline_secs.clone(),
                "AGPROXY_REQUEST_DEADLINE_SECS",
            )?,
            ..ForwardConfigPatch::default()
        })
    }

    pub(crate) fn proxy(&self) -> Option<String> {
        sanitize_optional_env_value(self.proxy.clone())
    }
}

pub(crate) fn sanitize_optional_env_value(value: Option<String>) -> Option<String> {
    let trimmed = value?.trim().to_string();
    if trimmed.is_empty() {
        return None;
    }
    // Unresolved `${VAR}` placeholders count as unset.
    if trimmed.starts_with("${") && trimmed.ends_with('}') {
        return None;
    }
    Some(trimmed)
}

fn parse_env_value<T>(value: Option<String>, env_name: &str) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let Some(raw) = sanitize_optional_env_value(value) else {
        return Ok(None);
    };
    let parsed = raw
        .parse::<T>()
        .with_context(|| format!("invalid {env_name} value: {raw}"))?;
    Ok(Some(parsed))
}

fn parse_bool_env_value(value: Option<String>, env_name: &str) -> anyhow::Result<Option<bool>> {
    let Some(raw) = sanitize_optional_env_value(value) else {
        return Ok(None);
    };
    let parsed = match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => return Err(anyhow::anyhow!("invalid {env_name} value: {raw}")),
    };
    Ok(Some(parsed))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["agproxy", "--account", "acc.json"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn placeholders_count_as_unset() {
        assert_eq!(sanitize_optional_env_value(Some("${PROXY}".into())), None);
        assert_eq!(sanitize_optional_env_value(Some("  ".into())), None);
        assert_eq!(
            sanitize_optional_env_value(Some(" http://p:8080 ".into())),
            Some("http://p:8080".to_string())
        );
    }

    #[test]
    fn flags_become_a_patch() {
        let patch = cli(&[
            "--max-attempts",
            "3",
            "--identity-patch",
            "off",
            "--base-url",
            "https://example.test",
        ])
        .config_patch()
        .unwrap();
        assert_eq!(patch.max_attempts, Some(3));
        assert_eq!(patch.identity_patch, Some(false));
        assert_eq!(patch.base_url.as_deref(), Some("https://example.test"));
        assert_eq!(patch.user_agent, None);
    }

    #[test]
    fn bad_numbers_are_rejected() {
        let err = cli(&["--max-attempts", "many"]).config_patch().unwrap_err();
        assert!(err.to_string().contains("AGPROXY_MAX_ATTEMPTS"));
    }

    #[test]
    fn gemini_flags_come_in_pairs() {
        let argv = ["agproxy", "--account", "a.json", "--gemini-model", "gemini-3-flash"];
        assert!(Cli::try_parse_from(argv).is_err());
    }
}
