use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub const PROJECT_ID_CREDENTIAL: &str = "project_id";

/// Upstream account as seen by the forwarding engine.
///
/// Selection, persistence and health tracking live outside this crate; the
/// engine only reads from it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub credentials: HashMap<String, String>,
    #[serde(default)]
    pub proxy_url: Option<String>,
    /// Account-level `requested -> backend` model overrides.
    #[serde(default)]
    pub model_mapping: HashMap<String, String>,
    /// Read by the inbound layer; the engine carries it through untouched.
    #[serde(default)]
    pub restrict_official_client: bool,
}

impl Account {
    /// Trimmed credential value; blank values count as missing.
    pub fn credential(&self, key: &str) -> Option<&str> {
        self.credentials
            .get(key)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    pub fn project_id(&self) -> Option<&str> {
        self.credential(PROJECT_ID_CREDENTIAL)
    }

    pub fn proxy(&self) -> Option<&str> {
        self.proxy_url
            .as_deref()
            .map(str::trim)
            .filter(|proxy| !proxy.is_empty())
    }

    pub fn mapped_model(&self, requested: &str) -> Option<&str> {
        self.model_mapping
            .get(requested)
            .map(String::as_str)
            .filter(|mapped| !mapped.is_empty() && *mapped != requested)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_values_are_missing() {
        let account = Account {
            credentials: HashMap::from([
                ("project_id".to_string(), "  proj-7 ".to_string()),
                ("refresh_token".to_string(), "   ".to_string()),
            ]),
            proxy_url: Some(" ".to_string()),
            model_mapping: HashMap::from([("a".to_string(), "a".to_string())]),
            ..Account::default()
        };
        assert_eq!(account.project_id(), Some("proj-7"));
        assert_eq!(account.credential("refresh_token"), None);
        assert_eq!(account.proxy(), None);
        assert_eq!(account.mapped_model("a"), None);
    }
}
