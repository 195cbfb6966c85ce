use crate::account::Account;

pub const FALLBACK_MODEL: &str = "claude-sonnet-4-5";

/// Models the backend serves directly.
pub const SUPPORTED_MODELS: &[&str] = &[
    "claude-opus-4-5-thinking",
    "claude-sonnet-4-5",
    "claude-sonnet-4-5-thinking",
    "gemini-2.5-flash",
    "gemini-2.5-flash-lite",
    "gemini-2.5-flash-thinking",
    "gemini-3-flash",
    "gemini-3-pro-low",
    "gemini-3-pro-high",
    "gemini-3-pro-preview",
    "gemini-3-pro-image",
];

/// Default `requested -> supported` mapping.
pub const DEFAULT_MODEL_MAPPING: &[(&str, &str)] = &[
    ("claude-3-5-sonnet-20241022", "claude-sonnet-4-5"),
    ("claude-3-5-sonnet-20240620", "claude-sonnet-4-5"),
    ("claude-sonnet-4-5-20250929", "claude-sonnet-4-5-thinking"),
    ("claude-opus-4", "claude-opus-4-5-thinking"),
    ("claude-opus-4-5-20251101", "claude-opus-4-5-thinking"),
    ("claude-haiku-4", "gemini-3-flash"),
    ("claude-haiku-4-5", "gemini-3-flash"),
    ("claude-3-haiku-20240307", "gemini-3-flash"),
    ("claude-haiku-4-5-20251001", "gemini-3-flash"),
];

fn default_mapping(requested: &str) -> Option<&'static str> {
    DEFAULT_MODEL_MAPPING
        .iter()
        .find(|(from, _)| *from == requested)
        .map(|(_, to)| *to)
}

/// Account override, then the default table, then pass-through for
/// `gemini-*` and directly supported names, then [`FALLBACK_MODEL`].
pub fn resolve_model(account: &Account, requested: &str) -> String {
    if let Some(mapped) = account.mapped_model(requested) {
        return mapped.to_string();
    }
    if let Some(mapped) = default_mapping(requested) {
        return mapped.to_string();
    }
    if requested.starts_with("gemini-") || SUPPORTED_MODELS.contains(&requested) {
        return requested.to_string();
    }
    FALLBACK_MODEL.to_string()
}

pub fn is_model_supported(requested: &str) -> bool {
    SUPPORTED_MODELS.contains(&requested)
        || default_mapping(requested).is_some()
        || requested.starts_with("gemini-")
        || requested.starts_with("claude-")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn resolution_order() {
        let account = Account {
            model_mapping: HashMap::from([(
                "claude-haiku-4-5".to_string(),
                "gemini-3-pro-high".to_string(),
            )]),
            ..Account::default()
        };
        assert_eq!(resolve_model(&account, "claude-haiku-4-5"), "gemini-3-pro-high");

        let plain = Account::default();
        assert_eq!(resolve_model(&plain, "claude-haiku-4-5"), "gemini-3-flash");
        assert_eq!(resolve_model(&plain, "gemini-9-ultra"), "gemini-9-ultra");
        assert_eq!(
            resolve_model(&plain, "claude-sonnet-4-5-thinking"),
            "claude-sonnet-4-5-thinking"
        );
        assert_eq!(resolve_model(&plain, "claude-2.1"), FALLBACK_MODEL);
    }

    #[test]
    fn support_check() {
        assert!(is_model_supported("claude-2.1"));
        assert!(is_model_supported("gemini-3-flash"));
        assert!(!is_model_supported("gpt-4o"));
    }
}
