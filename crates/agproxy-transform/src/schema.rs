//! Rewrites JSON-Schema tool parameters into the OpenAPI subset accepted by
//! Gemini function declarations.

use std::collections::HashSet;
use std::sync::{Mutex, OnceLock};

use serde_json::{Map, Value as JsonValue};
use tracing::warn;

pub const SCHEMA_CLEAN_WARN_ENV: &str = "AGPROXY_SCHEMA_CLEAN_WARN";

/// Keys dropped wherever they appear in a schema object.
const EXCLUDED_KEYS: &[&str] = &[
    "$schema",
    "$id",
    "$ref",
    "$defs",
    "definitions",
    "minLength",
    "maxLength",
    "pattern",
    "minimum",
    "maximum",
    "exclusiveMinimum",
    "exclusiveMaximum",
    "multipleOf",
    "uniqueItems",
    "minItems",
    "maxItems",
    "oneOf",
    "anyOf",
    "allOf",
    "not",
    "if",
    "then",
    "else",
    "minProperties",
    "maxProperties",
    "patternProperties",
    "propertyNames",
    "dependencies",
    "dependentSchemas",
    "dependentRequired",
    "default",
    "const",
    "examples",
    "deprecated",
    "readOnly",
    "writeOnly",
    "contentMediaType",
    "contentEncoding",
    "strict",
];

/// Subset of [`EXCLUDED_KEYS`] that changes what a tool accepts; removing one
/// is worth a diagnostic.
const VALIDATION_KEYS: &[&str] = &[
    "minLength",
    "maxLength",
    "pattern",
    "minimum",
    "maximum",
    "exclusiveMinimum",
    "exclusiveMaximum",
    "multipleOf",
    "uniqueItems",
    "minItems",
    "maxItems",
    "minProperties",
    "maxProperties",
    "patternProperties",
    "propertyNames",
    "dependencies",
    "dependentSchemas",
    "dependentRequired",
];

const ALLOWED_FORMATS: &[&str] = &["date-time", "date", "time"];

#[derive(Debug)]
pub struct SchemaSanitizer {
    warn_removed: bool,
    warned: Mutex<HashSet<String>>,
}

impl SchemaSanitizer {
    pub fn new(warn_removed: bool) -> Self {
        Self {
            warn_removed,
            warned: Mutex::new(HashSet::new()),
        }
    }

    /// Warnings follow `AGPROXY_SCHEMA_CLEAN_WARN`; unset means on for debug builds only.
    pub fn from_env() -> Self {
        let warn_removed = match std::env::var(SCHEMA_CLEAN_WARN_ENV) {
            Ok(value) => match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => cfg!(debug_assertions),
            },
            Err(_) => cfg!(debug_assertions),
        };
        Self::new(warn_removed)
    }

    /// Process-wide instance; its warn-once set lives as long as the process.
    pub fn shared() -> &'static SchemaSanitizer {
        static SHARED: OnceLock<SchemaSanitizer> = OnceLock::new();
        SHARED.get_or_init(SchemaSanitizer::from_env)
    }

    pub fn clean(&self, schema: &JsonValue) -> JsonValue {
        let mut root = match self.clean_node(schema, "$") {
            JsonValue::Object(map) => map,
            _ => Map::new(),
        };
        if !root.contains_key("type") {
            root.insert("type".to_string(), JsonValue::String("OBJECT".to_string()));
        }
        // Every declaration root carries `properties`, whatever its type.
        if !root.contains_key("properties") {
            root.insert("properties".to_string(), JsonValue::Object(Map::new()));
        }
        JsonValue::Object(root)
    }

    /// Validation keywords that have been reported so far.
    pub fn warned_keywords(&self) -> Vec<String> {
        let mut keys = match self.warned.lock() {
            Ok(guard) => guard.iter().cloned().collect::<Vec<_>>(),
            Err(_) => Vec::new(),
        };
        keys.sort();
        keys
    }

    fn clean_node(&self, value: &JsonValue, path: &str) -> JsonValue {
        match value {
            JsonValue::Object(map) => JsonValue::Object(self.clean_object(map, path)),
            JsonValue::Array(items) => JsonValue::Array(
                items
                    .iter()
                    .enumerate()
                    .map(|(idx, item)| self.clean_node(item, &format!("{path}[{idx}]")))
                    .collect(),
            ),
            JsonValue::Null | JsonValue::Bool(_) | JsonValue::Number(_) | JsonValue::String(_) => {
                value.clone()
            }
        }
    }

    fn clean_object(&self, map: &Map<String, JsonValue>, path: &str) -> Map<String, JsonValue> {
        let mut out = Map::new();
        for (key, value) in map {
            if EXCLUDED_KEYS.contains(&key.as_str()) {
                self.note_removed(key, path);
                continue;
            }
            match key.as_str() {
                "type" => {
                    out.insert(key.clone(), normalize_type(value));
                }
                "format" => {
                    if let JsonValue::String(format) = value
                        && ALLOWED_FORMATS.contains(&format.as_str())
                    {
                        out.insert(key.clone(), value.clone());
                    }
                }
                "additionalProperties" => {
                    let allowed = matches!(value, JsonValue::Bool(true));
                    out.insert(key.clone(), JsonValue::Bool(allowed));
                }
                "properties" => {
                    // Property names are user data, never schema keywords.
                    if let JsonValue::Object(props) = value {
                        let cleaned = props
                            .iter()
                            .map(|(name, schema)| {
                                let child = format!("{path}.properties.{name}");
                                (name.clone(), self.clean_node(schema, &child))
                            })
                            .collect();
                        out.insert(key.clone(), JsonValue::Object(cleaned));
                    }
                }
                "enum" | "required" => {
                    out.insert(key.clone(), value.clone());
                }
                _ => {
                    let child = format!("{path}.{key}");
                    out.insert(key.clone(), self.clean_node(value, &child));
                }
            }
        }
        repair_required(&mut out);
        out
    }

    fn note_removed(&self, key: &str, path: &str) {
        if !self.warn_removed || !VALIDATION_KEYS.contains(&key) {
            return;
        }
        let Ok(mut warned) = self.warned.lock() else {
            return;
        };
        if warned.insert(key.to_string()) {
            warn!(
                keyword = key,
                path = path,
                "schema keyword removed for upstream compatibility"
            );
        }
    }
}

fn normalize_type(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::String(name) => JsonValue::String(name.to_ascii_uppercase()),
        JsonValue::Array(items) => {
            let first = items
                .iter()
                .filter_map(JsonValue::as_str)
                .find(|name| !name.eq_ignore_ascii_case("null"))
                .unwrap_or("STRING");
            JsonValue::String(first.to_ascii_uppercase())
        }
        JsonValue::Null | JsonValue::Bool(_) | JsonValue::Number(_) | JsonValue::Object(_) => {
            value.clone()
        }
    }
}

/// Keeps only `required` names present in sibling `properties`; drops an empty list.
fn repair_required(schema: &mut Map<String, JsonValue>) {
    let Some(required) = schema.remove("required") else {
        return;
    };
    let JsonValue::Array(names) = required else {
        return;
    };
    let Some(JsonValue::Object(props)) = schema.get("properties") else {
        return;
    };
    let mut kept: Vec<JsonValue> = Vec::new();
    for name in names {
        if let JsonValue::String(field) = &name
            && props.contains_key(field)
            && !kept.contains(&name)
        {
            kept.push(name);
        }
    }
    if !kept.is_empty() {
        schema.insert("required".to_string(), JsonValue::Array(kept));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sanitizer() -> SchemaSanitizer {
        SchemaSanitizer::new(true)
    }

    #[test]
    fn strips_unsupported_keywords_and_uppercases_types() {
        let input = json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "type": "object",
            "properties": {
                "name": {"type": "string", "minLength": 1, "pattern": "^a"},
                "when": {"type": "string", "format": "date-time"},
                "mail": {"type": "string", "format": "email"},
                "tags": {"type": "array", "items": {"type": "string"}, "uniqueItems": true},
                "choice": {"anyOf": [{"type": "string"}, {"type": "number"}]}
            },
            "required": ["name"],
            "additionalProperties": false
        });
        let cleaned = sanitizer().clean(&input);
        assert_eq!(
            cleaned,
            json!({
                "type": "OBJECT",
                "properties": {
                    "name": {"type": "STRING"},
                    "when": {"type": "STRING", "format": "date-time"},
                    "mail": {"type": "STRING"},
                    "tags": {"type": "ARRAY", "items": {"type": "STRING"}},
                    "choice": {}
                },
                "required": ["name"],
                "additionalProperties": false
            })
        );
    }

    #[test]
    fn type_arrays_collapse_to_first_non_null() {
        let cleaned = sanitizer().clean(&json!({
            "type": "object",
            "properties": {
                "a": {"type": ["null", "integer"]},
                "b": {"type": ["null"]}
            }
        }));
        assert_eq!(cleaned["properties"]["a"]["type"], json!("INTEGER"));
        assert_eq!(cleaned["properties"]["b"]["type"], json!("STRING"));
    }

    #[test]
    fn additional_properties_schema_becomes_false() {
        let cleaned = sanitizer().clean(&json!({
            "type": "object",
            "properties": {},
            "additionalProperties": {"type": "string"}
        }));
        assert_eq!(cleaned["additionalProperties"], json!(false));
    }

    #[test]
    fn required_drops_unknown_names_and_empty_list() {
        let cleaned = sanitizer().clean(&json!({
            "type": "object",
            "properties": {"a": {"type": "string"}},
            "required": ["a", "ghost"]
        }));
        assert_eq!(cleaned["required"], json!(["a"]));

        let cleaned = sanitizer().clean(&json!({
            "type": "object",
            "properties": {"a": {"type": "string"}},
            "required": ["ghost"]
        }));
        assert!(cleaned.get("required").is_none());

        let cleaned = sanitizer().clean(&json!({
            "type": "object",
            "properties": {
                "inner": {"type": "object", "required": ["x"]}
            }
        }));
        assert!(cleaned["properties"]["inner"].get("required").is_none());
    }

    #[test]
    fn property_named_like_keyword_survives() {
        let cleaned = sanitizer().clean(&json!({
            "type": "object",
            "properties": {"pattern": {"type": "string"}, "default": {"type": "boolean"}},
            "required": ["pattern"]
        }));
        assert_eq!(cleaned["properties"]["pattern"], json!({"type": "STRING"}));
        assert_eq!(cleaned["properties"]["default"], json!({"type": "BOOLEAN"}));
        assert_eq!(cleaned["required"], json!(["pattern"]));
    }

    #[test]
    fn empty_or_non_object_input_gets_object_defaults() {
        let expected = json!({"type": "OBJECT", "properties": {}});
        assert_eq!(sanitizer().clean(&json!({})), expected);
        assert_eq!(sanitizer().clean(&JsonValue::Null), expected);
    }

    #[test]
    fn root_always_gets_properties() {
        assert_eq!(
            sanitizer().clean(&json!({"type": "string", "required": ["x"]})),
            json!({"type": "STRING", "properties": {}})
        );
        let nested = sanitizer().clean(&json!({
            "type": "object",
            "properties": {"tags": {"type": "array", "items": {"type": "string"}}}
        }));
        assert_eq!(
            nested["properties"]["tags"],
            json!({"type": "ARRAY", "items": {"type": "STRING"}})
        );
    }

    #[test]
    fn cleaning_is_idempotent() {
        let inputs = [
            json!({}),
            json!({"type": ["string", "null"], "format": "uuid", "default": "x"}),
            json!({
                "type": "object",
                "properties": {
                    "list": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {"id": {"type": "integer", "minimum": 0}},
                            "required": ["id", "missing"],
                            "additionalProperties": {"type": "string"}
                        }
                    },
                    "nested": {"oneOf": [{"type": "string"}]}
                },
                "required": ["list", "nested", "nope"],
                "$defs": {"x": {"type": "string"}}
            }),
        ];
        let sanitizer = sanitizer();
        for input in inputs {
            let once = sanitizer.clean(&input);
            let twice = sanitizer.clean(&once);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn validation_keyword_reported_once() {
        let sanitizer = sanitizer();
        let schema = json!({
            "type": "object",
            "properties": {
                "a": {"type": "string", "minLength": 1},
                "b": {"type": "string", "minLength": 2, "default": "x"}
            }
        });
        sanitizer.clean(&schema);
        sanitizer.clean(&schema);
        assert_eq!(sanitizer.warned_keywords(), vec!["minLength".to_string()]);
    }

    #[test]
    fn disabled_warnings_track_nothing() {
        let sanitizer = SchemaSanitizer::new(false);
        sanitizer.clean(&json!({"type": "string", "maxLength": 3}));
        assert!(sanitizer.warned_keywords().is_empty());
    }
}
