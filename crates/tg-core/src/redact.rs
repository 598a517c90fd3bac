// SPDX-License-Identifier: MIT OR Apache-2.0
//! Recursive redaction of sensitive keys in structured payloads.
//!
//! Redaction runs before structured logging and before audit persistence,
//! never after. It operates on deserialized JSON values, not raw text, and
//! recurses through objects and arrays at any depth.

use serde_json::Value;

/// Replacement literal written in place of a sensitive value.
pub const REDACTED: &str = "***REDACTED***";

/// Key fragments that mark a value as sensitive. Matching is
/// case-insensitive and substring-based: `jira_api_token` matches
/// `api_token`.
const SENSITIVE_KEYS: [&str; 10] = [
    "password",
    "token",
    "secret",
    "api_key",
    "apikey",
    "authorization",
    "auth",
    "credentials",
    "credit_card",
    "ssn",
];

fn is_sensitive(key: &str) -> bool {
    let lowered = key.to_ascii_lowercase();
    SENSITIVE_KEYS.iter().any(|frag| lowered.contains(frag))
}

/// Return a copy of `value` with every sensitive key's value replaced by
/// [`REDACTED`], recursing into nested objects and arrays.
#[must_use]
pub fn redact_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, inner) in map {
                if is_sensitive(key) {
                    out.insert(key.clone(), Value::String(REDACTED.to_string()));
                } else {
                    out.insert(key.clone(), redact_value(inner));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact_value).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn redacts_top_level_keys() {
        let input = json!({ "password": "hunter2", "name": "alice" });
        let out = redact_value(&input);
        assert_eq!(out["password"], json!(REDACTED));
        assert_eq!(out["name"], json!("alice"));
    }

    #[test]
    fn redacts_nested_objects_and_arrays() {
        let input = json!({
            "instances": [
                { "id": "i1", "api_token": "t0ps3cret" },
                { "id": "i2", "config": { "authorization": "Bearer abc" } }
            ]
        });
        let out = redact_value(&input);
        assert_eq!(out["instances"][0]["api_token"], json!(REDACTED));
        assert_eq!(
            out["instances"][1]["config"]["authorization"],
            json!(REDACTED)
        );
        assert_eq!(out["instances"][0]["id"], json!("i1"));
    }

    #[test]
    fn matching_is_substring_and_case_insensitive() {
        let input = json!({ "Jira_Api_Token": "x", "CREDENTIALS": { "inner": 1 } });
        let out = redact_value(&input);
        assert_eq!(out["Jira_Api_Token"], json!(REDACTED));
        // A sensitive key redacts the whole subtree, structured or not.
        assert_eq!(out["CREDENTIALS"], json!(REDACTED));
    }

    #[test]
    fn scalars_pass_through() {
        assert_eq!(redact_value(&json!(42)), json!(42));
        assert_eq!(redact_value(&json!("plain")), json!("plain"));
        assert_eq!(redact_value(&json!(null)), json!(null));
    }

    proptest! {
        // A redacted tree never contains a sensitive key with a
        // non-redacted string value, at any depth.
        #[test]
        fn no_sensitive_value_survives(secret in "[a-z0-9]{8,16}") {
            let input = json!({
                "outer": {
                    "secret": secret.clone(),
                    "list": [{ "password": secret.clone() }],
                },
                "kept": "visible",
            });
            let out = redact_value(&input);
            let rendered = out.to_string();
            prop_assert!(!rendered.contains(&secret));
            prop_assert!(rendered.contains("visible"));
        }
    }
}
