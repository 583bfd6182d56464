//! Secret redaction for payloads, free text and HTTP headers.
//!
//! Nothing here fails: unknown shapes pass through untouched and invalid
//! extra patterns are skipped with a warning.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};
use serde_json::Value;
use tracing::warn;

/// Replacement used when no placeholder is supplied.
pub const DEFAULT_PLACEHOLDER: &str = "[REDACTED]";

static SECRET_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(api_?key|secret|password|passwd|token|access_token|refresh_token|credentials|.+_secret)$",
    )
    .expect("secret key pattern is valid")
});

static BEARER_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)bearer\s+[a-zA-Z0-9\-._~+/]+=*").expect("bearer pattern is valid")
});

static PROVIDER_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"sk_(?:live|test)_[A-Za-z0-9]+").expect("provider key pattern is valid")
});

static SECRET_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(proxy-authorization|authorization|x-api-key|api-key|x-auth-token|x-access-token)$")
        .expect("header pattern is valid")
});

/// Key-based JSON redactor.
#[derive(Debug, Clone)]
pub struct Redactor {
    extra: Vec<Regex>,
    placeholder: String,
}

impl Default for Redactor {
    fn default() -> Self {
        Self {
            extra: Vec::new(),
            placeholder: DEFAULT_PLACEHOLDER.to_string(),
        }
    }
}

impl Redactor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_placeholder(mut self, placeholder: impl Into<String>) -> Self {
        self.placeholder = placeholder.into();
        self
    }

    /// Add case-insensitive key patterns on top of the built-in secret names.
    pub fn with_extra_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for pattern in patterns {
            let pattern = pattern.as_ref();
            match RegexBuilder::new(pattern).case_insensitive(true).build() {
                Ok(re) => self.extra.push(re),
                Err(err) => {
                    warn!(event = "redact.pattern_invalid", pattern = %pattern, error = %err)
                }
            }
        }
        self
    }

    pub fn is_secret_key(&self, key: &str) -> bool {
        let normalized = key.replace('-', "_");
        SECRET_KEY.is_match(&normalized) || self.extra.iter().any(|re| re.is_match(key))
    }

    /// Walk objects and arrays, replacing the value of every secret-named key.
    pub fn redact(&self, payload: &Value) -> Value {
        match payload {
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(key, value)| {
                        let redacted = if self.is_secret_key(key) {
                            Value::String(self.placeholder.clone())
                        } else {
                            self.redact(value)
                        };
                        (key.clone(), redacted)
                    })
                    .collect(),
            ),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.redact(v)).collect()),
            other => other.clone(),
        }
    }
}

/// Redact secret-named keys with the default rules and placeholder.
pub fn redact(payload: &Value) -> Value {
    Redactor::default().redact(payload)
}

/// Redact with additional key patterns and a custom placeholder.
pub fn redact_with(payload: &Value, extra_patterns: &[&str], placeholder: &str) -> Value {
    Redactor::new()
        .with_placeholder(placeholder)
        .with_extra_patterns(extra_patterns)
        .redact(payload)
}

/// Scrub bearer tokens and provider API keys embedded in free text.
pub fn redact_text(text: &str) -> String {
    let text = BEARER_TOKEN.replace_all(text, "Bearer [REDACTED]");
    PROVIDER_KEY
        .replace_all(&text, DEFAULT_PLACEHOLDER)
        .into_owned()
}

/// Key redaction plus free-text scrubbing of every string leaf.
///
/// This is what audit records and log lines go through.
pub fn scrub(payload: &Value) -> Value {
    scrub_strings(redact(payload))
}

fn scrub_strings(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(redact_text(&s)),
        Value::Array(items) => Value::Array(items.into_iter().map(scrub_strings).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, scrub_strings(v)))
                .collect(),
        ),
        other => other,
    }
}

/// Mask credential-bearing headers; other headers pass through unchanged.
pub fn mask_headers(headers: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            if SECRET_HEADER.is_match(name) {
                (name.clone(), DEFAULT_PLACEHOLDER.to_string())
            } else {
                (name.clone(), value.clone())
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_redacts_api_key() {
        let out = redact(&json!({"api_key": "sk-123", "amount": 10}));
        assert_eq!(out["api_key"], "[REDACTED]");
        assert_eq!(out["amount"], 10);
    }

    #[test]
    fn test_redacts_nested_lists_of_objects() {
        let out = redact(&json!({
            "accounts": [
                {"name": "ops", "password": "hunter2"},
                {"name": "svc", "client_secret": "abc", "nested": {"Refresh-Token": "r1"}}
            ]
        }));
        assert_eq!(out["accounts"][0]["password"], "[REDACTED]");
        assert_eq!(out["accounts"][0]["name"], "ops");
        assert_eq!(out["accounts"][1]["client_secret"], "[REDACTED]");
        assert_eq!(out["accounts"][1]["nested"]["Refresh-Token"], "[REDACTED]");
    }

    #[test]
    fn test_secret_key_replaces_whole_container() {
        let out = redact(&json!({"credentials": {"user": "a", "pass": "b"}}));
        assert_eq!(out["credentials"], "[REDACTED]");
    }

    #[test]
    fn test_non_container_returned_unchanged() {
        assert_eq!(redact(&json!("Bearer abc")), json!("Bearer abc"));
        assert_eq!(redact(&json!(42)), json!(42));
        assert_eq!(redact(&Value::Null), Value::Null);
    }

    #[test]
    fn test_key_names_are_case_insensitive() {
        let out = redact(&json!({"API_KEY": "x", "Token": "y", "tokenizer": "keep"}));
        assert_eq!(out["API_KEY"], "[REDACTED]");
        assert_eq!(out["Token"], "[REDACTED]");
        assert_eq!(out["tokenizer"], "keep");
    }

    #[test]
    fn test_extra_patterns_and_placeholder() {
        let out = redact_with(&json!({"ssn": "123", "name": "x"}), &["^ssn$", "("], "***");
        assert_eq!(out["ssn"], "***");
        assert_eq!(out["name"], "x");
    }

    #[test]
    fn test_redact_text_scrubs_tokens() {
        let out = redact_text("auth failed for Bearer eyJhbGciOi.payload.sig with sk_live_42abc");
        assert!(!out.contains("eyJhbGciOi"));
        assert!(!out.contains("sk_live_42abc"));
        assert!(out.contains("Bearer [REDACTED]"));
        assert_eq!(redact_text("nothing to see"), "nothing to see");
    }

    #[test]
    fn test_scrub_combines_keys_and_text() {
        let out = scrub(&json!({"api_key": "k", "note": "use sk_test_abc123"}));
        assert_eq!(out["api_key"], "[REDACTED]");
        assert_eq!(out["note"], "use [REDACTED]");
    }

    #[test]
    fn test_mask_headers() {
        let mut headers = BTreeMap::new();
        headers.insert("authorization".to_string(), "Bearer abc".to_string());
        headers.insert("X-API-Key".to_string(), "k".to_string());
        headers.insert("X-Auth-Token".to_string(), "t".to_string());
        headers.insert("Content-Type".to_string(), "application/json".to_string());

        let masked = mask_headers(&headers);
        assert_eq!(masked["authorization"], "[REDACTED]");
        assert_eq!(masked["X-API-Key"], "[REDACTED]");
        assert_eq!(masked["X-Auth-Token"], "[REDACTED]");
        assert_eq!(masked["Content-Type"], "application/json");
    }
}
