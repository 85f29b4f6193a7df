use crate::utils::text::truncate_utf8_prefix;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;

const DEFAULT_REDACTION: &str = "[REDACTED]";
const INLINE_REDACTION: &str = "***REDACTED***";

static SENSITIVE_KEYS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "password",
        "secret",
        "token",
        "client_secret",
        "access_token",
        "refresh_token",
        "device_code",
        "authorization",
        "temporarypassword",
    ]
    .into_iter()
    .collect()
});

static INLINE_REDACTION_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    vec![
        (
            Regex::new(r"\beyJ[a-zA-Z0-9_-]{10,}\.[a-zA-Z0-9_-]{10,}\.[a-zA-Z0-9_-]{10,}\b")
                .expect("inline redaction regex"),
            INLINE_REDACTION,
        ),
        (
            Regex::new(r"\b(Bearer)\s+([A-Za-z0-9._~+/=-]{10,})").expect("inline redaction regex"),
            "$1 ***REDACTED***",
        ),
        (
            Regex::new(r#"\b(password|client_secret|secret|access_token|refresh_token|device_code)\b(["']?\s*[:=]\s*["']?)([^\s"'&,}]+)"#)
                .expect("inline redaction regex"),
            "$1$2***REDACTED***",
        ),
    ]
});

fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase()
}

pub fn is_sensitive_key(key: &str) -> bool {
    let normalized = normalize_key(key);
    if normalized.is_empty() {
        return false;
    }
    if SENSITIVE_KEYS.contains(normalized.as_str()) {
        return true;
    }
    normalized.contains("secret") || normalized.ends_with("token") || normalized.contains("password")
}

fn truncate_string(value: &str, max_length: usize) -> String {
    if value.len() <= max_length {
        return value.to_string();
    }
    format!("{}...", truncate_utf8_prefix(value, max_length))
}

pub fn redact_text(value: &str, max_string: usize, extra_secrets: Option<&[String]>) -> String {
    let mut out = value.to_string();
    for (re, replacement) in INLINE_REDACTION_PATTERNS.iter() {
        if re.is_match(&out) {
            out = re.replace_all(&out, *replacement).to_string();
        }
    }
    if let Some(values) = extra_secrets {
        for raw in values {
            let needle = raw.trim();
            if needle.len() < 6 {
                continue;
            }
            out = out.replace(needle, INLINE_REDACTION);
        }
    }
    truncate_string(&out, max_string)
}

/// Copy of `value` safe to log: sensitive keys are masked and long strings
/// are cut to `max_string` bytes.
pub fn redact_object(value: &Value, max_string: usize) -> Value {
    match value {
        Value::String(text) => Value::String(redact_text(text, max_string, None)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| redact_object(item, max_string))
                .collect(),
        ),
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (key, entry) in map.iter() {
                if is_sensitive_key(key) {
                    out.insert(key.clone(), Value::String(DEFAULT_REDACTION.to_string()));
                } else {
                    out.insert(key.clone(), redact_object(entry, max_string));
                }
            }
            Value::Object(out)
        }
        _ => value.clone(),
    }
}
