//! Secret masking for logs, error reports and diagnostic payloads

use serde_json::Value;

/// Replacement written in place of every secret occurrence.
pub const REDACTED: &str = "**** REDACTED ***";

/// Replace every occurrence of every non-empty secret in `text`.
pub fn mask_secrets<S: AsRef<str>>(text: &str, secrets: &[S]) -> String {
    let mut masked = text.to_string();
    for secret in secrets {
        let secret = secret.as_ref();
        if secret.is_empty() {
            continue;
        }
        if masked.contains(secret) {
            masked = masked.replace(secret, REDACTED);
        }
    }
    masked
}

/// Mask each entry of a list of lines.
pub fn mask_secrets_in_slice<S: AsRef<str>>(texts: &[String], secrets: &[S]) -> Vec<String> {
    texts
        .iter()
        .map(|text| mask_secrets(text, secrets))
        .collect()
}

/// Mask every string inside a JSON document, including object keys,
/// list entries and nested objects.
pub fn mask_value<S: AsRef<str>>(value: &Value, secrets: &[S]) -> Value {
    match value {
        Value::String(s) => Value::String(mask_secrets(s, secrets)),
        Value::Array(items) => Value::Array(items.iter().map(|v| mask_value(v, secrets)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (mask_secrets(k, secrets), mask_value(v, secrets)))
                .collect(),
        ),
        other => other.clone(),
    }
}
