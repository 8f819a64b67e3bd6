//! Redaction of credentials before anything reaches a log line or a caller

use serde_json::Value;

pub const REDACTED: &str = "***REDACTED***";

const SENSITIVE_KEYS: &[&str] = &[
    "api_key",
    "apikey",
    "secret",
    "password",
    "token",
    "authorization",
    "auth",
    "key",
];

const SENSITIVE_PARAMS: &[&str] = &["token", "key", "secret", "api_key", "auth", "access_token"];

/// Longest upstream body excerpt kept in logs.
const MAX_EXCERPT: usize = 300;

pub fn is_sensitive_key(key: &str) -> bool {
    let key = key.to_lowercase();
    SENSITIVE_KEYS.iter().any(|k| key.contains(k))
}

/// Copy of `value` with every sensitive object key replaced by [`REDACTED`].
pub fn sanitize_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let v = if is_sensitive_key(k) {
                        Value::String(REDACTED.to_string())
                    } else {
                        sanitize_value(v)
                    };
                    (k.clone(), v)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(sanitize_value).collect()),
        other => other.clone(),
    }
}

/// Drops credential-bearing query parameters from a URL.
pub fn sanitize_url(raw: &str) -> String {
    let Ok(mut parsed) = url::Url::parse(raw) else {
        return raw.to_string();
    };
    if parsed.query().is_none() {
        return parsed.to_string();
    }

    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| !SENSITIVE_PARAMS.contains(&k.to_lowercase().as_str()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if kept.is_empty() {
        parsed.set_query(None);
    } else {
        parsed.query_pairs_mut().clear().extend_pairs(kept);
    }
    parsed.to_string()
}

/// Best-effort redaction for bearer tokens and `sk-` style API keys in free text.
pub fn redact_secrets(input: &str) -> String {
    let mut out = Vec::new();
    let mut redact_next = false;

    for word in input.split(' ') {
        if redact_next && !word.is_empty() {
            out.push(REDACTED.to_string());
            redact_next = false;
            continue;
        }
        if word.eq_ignore_ascii_case("bearer") || word.eq_ignore_ascii_case("basic") {
            redact_next = true;
            out.push(word.to_string());
            continue;
        }
        if let Some(rest) = word.strip_prefix("sk-")
            && rest.len() >= 8
        {
            out.push(format!("sk-{REDACTED}"));
            continue;
        }
        out.push(word.to_string());
    }

    out.join(" ")
}

/// Sanitized, truncated excerpt of an upstream body, suitable for a log field.
pub fn sanitize_body(body: &str) -> String {
    let cleaned = match serde_json::from_str::<Value>(body) {
        Ok(json) => sanitize_value(&json).to_string(),
        Err(_) => redact_secrets(body),
    };
    if cleaned.chars().count() > MAX_EXCERPT {
        let mut excerpt: String = cleaned.chars().take(MAX_EXCERPT).collect();
        excerpt.push_str("...");
        excerpt
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_sensitive_keys_are_redacted() {
        let payload = json!({
            "error": "invalid_client",
            "access_token": "abc",
            "details": { "clientSecret": "s3cr3t", "status": 401 },
            "items": [{ "apiKey": "k" }]
        });
        let clean = sanitize_value(&payload);

        assert_eq!(clean["error"], "invalid_client");
        assert_eq!(clean["access_token"], REDACTED);
        assert_eq!(clean["details"]["clientSecret"], REDACTED);
        assert_eq!(clean["details"]["status"], 401);
        assert_eq!(clean["items"][0]["apiKey"], REDACTED);
    }

    #[test]
    fn sensitive_query_params_are_dropped() {
        assert_eq!(
            sanitize_url("https://api.example/search?q=shoes&api_key=123&token=abc"),
            "https://api.example/search?q=shoes"
        );
        assert_eq!(
            sanitize_url("https://api.example/search?key=1"),
            "https://api.example/search"
        );
        assert_eq!(sanitize_url("not a url"), "not a url");
    }

    #[test]
    fn bearer_and_sk_tokens_are_redacted() {
        let text = "sent Authorization: Bearer eyJhbGciOi to upstream with sk-abcdefghijk";
        let clean = redact_secrets(text);
        assert!(!clean.contains("eyJhbGciOi"));
        assert!(!clean.contains("abcdefghijk"));
        assert!(clean.contains("Bearer ***REDACTED***"));
    }

    #[test]
    fn bodies_are_truncated() {
        let body = "x".repeat(1000);
        assert!(sanitize_body(&body).len() < 400);
    }
}
