//! Error classification for upstream error envelopes
//!
//! The backend reports failures as `{"error": {"code": ..., "message": ...}}`.
//! This module maps those envelopes (or raw text when the body is not an
//! envelope) to a [`FailureKind`] plus a message fit for display.

use serde_json::Value;

use crate::types::FailureKind;
use crate::upstream::truncate_chars;

/// Maximum characters of an unparseable error kept as the message.
const RAW_MESSAGE_LIMIT: usize = 200;

const TOKEN_EXPIRED: &str = "token expired, refresh session token";
const TOKEN_INVALID: &str = "token invalid, refresh session token";
const ACCOUNT_BANNED: &str = "account banned";

/// Map a known upstream error code to its kind and message.
fn classify_code(code: &str) -> Option<(FailureKind, &'static str)> {
    let mapped = match code {
        "token_invalidated" => (FailureKind::TokenExpired, TOKEN_EXPIRED),
        "invalid_api_key" => (FailureKind::TokenExpired, TOKEN_INVALID),
        "account_deactivated" => (FailureKind::Banned, ACCOUNT_BANNED),
        "account_suspended" => (FailureKind::Banned, "account suspended"),
        "subscription_expired" => (FailureKind::Expired, "subscription expired"),
        "rate_limit_exceeded" => (FailureKind::RateLimit, "rate limited"),
        "server_error" => (FailureKind::ServerError, "upstream server error"),
        _ => return None,
    };
    Some(mapped)
}

/// Fallback when the code is unknown: look for telltale words in the message.
fn classify_message(message: &str) -> Option<(FailureKind, &'static str)> {
    let lower = message.to_lowercase();
    if lower.contains("token") && (lower.contains("invalid") || lower.contains("expired")) {
        return Some((FailureKind::TokenExpired, TOKEN_EXPIRED));
    }
    if ["banned", "suspended", "deactivated"]
        .iter()
        .any(|word| lower.contains(word))
    {
        return Some((FailureKind::Banned, ACCOUNT_BANNED));
    }
    None
}

/// Classify an upstream error body.
///
/// Total and deterministic: every input yields exactly one pair.
/// - JSON envelope with a known `code` → table entry.
/// - Envelope with an unknown code → keyword match on `message`, else the
///   message verbatim with kind `error`.
/// - Anything else, including an envelope whose `message` is not a string
///   → kind `error` with the input cut to 200 characters (`"unknown error"`
///   when empty).
pub fn classify_upstream_error(raw: &str) -> (FailureKind, String) {
    let envelope = serde_json::from_str::<Value>(raw.trim())
        .ok()
        .and_then(|v| v.get("error").filter(|e| e.is_object()).cloned());

    let Some(error) = envelope else {
        return raw_fallback(raw);
    };

    let code = error.get("code").and_then(Value::as_str).unwrap_or_default();
    if let Some((kind, text)) = classify_code(code) {
        return (kind, text.to_string());
    }

    // A missing message reads as empty; a message that is not a string
    // leaves nothing to show, so the raw body is used instead.
    let message = match error.get("message") {
        None => "",
        Some(Value::String(message)) => message.as_str(),
        Some(_) => return raw_fallback(raw),
    };

    if let Some((kind, text)) = classify_message(message) {
        return (kind, text.to_string());
    }

    (FailureKind::Error, message.to_string())
}

fn raw_fallback(raw: &str) -> (FailureKind, String) {
    if raw.is_empty() {
        return (FailureKind::Error, "unknown error".to_string());
    }
    (FailureKind::Error, truncate_chars(raw, RAW_MESSAGE_LIMIT))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(code: &str, message: &str) -> String {
        serde_json::json!({"error": {"code": code, "message": message}}).to_string()
    }

    #[test]
    fn test_classify_known_codes() {
        assert_eq!(
            classify_upstream_error(&envelope("token_invalidated", "x")),
            (FailureKind::TokenExpired, TOKEN_EXPIRED.to_string())
        );
        assert_eq!(
            classify_upstream_error(&envelope("invalid_api_key", "x")),
            (FailureKind::TokenExpired, TOKEN_INVALID.to_string())
        );
        assert_eq!(
            classify_upstream_error(&envelope("account_deactivated", "x")).0,
            FailureKind::Banned
        );
        assert_eq!(
            classify_upstream_error(&envelope("account_suspended", "x")).0,
            FailureKind::Banned
        );
        assert_eq!(
            classify_upstream_error(&envelope("subscription_expired", "x")).0,
            FailureKind::Expired
        );
        assert_eq!(
            classify_upstream_error(&envelope("rate_limit_exceeded", "x")).0,
            FailureKind::RateLimit
        );
        assert_eq!(
            classify_upstream_error(&envelope("server_error", "x")).0,
            FailureKind::ServerError
        );
    }

    #[test]
    fn test_code_takes_precedence_over_message() {
        let (kind, _) = classify_upstream_error(&envelope("rate_limit_exceeded", "token expired"));
        assert_eq!(kind, FailureKind::RateLimit);
    }

    #[test]
    fn test_classify_by_message_keywords() {
        assert_eq!(
            classify_upstream_error(&envelope("", "Your Token has EXPIRED")),
            (FailureKind::TokenExpired, TOKEN_EXPIRED.to_string())
        );
        assert_eq!(
            classify_upstream_error(&envelope("other", "invalid token supplied")).0,
            FailureKind::TokenExpired
        );
        assert_eq!(
            classify_upstream_error(&envelope("other", "This account was deactivated")),
            (FailureKind::Banned, ACCOUNT_BANNED.to_string())
        );
        // "token" alone is not enough
        assert_eq!(
            classify_upstream_error(&envelope("other", "token missing")),
            (FailureKind::Error, "token missing".to_string())
        );
    }

    #[test]
    fn test_unmatched_envelope_returns_message_verbatim() {
        assert_eq!(
            classify_upstream_error(&envelope("weird", "Something Odd Happened")),
            (FailureKind::Error, "Something Odd Happened".to_string())
        );
    }

    #[test]
    fn test_plain_text_is_truncated() {
        let long: String = "abcdefghij".repeat(30);
        let (kind, message) = classify_upstream_error(&long);
        assert_eq!(kind, FailureKind::Error);
        assert_eq!(message, long[..200]);
    }

    #[test]
    fn test_empty_input_is_unknown() {
        assert_eq!(
            classify_upstream_error(""),
            (FailureKind::Error, "unknown error".to_string())
        );
    }

    #[test]
    fn test_json_without_error_object_falls_back() {
        assert_eq!(
            classify_upstream_error(r#"{"detail":"nope"}"#),
            (FailureKind::Error, r#"{"detail":"nope"}"#.to_string())
        );
        assert_eq!(
            classify_upstream_error(r#"{"error":"flat string"}"#),
            (FailureKind::Error, r#"{"error":"flat string"}"#.to_string())
        );
        assert_eq!(
            classify_upstream_error("[1,2,3]"),
            (FailureKind::Error, "[1,2,3]".to_string())
        );
    }

    #[test]
    fn test_non_string_message_falls_back_to_raw_body() {
        let raw = r#"{"error":{"code":"weird","message":null}}"#;
        assert_eq!(
            classify_upstream_error(raw),
            (FailureKind::Error, raw.to_string())
        );

        let raw = r#"{"error":{"code":"weird","message":{"text":"nested"}}}"#;
        assert_eq!(classify_upstream_error(raw).1, raw);

        // A known code does not need the message at all.
        assert_eq!(
            classify_upstream_error(r#"{"error":{"code":"server_error","message":null}}"#).0,
            FailureKind::ServerError
        );
    }

    #[test]
    fn test_missing_message_reads_as_empty() {
        assert_eq!(
            classify_upstream_error(r#"{"error":{"code":"weird"}}"#),
            (FailureKind::Error, String::new())
        );
    }

    #[test]
    fn test_truncated_json_body_is_treated_as_text() {
        let raw = r#"{"error": {"code": "token_invalidated", "mess"#;
        assert_eq!(
            classify_upstream_error(raw),
            (FailureKind::Error, raw.to_string())
        );
    }
}
