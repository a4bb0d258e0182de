//! Scrubs sensitive patterns from user-visible error messages.

use once_cell::sync::Lazy;
use regex::Regex;

static API_KEY: Lazy<Regex> = Lazy::new(|| {
    // Common key shapes: sk-..., AKIA..., long hex/base64-ish tokens after
    // "key"/"token"/"secret" markers.
    Regex::new(r"(?i)\b(?:sk|pk|rk)-[A-Za-z0-9_-]{16,}|\bAKIA[A-Z0-9]{16}\b|\b(?:api[_-]?key|token|secret)\s*[=:]\s*\S+").unwrap()
});

static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap());

static CREDIT_CARD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:\d[ -]?){13,16}\b").unwrap());

static RAW_POINTER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b0x[0-9a-fA-F]{6,16}\b").unwrap());

static ABS_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:/[A-Za-z0-9._-]+){3,}").unwrap());

/// Replace API-key-like tokens, emails, card numbers and raw pointers in
/// `message` with `[REDACTED]`.
///
/// When `redact_paths` is set (production mode), absolute filesystem paths
/// are scrubbed as well.
pub fn sanitize_message(message: &str, redact_paths: bool) -> String {
    let mut out = API_KEY.replace_all(message, "[REDACTED]").into_owned();
    out = EMAIL.replace_all(&out, "[REDACTED]").into_owned();
    out = CREDIT_CARD.replace_all(&out, "[REDACTED]").into_owned();
    out = RAW_POINTER.replace_all(&out, "[REDACTED]").into_owned();
    if redact_paths {
        out = ABS_PATH.replace_all(&out, "[PATH]").into_owned();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scrubs_api_keys() {
        let msg = "auth failed: api_key=abcd1234efgh5678 rejected";
        let out = sanitize_message(msg, false);
        assert!(!out.contains("abcd1234efgh5678"));
        assert!(out.contains("[REDACTED]"));
    }

    #[test]
    fn test_scrubs_emails_and_pointers() {
        let msg = "user alice@example.com at 0xdeadbeef01";
        let out = sanitize_message(msg, false);
        assert!(!out.contains("alice@example.com"));
        assert!(!out.contains("0xdeadbeef01"));
    }

    #[test]
    fn test_scrubs_card_numbers() {
        let out = sanitize_message("card 4111 1111 1111 1111 declined", false);
        assert!(!out.contains("4111"));
    }

    #[test]
    fn test_paths_only_in_production_mode() {
        let msg = "cannot open /home/alice/secrets/blocks/math.so";
        assert!(sanitize_message(msg, false).contains("/home/alice"));
        let prod = sanitize_message(msg, true);
        assert!(!prod.contains("/home/alice"));
        assert!(prod.contains("[PATH]"));
    }

    #[test]
    fn test_plain_messages_untouched() {
        let msg = "division by zero";
        assert_eq!(sanitize_message(msg, true), msg);
    }
}
