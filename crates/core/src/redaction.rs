//! Strips personally identifying substrings from any text destined for
//! a log line or a stored payload preview. Deliberately pattern-based:
//! the rules here are the whole contract.

use std::sync::OnceLock;

use regex::Regex;

const EMAIL_PLACEHOLDER: &str = "[redacted-email]";
const PHONE_PLACEHOLDER: &str = "[redacted-phone]";

fn email_pattern() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| {
        Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}")
            .unwrap_or_else(|_| unreachable!("email pattern is a valid literal"))
    })
}

/// 10+ digits, allowing spaces, dots, dashes and parentheses between
/// groups, with an optional leading +country prefix.
fn phone_pattern() -> &'static Regex {
    static PHONE: OnceLock<Regex> = OnceLock::new();
    PHONE.get_or_init(|| {
        Regex::new(r"\+?\d[\d\s().-]{8,}\d")
            .unwrap_or_else(|_| unreachable!("phone pattern is a valid literal"))
    })
}

fn digit_count(candidate: &str) -> usize {
    candidate.chars().filter(char::is_ascii_digit).count()
}

/// Replace every email address and 10+-digit phone sequence in `input`.
pub fn redact_text(input: &str) -> String {
    let without_emails = email_pattern().replace_all(input, EMAIL_PLACEHOLDER);
    phone_pattern()
        .replace_all(&without_emails, |caps: &regex::Captures<'_>| {
            let matched = &caps[0];
            if digit_count(matched) >= 10 {
                PHONE_PLACEHOLDER.to_string()
            } else {
                matched.to_string()
            }
        })
        .into_owned()
}

/// Apply [`redact_text`] to every string leaf of a JSON payload,
/// preserving structure. Keys are left untouched.
pub fn redact_payload_preview(payload: &serde_json::Value) -> serde_json::Value {
    match payload {
        serde_json::Value::String(text) => serde_json::Value::String(redact_text(text)),
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(redact_payload_preview).collect())
        }
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.iter().map(|(key, value)| (key.clone(), redact_payload_preview(value))).collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{redact_payload_preview, redact_text};

    #[test]
    fn emails_never_survive_redaction() {
        let output = redact_text("Contact maria.lopez+aid@university.edu for details");
        assert!(!output.contains("maria.lopez"));
        assert!(!output.contains("@university.edu"));
        assert!(output.contains("[redacted-email]"));
    }

    #[test]
    fn ten_digit_phones_are_redacted_in_common_shapes() {
        for input in
            ["call 555-867-5309-0", "call (555) 867 5309 01", "call +1 555.867.5309", "5558675309"]
        {
            let output = redact_text(input);
            assert!(!output.contains("5309"), "{input} -> {output}");
        }
    }

    #[test]
    fn short_numeric_sequences_are_preserved() {
        let output = redact_text("room 4021, course id 555-1212");
        assert_eq!(output, "room 4021, course id 555-1212");
    }

    #[test]
    fn json_previews_are_redacted_at_every_string_leaf() {
        let payload = json!({
            "to": "sam@example.org",
            "nested": {"note": "call 555-867-5309-0"},
            "count": 3,
        });
        let redacted = redact_payload_preview(&payload);
        assert_eq!(redacted["to"], "[redacted-email]");
        assert_eq!(redacted["nested"]["note"], "call [redacted-phone]");
        assert_eq!(redacted["count"], 3);
    }
}
