//! Input validation for everything that crosses the service boundary.
//!
//! All checks are pure and return `Error::Validation`. Utterance checks run
//! before any chargeable work; password strength is checked at registration.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::error::{Error, Result};

/// Maximum accepted utterance length, in characters.
pub const MAX_UTTERANCE_CHARS: usize = 5000;
/// Maximum accepted external session id length.
pub const MAX_SESSION_ID_CHARS: usize = 100;
/// Metadata shape limits.
pub const MAX_METADATA_KEYS: usize = 50;
pub const MAX_METADATA_VALUE_CHARS: usize = 1000;

fn forbidden_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?i)<script[\s>]",
            r"(?i)</script>",
            r"(?i)javascript:",
            r"(?i)\bon(load|error|click|mouseover)\s*=",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

/// Validate a user utterance: non-empty, bounded length, no script-tag or
/// event-handler patterns. Returns the trimmed text.
pub fn validate_utterance(text: &str) -> Result<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(Error::Validation("utterance must not be empty".into()));
    }
    if trimmed.chars().count() > MAX_UTTERANCE_CHARS {
        return Err(Error::Validation(format!(
            "utterance exceeds {MAX_UTTERANCE_CHARS} characters"
        )));
    }
    for pattern in forbidden_patterns() {
        if pattern.is_match(trimmed) {
            return Err(Error::Validation(
                "utterance contains a forbidden tag pattern".into(),
            ));
        }
    }
    Ok(trimmed.to_owned())
}

/// Validate a client-supplied session id: 1..=100 chars from
/// `[A-Za-z0-9._-]`.
pub fn validate_session_id(session_id: &str) -> Result<()> {
    if session_id.is_empty() {
        return Err(Error::Validation("session_id must not be empty".into()));
    }
    if session_id.chars().count() > MAX_SESSION_ID_CHARS {
        return Err(Error::Validation(format!(
            "session_id exceeds {MAX_SESSION_ID_CHARS} characters"
        )));
    }
    if !session_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(Error::Validation(
            "session_id may only contain letters, digits, '.', '_' and '-'".into(),
        ));
    }
    Ok(())
}

/// Validate a metadata object: must be null or an object with bounded key
/// count and bounded string-value lengths.
pub fn validate_metadata(metadata: &Value) -> Result<()> {
    let map = match metadata {
        Value::Null => return Ok(()),
        Value::Object(map) => map,
        _ => return Err(Error::Validation("metadata must be an object".into())),
    };
    if map.len() > MAX_METADATA_KEYS {
        return Err(Error::Validation(format!(
            "metadata exceeds {MAX_METADATA_KEYS} keys"
        )));
    }
    for (key, value) in map {
        if let Value::String(s) = value {
            if s.chars().count() > MAX_METADATA_VALUE_CHARS {
                return Err(Error::Validation(format!(
                    "metadata value for \"{key}\" exceeds {MAX_METADATA_VALUE_CHARS} characters"
                )));
            }
        }
    }
    Ok(())
}

/// Validate a search result limit against an inclusive range.
pub fn validate_limit(limit: usize, min: usize, max: usize) -> Result<()> {
    if limit < min || limit > max {
        return Err(Error::Validation(format!(
            "limit must be between {min} and {max}"
        )));
    }
    Ok(())
}

/// Password strength rule: at least 8 characters with an uppercase letter,
/// a lowercase letter, a digit, and a special character.
pub fn validate_password_strength(password: &str) -> Result<()> {
    if password.chars().count() < 8 {
        return Err(Error::Validation(
            "password must be at least 8 characters".into(),
        ));
    }
    let has_upper = password.chars().any(|c| c.is_ascii_uppercase());
    let has_lower = password.chars().any(|c| c.is_ascii_lowercase());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    let has_special = password.chars().any(|c| !c.is_ascii_alphanumeric());
    if !(has_upper && has_lower && has_digit && has_special) {
        return Err(Error::Validation(
            "password must contain uppercase, lowercase, digit, and special characters".into(),
        ));
    }
    Ok(())
}

/// Username rule: 3..=32 chars from `[A-Za-z0-9_-]`.
pub fn validate_username(username: &str) -> Result<()> {
    let len = username.chars().count();
    if !(3..=32).contains(&len) {
        return Err(Error::Validation(
            "username must be 3 to 32 characters".into(),
        ));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'))
    {
        return Err(Error::Validation(
            "username may only contain letters, digits, '_' and '-'".into(),
        ));
    }
    Ok(())
}

/// Minimal email shape check: one '@', non-empty local part, a dot in the
/// domain part.
pub fn validate_email(email: &str) -> Result<()> {
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    };
    if !valid {
        return Err(Error::Validation(format!("invalid email: \"{email}\"")));
    }
    Ok(())
}
