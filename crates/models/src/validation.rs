//! Identifier validation shared by every layer that touches tuples,
//! hierarchy rules or namespaces (spec invariant I1).

use thiserror::Error;

/// Default `max_identifier_length` (see `EngineConfig` in `authgraph-authz`).
pub const DEFAULT_MAX_IDENTIFIER_LENGTH: usize = 1024;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("{field} must not be whitespace-only")]
    WhitespaceOnly { field: &'static str },

    #[error("{field} exceeds maximum length of {max} characters")]
    TooLong { field: &'static str, max: usize },

    #[error("{field} must not contain control characters or null bytes")]
    ControlCharacters { field: &'static str },

    #[error("{field} must not have leading or trailing whitespace")]
    SurroundingWhitespace { field: &'static str },

    #[error("type word '{value}' must be a lowercase identifier starting with a letter")]
    InvalidTypeWord { value: String },
}

/// Validate an opaque identifier (entity id, subject id, relation name, …).
///
/// Ids may contain slashes, `@`, `+`, `#`, Unicode, etc. but not null bytes
/// or other control characters, and must not be whitespace-only.
pub fn validate_identifier(field: &'static str, value: &str, max_len: usize) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::Empty { field });
    }
    if value.chars().count() > max_len {
        return Err(ValidationError::TooLong { field, max: max_len });
    }
    if value.trim().is_empty() {
        return Err(ValidationError::WhitespaceOnly { field });
    }
    if value.chars().any(|c| c.is_control()) {
        return Err(ValidationError::ControlCharacters { field });
    }
    Ok(())
}

/// Validate a namespace: identical rules to [`validate_identifier`] plus a
/// no-surrounding-whitespace rule (namespaces are used as lock keys and
/// table-filter values, so incidental padding must be rejected rather than
/// silently trimmed).
pub fn validate_namespace(value: &str, max_len: usize) -> Result<(), ValidationError> {
    validate_identifier("namespace", value, max_len)?;
    if value != value.trim() {
        return Err(ValidationError::SurroundingWhitespace { field: "namespace" });
    }
    Ok(())
}

/// Validate a type word: `resource_type`, `subject_type`, or a
/// `permission`/`relation` name. Must be a lowercase identifier starting
/// with a letter (spec §7 ValidationError).
pub fn validate_type_word(field: &'static str, value: &str, max_len: usize) -> Result<(), ValidationError> {
    validate_identifier(field, value, max_len)?;
    let mut chars = value.chars();
    let first = chars.next().expect("checked non-empty above");
    let is_valid = first.is_ascii_lowercase()
        && value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if !is_valid {
        return Err(ValidationError::InvalidTypeWord {
            value: value.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_whitespace_only() {
        assert!(matches!(
            validate_identifier("subject_id", "", 1024),
            Err(ValidationError::Empty { .. })
        ));
        assert!(matches!(
            validate_identifier("subject_id", "   ", 1024),
            Err(ValidationError::WhitespaceOnly { .. })
        ));
    }

    #[test]
    fn rejects_too_long() {
        let long = "a".repeat(1025);
        assert!(matches!(
            validate_identifier("subject_id", &long, 1024),
            Err(ValidationError::TooLong { .. })
        ));
    }

    #[test]
    fn rejects_null_byte() {
        assert!(matches!(
            validate_identifier("subject_id", "al\0ice", 1024),
            Err(ValidationError::ControlCharacters { .. })
        ));
    }

    #[test]
    fn allows_opaque_punctuation_in_ids() {
        assert!(validate_identifier("subject_id", "svc/acct@team+1#2", 1024).is_ok());
    }

    #[test]
    fn type_word_must_be_lowercase_and_start_with_letter() {
        assert!(validate_type_word("resource_type", "repo", 1024).is_ok());
        assert!(validate_type_word("resource_type", "api_key", 1024).is_ok());
        assert!(validate_type_word("resource_type", "Repo", 1024).is_err());
        assert!(validate_type_word("resource_type", "2fa", 1024).is_err());
        assert!(validate_type_word("resource_type", "repo-type", 1024).is_err());
    }

    #[test]
    fn namespace_rejects_surrounding_whitespace() {
        assert!(validate_namespace(" acme", 1024).is_err());
        assert!(validate_namespace("acme ", 1024).is_err());
        assert!(validate_namespace("acme", 1024).is_ok());
    }
}
