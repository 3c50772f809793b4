use serde::{Deserialize, Serialize};

use crate::validation::{validate_identifier, validate_type_word, ValidationError, DEFAULT_MAX_IDENTIFIER_LENGTH};

/// A `(type, id)` pair identifying either a resource or a subject
/// (spec §3 "Entity"). `entity_type` is a lowercase identifier starting
/// with a letter; `entity_id` is opaque but non-empty and control-char-free.
#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_type: String,
    pub entity_id: String,
}

impl EntityRef {
    pub fn new(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Result<Self, ValidationError> {
        Self::with_max_len(entity_type, entity_id, DEFAULT_MAX_IDENTIFIER_LENGTH)
    }

    pub fn with_max_len(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        max_len: usize,
    ) -> Result<Self, ValidationError> {
        let entity_type = entity_type.into();
        let entity_id = entity_id.into();
        validate_type_word("resource_type", &entity_type, max_len)?;
        validate_identifier("resource_id", &entity_id, max_len)?;
        Ok(Self {
            entity_type,
            entity_id,
        })
    }
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.entity_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_slashes_and_unicode_in_id() {
        assert!(EntityRef::new("repo", "team/payments-api-日本").is_ok());
    }

    #[test]
    fn rejects_uppercase_type() {
        assert!(EntityRef::new("Repo", "api").is_err());
    }
}
