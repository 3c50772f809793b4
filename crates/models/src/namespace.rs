use serde::{Deserialize, Serialize};

use crate::validation::{validate_namespace, ValidationError, DEFAULT_MAX_IDENTIFIER_LENGTH};

/// A tenant namespace: 1-1024 characters, no control characters, no
/// leading/trailing whitespace (spec §3). `Namespace::GLOBAL` is the
/// distinguished literal whose hierarchy rules apply to every tenant.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
pub struct Namespace(String);

impl Namespace {
    pub const GLOBAL: &'static str = "global";

    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        Self::with_max_len(value, DEFAULT_MAX_IDENTIFIER_LENGTH)
    }

    pub fn with_max_len(value: impl Into<String>, max_len: usize) -> Result<Self, ValidationError> {
        let value = value.into();
        validate_namespace(&value, max_len)?;
        Ok(Self(value))
    }

    pub fn global() -> Self {
        Self(Self::GLOBAL.to_string())
    }

    pub fn is_global(&self) -> bool {
        self.0 == Self::GLOBAL
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::convert::TryFrom<String> for Namespace {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl AsRef<str> for Namespace {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_is_recognized() {
        let ns = Namespace::global();
        assert!(ns.is_global());
        assert_eq!(ns.as_str(), "global");
    }

    #[test]
    fn rejects_whitespace_padding() {
        assert!(Namespace::new(" tenant-a").is_err());
    }

    #[test]
    fn accepts_opaque_tenant_ids() {
        assert!(Namespace::new("org:acme-corp").is_ok());
    }
}
