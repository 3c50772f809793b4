use serde::{Deserialize, Serialize};

use crate::namespace::Namespace;

/// A single edge of the permission-implication DAG (spec §3 "Hierarchy
/// Rule", §4.3): holding `permission` on a `resource_type` in `namespace`
/// also grants `implies`. Global-namespace rules apply to every tenant in
/// addition to that tenant's own rules (additive, not overriding).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct HierarchyRule {
    pub namespace: Namespace,
    pub resource_type: String,
    pub permission: String,
    pub implies: String,
}

impl HierarchyRule {
    pub fn new(
        namespace: Namespace,
        resource_type: impl Into<String>,
        permission: impl Into<String>,
        implies: impl Into<String>,
    ) -> Self {
        Self {
            namespace,
            resource_type: resource_type.into(),
            permission: permission.into(),
            implies: implies.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructs_rule() {
        let rule = HierarchyRule::new(Namespace::global(), "repo", "admin", "write");
        assert_eq!(rule.permission, "admin");
        assert_eq!(rule.implies, "write");
        assert!(rule.namespace.is_global());
    }
}
