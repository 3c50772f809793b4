use std::collections::HashSet;

use authgraph_models::validation::DEFAULT_MAX_IDENTIFIER_LENGTH;

/// Tunables for the resolution engine (spec §6 "External Interfaces").
/// Mirrors the `DatabaseConfig::from_env` pattern: a hardcoded `Default`
/// plus an environment-driven constructor for deployment.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum character length accepted for any identifier (namespace,
    /// entity type/id, relation name).
    pub max_identifier_length: usize,

    /// Relation names that form the transitive group-membership graph
    /// (spec §4.4.1, §6). `check`/`explain` only chain through a
    /// same-type `SubjectKey::Qualified` edge (team-in-team, not
    /// doc-granted-to-team) when its relation is in this set; `grant`
    /// rejects writes that would close a cycle across these same edges
    /// (invariant I3). Relations outside this set still resolve as
    /// ordinary one-shot userset rewrites — they just never recurse
    /// through a further nested group.
    pub group_membership_relations: HashSet<String>,

    /// Namespace consulted in addition to a tenant's own for hierarchy
    /// rules and, exclusively, for cross-tenant resource listing.
    pub default_hierarchy_scope: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_identifier_length: DEFAULT_MAX_IDENTIFIER_LENGTH,
            group_membership_relations: ["member", "admin", "owner"].into_iter().map(String::from).collect(),
            default_hierarchy_scope: "global".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let max_identifier_length = std::env::var("AUTHZ_MAX_IDENTIFIER_LENGTH")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_IDENTIFIER_LENGTH);

        let group_membership_relations = std::env::var("AUTHZ_GROUP_MEMBERSHIP_RELATIONS")
            .ok()
            .map(|v| v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
            .unwrap_or_else(|| Self::default().group_membership_relations);

        Self {
            max_identifier_length,
            group_membership_relations,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_membership_relations_cover_common_cases() {
        let config = EngineConfig::default();
        assert!(config.group_membership_relations.contains("member"));
        assert!(config.group_membership_relations.contains("owner"));
    }
}
