use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::EntityRef;
use crate::namespace::Namespace;

/// Tagged-variant subject key (Design Notes §9): makes the NULL-as-distinct
/// `subject_relation` semantics explicit in the type instead of relying on
/// SQL NULL-equality quirks. `Default` means "the subject itself"; `Qualified`
/// means "members of the subject group having this relation" (e.g. `team#admin`).
#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubjectKey {
    Default(EntityRef),
    Qualified(EntityRef, String),
}

impl SubjectKey {
    pub fn entity(&self) -> &EntityRef {
        match self {
            SubjectKey::Default(e) => e,
            SubjectKey::Qualified(e, _) => e,
        }
    }

    pub fn relation(&self) -> Option<&str> {
        match self {
            SubjectKey::Default(_) => None,
            SubjectKey::Qualified(_, rel) => Some(rel),
        }
    }
}

/// A relationship tuple — the atomic grant (spec §3 "Tuple").
///
/// Uniqueness key: `(namespace, resource_type, resource_id, relation,
/// subject_type, subject_id, subject_relation)` with NULL `subject_relation`
/// distinct from any non-NULL value.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RelationTuple {
    pub id: uuid::Uuid,
    pub namespace: Namespace,
    pub resource_type: String,
    pub resource_id: String,
    pub relation: String,
    pub subject_type: String,
    pub subject_id: String,
    pub subject_relation: Option<String>,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl RelationTuple {
    pub fn resource(&self) -> EntityRef {
        EntityRef {
            entity_type: self.resource_type.clone(),
            entity_id: self.resource_id.clone(),
        }
    }

    pub fn subject_key(&self) -> SubjectKey {
        let entity = EntityRef {
            entity_type: self.subject_type.clone(),
            entity_id: self.subject_id.clone(),
        };
        match &self.subject_relation {
            Some(rel) => SubjectKey::Qualified(entity, rel.clone()),
            None => SubjectKey::Default(entity),
        }
    }

    /// True once `expires_at` has passed: the tuple is invisible to every
    /// query from this point on (spec §4.2, filtered at read time).
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }
}
