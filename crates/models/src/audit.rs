use chrono::{DateTime, Utc};
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::namespace::Namespace;

/// The kind of mutation an audit event records (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum AuditEventType {
    TupleCreated,
    TupleDeleted,
    TupleExpirationChanged,
    HierarchyRuleAdded,
    HierarchyRuleRemoved,
    HierarchyCleared,
    ViewerRevoked,
}

impl std::fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AuditEventType::TupleCreated => "tuple_created",
            AuditEventType::TupleDeleted => "tuple_deleted",
            AuditEventType::TupleExpirationChanged => "tuple_expiration_changed",
            AuditEventType::HierarchyRuleAdded => "hierarchy_rule_added",
            AuditEventType::HierarchyRuleRemoved => "hierarchy_rule_removed",
            AuditEventType::HierarchyCleared => "hierarchy_cleared",
            AuditEventType::ViewerRevoked => "viewer_revoked",
        };
        write!(f, "{s}")
    }
}

/// An append-only audit record (spec §3 "Audit Event", §4.5). Stored in a
/// monthly partition keyed by `event_time`; read back ordered by
/// `(event_time DESC, event_id DESC)` for a stable total order across rows
/// sharing a timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub event_time: DateTime<Utc>,
    pub namespace: Namespace,
    pub event_type: AuditEventType,

    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub relation: Option<String>,
    pub subject_type: Option<String>,
    pub subject_id: Option<String>,
    pub subject_relation: Option<String>,
    pub tuple_id: Option<Uuid>,
    pub expires_at: Option<DateTime<Utc>>,

    pub actor_id: Option<String>,
    pub request_id: Option<String>,
    pub on_behalf_of: Option<String>,
    pub reason: Option<String>,

    pub session_user: Option<String>,
    pub current_user: Option<String>,
    pub client_addr: Option<IpNetwork>,
    pub application_name: Option<String>,
}

/// The subset of an [`AuditEvent`] a caller supplies; the store fills in
/// `event_id`/`event_time` and the Postgres session fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAuditEvent {
    pub namespace: Namespace,
    pub event_type: AuditEventType,

    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub relation: Option<String>,
    pub subject_type: Option<String>,
    pub subject_id: Option<String>,
    pub subject_relation: Option<String>,
    pub tuple_id: Option<Uuid>,
    pub expires_at: Option<DateTime<Utc>>,

    pub actor_id: Option<String>,
    pub request_id: Option<String>,
    pub on_behalf_of: Option<String>,
    pub reason: Option<String>,
}

/// Filters accepted by `get_audit_events` (spec §4.5). `namespace` is always
/// applied; every other field narrows further when present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditEventQuery {
    pub event_type: Option<AuditEventType>,
    pub actor_id: Option<String>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub subject_type: Option<String>,
    pub subject_id: Option<String>,
    pub limit: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_display_matches_db_literal() {
        assert_eq!(AuditEventType::TupleCreated.to_string(), "tuple_created");
        assert_eq!(AuditEventType::HierarchyCleared.to_string(), "hierarchy_cleared");
    }
}
