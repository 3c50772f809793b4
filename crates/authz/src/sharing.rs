use authgraph_database::lock::lock_namespace_for_write;
use authgraph_database::repositories::audit::AuditRepository;
use authgraph_database::repositories::hierarchy::HierarchyRepository;
use authgraph_database::repositories::tuples::TupleRepository;
use authgraph_models::{AuditEventType, EntityRef, NewAuditEvent, Namespace, RelationTuple, SubjectKey};
use authgraph_tenant::{ActorContext, Viewer};
use sqlx::PgPool;
use tracing::instrument;

use crate::error::{AuthzError, Result};
use crate::graph::Snapshot;

/// Cross-tenant visibility for a subject's own grants, and the ability to
/// walk away from one (spec §4.6 "Cross-Tenant Sharing"). `set_viewer`/
/// `clear_viewer` have no service counterpart here: a [`Viewer`] is a plain
/// value a caller holds and drops, not mutable session state (see
/// `authgraph-tenant`).
#[derive(Clone)]
pub struct SharingService {
    pool: PgPool,
    tuples: TupleRepository,
    rules: HierarchyRepository,
    audit: AuditRepository,
}

impl SharingService {
    pub fn new(pool: PgPool) -> Self {
        Self {
            tuples: TupleRepository::new(pool.clone()),
            rules: HierarchyRepository::new(pool.clone()),
            audit: AuditRepository::new(pool.clone()),
            pool,
        }
    }

    /// Tuples the viewer's subject holds in namespaces other than
    /// `current_namespace`, filtered to `resource_type`/`permission`.
    /// Only the *global* hierarchy is consulted to decide whether a held
    /// relation satisfies `permission` — a foreign tenant's local
    /// hierarchy customizations are never applied to someone else's
    /// cross-tenant view (spec §4.6).
    pub async fn list_external_resources(
        &self,
        viewer: &Viewer,
        current_namespace: &Namespace,
        resource_type: &str,
        permission: &str,
    ) -> Result<Vec<RelationTuple>> {
        let candidates = self
            .tuples
            .tuples_for_subject_across_namespaces(viewer.subject(), current_namespace)
            .await?;

        let global_rules = self.rules.effective_rules(&Namespace::global()).await?;
        let snapshot = Snapshot::new(Vec::new(), global_rules);
        let implied = snapshot.implied_by(resource_type, permission);

        Ok(candidates
            .into_iter()
            .filter(|t| t.resource_type == resource_type && implied.contains(&t.relation))
            .collect())
    }

    /// Remove a tuple the viewer's own subject holds in some other
    /// namespace — the "leave" half of cross-tenant sharing (spec §4.6): a
    /// delete is permitted even though `namespace` differs from whatever
    /// tenant the caller is otherwise bound to, as long as the tuple's
    /// subject is exactly the viewer being held. Returns `false` if no such
    /// tuple existed.
    #[instrument(skip(self, actor))]
    pub async fn leave(
        &self,
        viewer: &Viewer,
        actor: &ActorContext,
        namespace: &Namespace,
        resource: EntityRef,
        relation: &str,
        subject: SubjectKey,
    ) -> Result<bool> {
        if subject.entity() != viewer.subject() {
            return Err(AuthzError::NoViewerBound);
        }

        let mut tx = self.pool.begin().await.map_err(authgraph_database::DatabaseError::from)?;
        lock_namespace_for_write(&mut tx, namespace).await?;

        let deleted = self.tuples.delete(&mut tx, namespace, &resource, relation, &subject).await?;
        let Some(deleted) = deleted else {
            tx.commit().await.map_err(authgraph_database::DatabaseError::from)?;
            return Ok(false);
        };

        let (subject_type, subject_id, subject_relation) = match &subject {
            SubjectKey::Default(e) => (e.entity_type.clone(), e.entity_id.clone(), None),
            SubjectKey::Qualified(e, rel) => (e.entity_type.clone(), e.entity_id.clone(), Some(rel.clone())),
        };
        let event = NewAuditEvent {
            namespace: namespace.clone(),
            event_type: AuditEventType::ViewerRevoked,
            resource_type: Some(resource.entity_type.clone()),
            resource_id: Some(resource.entity_id.clone()),
            relation: Some(relation.to_string()),
            subject_type: Some(subject_type),
            subject_id: Some(subject_id),
            subject_relation,
            tuple_id: Some(deleted.id),
            expires_at: deleted.expires_at,
            actor_id: actor.actor_id.clone(),
            request_id: actor.request_id.clone(),
            on_behalf_of: actor.on_behalf_of.clone(),
            reason: actor.reason.clone().or_else(|| Some("cross-tenant leave".to_string())),
        };
        self.audit.insert(event, None).await?;

        tx.commit().await.map_err(authgraph_database::DatabaseError::from)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leave_identity_matches_only_the_viewers_own_subject() {
        let alice = EntityRef::new("user", "alice").unwrap();
        let bob = EntityRef::new("user", "bob").unwrap();
        let viewer = Viewer::new(alice.clone());
        assert!(viewer.is_viewing(&alice));
        assert!(!viewer.is_viewing(&bob));
    }
}
