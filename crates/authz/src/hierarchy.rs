use authgraph_database::lock::lock_namespace_for_write;
use authgraph_database::repositories::audit::AuditRepository;
use authgraph_database::repositories::hierarchy::HierarchyRepository;
use authgraph_models::{AuditEventType, HierarchyRule, NewAuditEvent};
use authgraph_tenant::{ActorContext, TenantSession};
use sqlx::PgPool;
use tracing::instrument;

use crate::error::{AuthzError, Result};
use crate::graph::would_create_cycle;

/// Mutations to the permission-implication DAG (spec §4.3 "Hierarchy
/// Store"). Rules are namespace-scoped; a rule written to the global
/// namespace applies to every tenant in addition to that tenant's own
/// (additive, never overriding).
#[derive(Clone)]
pub struct HierarchyService {
    pool: PgPool,
    rules: HierarchyRepository,
    audit: AuditRepository,
}

impl HierarchyService {
    pub fn new(pool: PgPool) -> Self {
        Self {
            rules: HierarchyRepository::new(pool.clone()),
            audit: AuditRepository::new(pool.clone()),
            pool,
        }
    }

    fn audit_event(&self, session: &TenantSession, actor: &ActorContext, event_type: AuditEventType, relation: Option<&str>, reason: Option<String>) -> NewAuditEvent {
        NewAuditEvent {
            namespace: session.namespace().clone(),
            event_type,
            resource_type: None,
            resource_id: None,
            relation: relation.map(str::to_string),
            subject_type: None,
            subject_id: None,
            subject_relation: None,
            tuple_id: None,
            expires_at: None,
            actor_id: actor.actor_id.clone(),
            request_id: actor.request_id.clone(),
            on_behalf_of: actor.on_behalf_of.clone(),
            reason: reason.or_else(|| actor.reason.clone()),
        }
    }

    /// Add `resource_type.permission -> implies` to this tenant's
    /// namespace (spec §4.3 "add_hierarchy_rule"). Rejected with
    /// [`AuthzError::Cycle`] if it would close a cycle in the DAG formed
    /// by this namespace's own rules plus the global namespace's.
    #[instrument(skip(self, actor))]
    pub async fn add_hierarchy_rule(
        &self,
        session: &TenantSession,
        actor: &ActorContext,
        resource_type: &str,
        permission: &str,
        implies: &str,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(authgraph_database::DatabaseError::from)?;
        lock_namespace_for_write(&mut tx, session.namespace()).await?;

        let effective = self.rules.effective_rules(session.namespace()).await?;
        if would_create_cycle(&effective, resource_type, permission, implies) {
            tx.rollback().await.map_err(authgraph_database::DatabaseError::from)?;
            return Err(AuthzError::Cycle {
                resource_type: resource_type.to_string(),
                permission: permission.to_string(),
                implies: implies.to_string(),
            });
        }

        let rule = HierarchyRule::new(session.namespace().clone(), resource_type, permission, implies);
        let added = self.rules.add_rule(&mut tx, &rule).await?;
        if added {
            let event = self.audit_event(
                session,
                actor,
                AuditEventType::HierarchyRuleAdded,
                Some(permission),
                Some(format!("{resource_type}.{permission} -> {implies}")),
            );
            self.audit.insert(event, None).await?;
        }
        tx.commit().await.map_err(authgraph_database::DatabaseError::from)?;
        Ok(added)
    }

    #[instrument(skip(self, actor))]
    pub async fn remove_hierarchy_rule(
        &self,
        session: &TenantSession,
        actor: &ActorContext,
        resource_type: &str,
        permission: &str,
        implies: &str,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(authgraph_database::DatabaseError::from)?;
        lock_namespace_for_write(&mut tx, session.namespace()).await?;

        let rule = HierarchyRule::new(session.namespace().clone(), resource_type, permission, implies);
        let removed = self.rules.remove_rule(&mut tx, &rule).await?;
        if removed {
            let event = self.audit_event(
                session,
                actor,
                AuditEventType::HierarchyRuleRemoved,
                Some(permission),
                Some(format!("{resource_type}.{permission} -> {implies}")),
            );
            self.audit.insert(event, None).await?;
        }
        tx.commit().await.map_err(authgraph_database::DatabaseError::from)?;
        Ok(removed)
    }

    /// Add a chain of implications in one call: `set_hierarchy("repo",
    /// &["admin", "write", "read"])` grants admin -> write -> read (spec
    /// §4.3 "set_hierarchy").
    pub async fn set_hierarchy(
        &self,
        session: &TenantSession,
        actor: &ActorContext,
        resource_type: &str,
        permissions: &[&str],
    ) -> Result<()> {
        for pair in permissions.windows(2) {
            self.add_hierarchy_rule(session, actor, resource_type, pair[0], pair[1]).await?;
        }
        Ok(())
    }

    #[instrument(skip(self, actor))]
    pub async fn clear_hierarchy(&self, session: &TenantSession, actor: &ActorContext, resource_type: &str) -> Result<usize> {
        let mut tx = self.pool.begin().await.map_err(authgraph_database::DatabaseError::from)?;
        lock_namespace_for_write(&mut tx, session.namespace()).await?;

        let count = self.rules.clear(&mut tx, session.namespace(), resource_type).await?;
        if count > 0 {
            let event = self.audit_event(
                session,
                actor,
                AuditEventType::HierarchyCleared,
                None,
                Some(format!("cleared {count} rule(s) for {resource_type}")),
            );
            self.audit.insert(event, None).await?;
        }
        tx.commit().await.map_err(authgraph_database::DatabaseError::from)?;
        Ok(count)
    }
}
