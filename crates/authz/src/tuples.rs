use authgraph_database::repositories::audit::AuditRepository;
use authgraph_database::repositories::tuples::TupleRepository;
use authgraph_database::lock::lock_namespace_for_write;
use authgraph_models::validation::validate_type_word;
use authgraph_models::{AuditEventType, EntityRef, NewAuditEvent, RelationTuple, SubjectKey};
use authgraph_tenant::{ActorContext, TenantSession};
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::instrument;

use crate::config::EngineConfig;
use crate::error::{AuthzError, Result};
use crate::graph::would_create_membership_cycle;

/// Grants, revocations and expiration management for relation tuples
/// (spec §4.2 "Tuple Store"). Every mutating call takes the namespace's
/// advisory lock for the duration of its transaction (spec §5), so two
/// writers in the same tenant serialize while writers in different
/// tenants never block each other. Before any insert, `grant`/`bulk_grant`/
/// `bulk_grant_resources` reject direct self-membership and group-membership
/// cycles (spec §4.2 enforcement steps 2-3, invariant I3).
#[derive(Clone)]
pub struct TupleService {
    pool: PgPool,
    tuples: TupleRepository,
    audit: AuditRepository,
    config: EngineConfig,
}

impl TupleService {
    pub fn new(pool: PgPool) -> Self {
        Self::with_config(pool, EngineConfig::default())
    }

    pub fn with_config(pool: PgPool, config: EngineConfig) -> Self {
        Self {
            tuples: TupleRepository::new(pool.clone()),
            audit: AuditRepository::new(pool.clone()),
            pool,
            config,
        }
    }

    /// Reject `subject` on `resource` via `relation` if it would be a
    /// direct self-membership or close a group-membership cycle (spec §4.2
    /// steps 2-3, invariant I3). Must be called with the namespace's
    /// existing tuple set read inside the same transaction that will hold
    /// the insert, under the namespace's write lock.
    async fn reject_membership_cycle(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        namespace: &authgraph_models::Namespace,
        resource: &EntityRef,
        relation: &str,
        subject: &SubjectKey,
    ) -> Result<()> {
        let existing = self.tuples.all_tuples_tx(tx, namespace).await?;
        if would_create_membership_cycle(&existing, resource, relation, subject, &self.config.group_membership_relations) {
            return Err(AuthzError::MembershipCycle {
                resource_type: resource.entity_type.clone(),
                resource_id: resource.entity_id.clone(),
                relation: relation.to_string(),
                subject_type: subject.entity().entity_type.clone(),
                subject_id: subject.entity().entity_id.clone(),
                subject_relation: subject.relation().map(str::to_string),
            });
        }
        Ok(())
    }

    fn audit_event(
        &self,
        session: &TenantSession,
        actor: &ActorContext,
        event_type: AuditEventType,
        resource: Option<&EntityRef>,
        relation: Option<&str>,
        subject: Option<&SubjectKey>,
        tuple_id: Option<uuid::Uuid>,
        expires_at: Option<DateTime<Utc>>,
    ) -> NewAuditEvent {
        let (subject_type, subject_id, subject_relation) = match subject {
            Some(SubjectKey::Default(e)) => (Some(e.entity_type.clone()), Some(e.entity_id.clone()), None),
            Some(SubjectKey::Qualified(e, rel)) => (Some(e.entity_type.clone()), Some(e.entity_id.clone()), Some(rel.clone())),
            None => (None, None, None),
        };
        NewAuditEvent {
            namespace: session.namespace().clone(),
            event_type,
            resource_type: resource.map(|r| r.entity_type.clone()),
            resource_id: resource.map(|r| r.entity_id.clone()),
            relation: relation.map(str::to_string),
            subject_type,
            subject_id,
            subject_relation,
            tuple_id,
            expires_at,
            actor_id: actor.actor_id.clone(),
            request_id: actor.request_id.clone(),
            on_behalf_of: actor.on_behalf_of.clone(),
            reason: actor.reason.clone(),
        }
    }

    /// Grant `relation` on `resource` to `subject`. Idempotent: granting
    /// the same `(resource, relation, subject)` twice returns the original
    /// tuple and writes no second audit event (spec §4.2 "grant").
    #[instrument(skip(self, actor))]
    pub async fn grant(
        &self,
        session: &TenantSession,
        actor: &ActorContext,
        relation: &str,
        resource: EntityRef,
        subject: SubjectKey,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<RelationTuple> {
        validate_type_word("relation", relation, authgraph_models::validation::DEFAULT_MAX_IDENTIFIER_LENGTH)?;

        let mut tx = self.pool.begin().await.map_err(authgraph_database::DatabaseError::from)?;
        lock_namespace_for_write(&mut tx, session.namespace()).await?;

        if let Some(existing) = self.tuples.find(&mut tx, session.namespace(), &resource, relation, &subject).await? {
            tx.commit().await.map_err(authgraph_database::DatabaseError::from)?;
            return Ok(existing);
        }

        if let Err(e) = self.reject_membership_cycle(&mut tx, session.namespace(), &resource, relation, &subject).await {
            tx.rollback().await.map_err(authgraph_database::DatabaseError::from)?;
            return Err(e);
        }

        let created = self
            .tuples
            .insert(&mut tx, session.namespace(), &resource, relation, &subject, expires_at, actor.actor_id.as_deref())
            .await?;

        let event = self.audit_event(
            session,
            actor,
            AuditEventType::TupleCreated,
            Some(&resource),
            Some(relation),
            Some(&subject),
            Some(created.id),
            expires_at,
        );
        self.audit.insert(event, None).await?;

        tx.commit().await.map_err(authgraph_database::DatabaseError::from)?;
        Ok(created)
    }

    /// Revoke `relation` on `resource` from `subject`. Returns `false` if
    /// no such tuple existed (spec §4.2 "revoke").
    #[instrument(skip(self, actor))]
    pub async fn revoke(
        &self,
        session: &TenantSession,
        actor: &ActorContext,
        relation: &str,
        resource: EntityRef,
        subject: SubjectKey,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(authgraph_database::DatabaseError::from)?;
        lock_namespace_for_write(&mut tx, session.namespace()).await?;

        let deleted = self.tuples.delete(&mut tx, session.namespace(), &resource, relation, &subject).await?;
        let Some(deleted) = deleted else {
            tx.commit().await.map_err(authgraph_database::DatabaseError::from)?;
            return Ok(false);
        };

        let event = self.audit_event(
            session,
            actor,
            AuditEventType::TupleDeleted,
            Some(&resource),
            Some(relation),
            Some(&subject),
            Some(deleted.id),
            deleted.expires_at,
        );
        self.audit.insert(event, None).await?;

        tx.commit().await.map_err(authgraph_database::DatabaseError::from)?;
        Ok(true)
    }

    /// Grant `relation` on `resource` to every subject in `subjects` in
    /// one pass per subject type (spec §4.2 "bulk_grant").
    #[instrument(skip(self, actor, subjects))]
    pub async fn bulk_grant(
        &self,
        session: &TenantSession,
        actor: &ActorContext,
        relation: &str,
        resource: EntityRef,
        subjects: Vec<SubjectKey>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<usize> {
        let mut tx = self.pool.begin().await.map_err(authgraph_database::DatabaseError::from)?;
        lock_namespace_for_write(&mut tx, session.namespace()).await?;

        let mut existing = self.tuples.all_tuples_tx(&mut tx, session.namespace()).await?;
        for subject in &subjects {
            if would_create_membership_cycle(&existing, &resource, relation, subject, &self.config.group_membership_relations) {
                tx.rollback().await.map_err(authgraph_database::DatabaseError::from)?;
                return Err(AuthzError::MembershipCycle {
                    resource_type: resource.entity_type.clone(),
                    resource_id: resource.entity_id.clone(),
                    relation: relation.to_string(),
                    subject_type: subject.entity().entity_type.clone(),
                    subject_id: subject.entity().entity_id.clone(),
                    subject_relation: subject.relation().map(str::to_string),
                });
            }
            existing.push(synthetic_tuple(session.namespace().clone(), &resource, relation, subject));
        }

        let count = self
            .tuples
            .bulk_insert_subjects(&mut tx, session.namespace(), &resource, relation, &subjects, expires_at, actor.actor_id.as_deref())
            .await?;

        if count > 0 {
            let event = self.audit_event(
                session,
                actor,
                AuditEventType::TupleCreated,
                Some(&resource),
                Some(relation),
                None,
                None,
                expires_at,
            );
            self.audit.insert(event, None).await?;
        }

        tx.commit().await.map_err(authgraph_database::DatabaseError::from)?;
        Ok(count)
    }

    /// Grant `relation` on every resource in `resource_ids` to `subject`
    /// (spec §4.2 "bulk_grant_resources").
    #[instrument(skip(self, actor, resource_ids))]
    pub async fn bulk_grant_resources(
        &self,
        session: &TenantSession,
        actor: &ActorContext,
        relation: &str,
        resource_type: &str,
        resource_ids: Vec<String>,
        subject: SubjectKey,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<usize> {
        let mut tx = self.pool.begin().await.map_err(authgraph_database::DatabaseError::from)?;
        lock_namespace_for_write(&mut tx, session.namespace()).await?;

        let mut existing = self.tuples.all_tuples_tx(&mut tx, session.namespace()).await?;
        for resource_id in &resource_ids {
            let resource = EntityRef {
                entity_type: resource_type.to_string(),
                entity_id: resource_id.clone(),
            };
            if would_create_membership_cycle(&existing, &resource, relation, &subject, &self.config.group_membership_relations) {
                tx.rollback().await.map_err(authgraph_database::DatabaseError::from)?;
                return Err(AuthzError::MembershipCycle {
                    resource_type: resource.entity_type.clone(),
                    resource_id: resource.entity_id.clone(),
                    relation: relation.to_string(),
                    subject_type: subject.entity().entity_type.clone(),
                    subject_id: subject.entity().entity_id.clone(),
                    subject_relation: subject.relation().map(str::to_string),
                });
            }
            existing.push(synthetic_tuple(session.namespace().clone(), &resource, relation, &subject));
        }

        let count = self
            .tuples
            .bulk_insert_resources(
                &mut tx,
                session.namespace(),
                resource_type,
                &resource_ids,
                relation,
                &subject,
                expires_at,
                actor.actor_id.as_deref(),
            )
            .await?;

        if count > 0 {
            let event = self.audit_event(
                session,
                actor,
                AuditEventType::TupleCreated,
                None,
                Some(relation),
                Some(&subject),
                None,
                expires_at,
            );
            self.audit.insert(event, None).await?;
        }

        tx.commit().await.map_err(authgraph_database::DatabaseError::from)?;
        Ok(count)
    }

    #[instrument(skip(self, actor))]
    pub async fn set_expiration(
        &self,
        session: &TenantSession,
        actor: &ActorContext,
        relation: &str,
        resource: EntityRef,
        subject: SubjectKey,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(authgraph_database::DatabaseError::from)?;
        lock_namespace_for_write(&mut tx, session.namespace()).await?;

        let updated = self
            .tuples
            .set_expiration(&mut tx, session.namespace(), &resource, relation, &subject, expires_at)
            .await?;
        let Some(updated) = updated else {
            tx.commit().await.map_err(authgraph_database::DatabaseError::from)?;
            return Ok(false);
        };

        let event = self.audit_event(
            session,
            actor,
            AuditEventType::TupleExpirationChanged,
            Some(&resource),
            Some(relation),
            Some(&subject),
            Some(updated.id),
            expires_at,
        );
        self.audit.insert(event, None).await?;

        tx.commit().await.map_err(authgraph_database::DatabaseError::from)?;
        Ok(true)
    }

    pub async fn clear_expiration(
        &self,
        session: &TenantSession,
        actor: &ActorContext,
        relation: &str,
        resource: EntityRef,
        subject: SubjectKey,
    ) -> Result<bool> {
        self.set_expiration(session, actor, relation, resource, subject, None).await
    }

    /// Push an existing expiration forward by `extension` (spec §4.2
    /// "extend_expiration"). Errors if the tuple has no current
    /// expiration to extend.
    pub async fn extend_expiration(
        &self,
        session: &TenantSession,
        actor: &ActorContext,
        relation: &str,
        resource: EntityRef,
        subject: SubjectKey,
        extension: Duration,
    ) -> Result<DateTime<Utc>> {
        let mut tx = self.pool.begin().await.map_err(authgraph_database::DatabaseError::from)?;
        let existing = self
            .tuples
            .find(&mut tx, session.namespace(), &resource, relation, &subject)
            .await?
            .ok_or_else(|| AuthzError::TupleNotFound {
                resource_type: resource.entity_type.clone(),
                resource_id: resource.entity_id.clone(),
                relation: relation.to_string(),
            })?;
        let base = existing.expires_at.unwrap_or_else(Utc::now);
        let new_expiry = base + extension;
        tx.rollback().await.map_err(authgraph_database::DatabaseError::from)?;

        self.set_expiration(session, actor, relation, resource, subject, Some(new_expiry)).await?;
        Ok(new_expiry)
    }

    pub async fn list_expiring(&self, session: &TenantSession, within: Duration) -> Result<Vec<RelationTuple>> {
        Ok(self.tuples.list_expiring(session.namespace(), within).await?)
    }

    #[instrument(skip(self, actor))]
    pub async fn cleanup_expired(&self, session: &TenantSession, actor: &ActorContext) -> Result<usize> {
        let mut tx = self.pool.begin().await.map_err(authgraph_database::DatabaseError::from)?;
        lock_namespace_for_write(&mut tx, session.namespace()).await?;
        let count = self.tuples.cleanup_expired(&mut tx, session.namespace()).await?;
        if count > 0 {
            let event = self.audit_event(session, actor, AuditEventType::TupleDeleted, None, None, None, None, None);
            self.audit.insert(event, None).await?;
        }
        tx.commit().await.map_err(authgraph_database::DatabaseError::from)?;
        Ok(count)
    }
}

/// A not-yet-persisted tuple, used only to extend an in-memory existing-set
/// during a batch grant so that a cycle introduced across two new tuples in
/// the same call is caught, not just cycles against already-committed state.
fn synthetic_tuple(namespace: authgraph_models::Namespace, resource: &EntityRef, relation: &str, subject: &SubjectKey) -> RelationTuple {
    let (subject_type, subject_id, subject_relation) = match subject {
        SubjectKey::Default(e) => (e.entity_type.clone(), e.entity_id.clone(), None),
        SubjectKey::Qualified(e, rel) => (e.entity_type.clone(), e.entity_id.clone(), Some(rel.clone())),
    };
    RelationTuple {
        id: uuid::Uuid::new_v4(),
        namespace,
        resource_type: resource.entity_type.clone(),
        resource_id: resource.entity_id.clone(),
        relation: relation.to_string(),
        subject_type,
        subject_id,
        subject_relation,
        created_at: Utc::now(),
        created_by: None,
        expires_at: None,
    }
}
