use authgraph_database::lock::lock_namespace_for_write;
use authgraph_database::repositories::audit::AuditRepository;
use authgraph_database::repositories::hierarchy::HierarchyRepository;
use authgraph_database::repositories::tuples::TupleRepository;
use authgraph_models::{AuditEventType, EntityRef, NewAuditEvent};
use authgraph_tenant::{ActorContext, TenantSession};
use sqlx::PgPool;
use tracing::instrument;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::graph::{self, Snapshot};

/// One finding from `PolicyEngine::verify()` — an operational health
/// report, not a correctness error. `check`/`explain` tolerate the cycles
/// this surfaces; the namespace is still authorizing correctly, but an
/// operator probably wants to know about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityIssue {
    pub resource_type: String,
    pub resource_id: String,
    pub status: String,
    pub details: String,
}

/// Namespace-level counters for monitoring (spec §4.4's reporting
/// surface generalized from the teacher's per-tenant dashboards).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NamespaceStats {
    pub tuple_count: usize,
    pub hierarchy_rule_count: usize,
    pub unique_subjects: usize,
    pub unique_resources: usize,
}

/// Read-only permission resolution (spec §4.4 "Resolution Engine").
/// Every call fetches a fresh snapshot of the namespace's tuples and
/// effective hierarchy rules and resolves in memory — there is no cache
/// to invalidate, so the result is always consistent with the latest
/// committed write (spec Non-goals: evaluation-on-read only).
#[derive(Clone)]
pub struct PolicyEngine {
    pool: PgPool,
    tuples: TupleRepository,
    rules: HierarchyRepository,
    audit: AuditRepository,
    config: EngineConfig,
}

/// Pagination cursor over a sorted `(type, id)` sequence, used by
/// `list_subjects`/`list_resources` (spec §4.4).
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub limit: Option<usize>,
    pub cursor: Option<String>,
}

impl PolicyEngine {
    pub fn new(pool: PgPool) -> Self {
        Self::with_config(pool, EngineConfig::default())
    }

    pub fn with_config(pool: PgPool, config: EngineConfig) -> Self {
        Self {
            tuples: TupleRepository::new(pool.clone()),
            rules: HierarchyRepository::new(pool.clone()),
            audit: AuditRepository::new(pool.clone()),
            pool,
            config,
        }
    }

    async fn snapshot(&self, session: &TenantSession) -> Result<Snapshot> {
        let tuples = self.tuples.all_tuples(session.namespace()).await?;
        let rules = self.rules.effective_rules(session.namespace()).await?;
        Ok(Snapshot::with_membership_relations(tuples, rules, self.config.group_membership_relations.clone()))
    }

    #[instrument(skip(self))]
    pub async fn check(&self, session: &TenantSession, subject: &EntityRef, permission: &str, resource: &EntityRef) -> Result<bool> {
        Ok(self.snapshot(session).await?.check(subject, permission, resource))
    }

    pub async fn check_any(&self, session: &TenantSession, subject: &EntityRef, permissions: &[&str], resource: &EntityRef) -> Result<bool> {
        let snapshot = self.snapshot(session).await?;
        Ok(permissions.iter().any(|p| snapshot.check(subject, p, resource)))
    }

    pub async fn check_all(&self, session: &TenantSession, subject: &EntityRef, permissions: &[&str], resource: &EntityRef) -> Result<bool> {
        let snapshot = self.snapshot(session).await?;
        Ok(permissions.iter().all(|p| snapshot.check(subject, p, resource)))
    }

    pub async fn explain(&self, session: &TenantSession, subject: &EntityRef, permission: &str, resource: &EntityRef) -> Result<Vec<String>> {
        Ok(self.snapshot(session).await?.explain(subject, permission, resource))
    }

    pub async fn list_subjects(&self, session: &TenantSession, permission: &str, resource: &EntityRef, page: Page) -> Result<Vec<EntityRef>> {
        let mut subjects = self.snapshot(session).await?.list_subjects(permission, resource);
        subjects.sort_by(|a, b| (&a.entity_type, &a.entity_id).cmp(&(&b.entity_type, &b.entity_id)));
        Ok(paginate(subjects, &page, |s| format!("{}:{}", s.entity_type, s.entity_id)))
    }

    pub async fn list_resources(&self, session: &TenantSession, subject: &EntityRef, resource_type: &str, permission: &str, page: Page) -> Result<Vec<String>> {
        let mut resources = self.snapshot(session).await?.list_resources(subject, resource_type, permission);
        resources.sort();
        Ok(paginate(resources, &page, |id| id.clone()))
    }

    /// Direct grants held by `subject`, optionally narrowed to one
    /// resource type (spec §4.4 "list_grants"). Unlike `check`, this does
    /// not expand through the hierarchy or group rewrites — it reports
    /// exactly the tuples naming `subject` as their subject.
    pub async fn list_grants(&self, session: &TenantSession, subject: &EntityRef, resource_type: Option<&str>) -> Result<Vec<authgraph_models::RelationTuple>> {
        Ok(self.tuples.grants_for_subject(session.namespace(), subject, resource_type).await?)
    }

    /// Filter `resource_ids` down to the ones `subject` holds `permission`
    /// on (spec §4.4 "filter_authorized") — a batch form of `check` over a
    /// single resource type.
    pub async fn filter_authorized(&self, session: &TenantSession, subject: &EntityRef, resource_type: &str, permission: &str, resource_ids: &[String]) -> Result<Vec<String>> {
        let snapshot = self.snapshot(session).await?;
        Ok(resource_ids
            .iter()
            .filter(|id| {
                let resource = EntityRef {
                    entity_type: resource_type.to_string(),
                    entity_id: (*id).clone(),
                };
                snapshot.check(subject, permission, &resource)
            })
            .cloned()
            .collect())
    }

    /// Delete every tuple naming `subject` as subject, optionally narrowed
    /// to one resource type (spec §4.4 "revoke_all_grants").
    #[instrument(skip(self, actor))]
    pub async fn revoke_all_grants(&self, session: &TenantSession, actor: &ActorContext, subject: &EntityRef, resource_type: Option<&str>) -> Result<usize> {
        let mut tx = self.pool.begin().await.map_err(authgraph_database::DatabaseError::from)?;
        lock_namespace_for_write(&mut tx, session.namespace()).await?;
        let count = self.tuples.revoke_all_for_subject(&mut tx, session.namespace(), subject, resource_type).await?;
        if count > 0 {
            let event = NewAuditEvent {
                namespace: session.namespace().clone(),
                event_type: AuditEventType::TupleDeleted,
                resource_type: resource_type.map(str::to_string),
                resource_id: None,
                relation: None,
                subject_type: Some(subject.entity_type.clone()),
                subject_id: Some(subject.entity_id.clone()),
                subject_relation: None,
                tuple_id: None,
                expires_at: None,
                actor_id: actor.actor_id.clone(),
                request_id: actor.request_id.clone(),
                on_behalf_of: actor.on_behalf_of.clone(),
                reason: actor.reason.clone().or_else(|| Some(format!("revoke_all_grants: {count} tuple(s)"))),
            };
            self.audit.insert(event, None).await?;
        }
        tx.commit().await.map_err(authgraph_database::DatabaseError::from)?;
        Ok(count)
    }

    /// Check for data-integrity issues — currently, group-membership
    /// cycles — without touching `check`/`explain`'s own cycle-safety.
    /// Empty on a healthy namespace.
    pub async fn verify(&self, session: &TenantSession) -> Result<Vec<IntegrityIssue>> {
        let snapshot = self.snapshot(session).await?;
        let cycles = graph::find_membership_cycles(snapshot.tuples(), &self.config.group_membership_relations);
        Ok(cycles
            .into_iter()
            .map(|chain| {
                let (resource_type, resource_id, relation) = chain.last().cloned().unwrap_or_default();
                let path = chain
                    .iter()
                    .map(|(t, i, r)| format!("{t}:{i}#{r}"))
                    .collect::<Vec<_>>()
                    .join(" -> ");
                IntegrityIssue {
                    resource_type,
                    resource_id,
                    status: "membership_cycle".to_string(),
                    details: format!("group-membership cycle via {relation}: {path}"),
                }
            })
            .collect())
    }

    /// Namespace statistics for monitoring (spec §4.4, teacher's
    /// `DatabaseConfig`-adjacent operational surface).
    pub async fn get_stats(&self, session: &TenantSession) -> Result<NamespaceStats> {
        let snapshot = self.snapshot(session).await?;
        let tuples = snapshot.tuples();
        let mut subjects = std::collections::HashSet::new();
        let mut resources = std::collections::HashSet::new();
        for t in tuples {
            subjects.insert((t.subject_type.clone(), t.subject_id.clone()));
            resources.insert((t.resource_type.clone(), t.resource_id.clone()));
        }
        Ok(NamespaceStats {
            tuple_count: tuples.len(),
            hierarchy_rule_count: self.rules.effective_rules(session.namespace()).await?.len(),
            unique_subjects: subjects.len(),
            unique_resources: resources.len(),
        })
    }
}

fn paginate<T>(items: Vec<T>, page: &Page, cursor_key: impl Fn(&T) -> String) -> Vec<T> {
    let start = match &page.cursor {
        Some(cursor) => items.iter().position(|item| &cursor_key(item) > cursor).unwrap_or(items.len()),
        None => 0,
    };
    let rest = items.into_iter().skip(start);
    match page.limit {
        Some(limit) => rest.take(limit).collect(),
        None => rest.collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paginate_applies_cursor_then_limit() {
        let items = vec!["a".to_string(), "b".to_string(), "c".to_string(), "d".to_string()];
        let page = Page {
            limit: Some(2),
            cursor: Some("a".to_string()),
        };
        let result = paginate(items, &page, |s: &String| s.clone());
        assert_eq!(result, vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn paginate_with_no_cursor_starts_from_beginning() {
        let items = vec!["a".to_string(), "b".to_string()];
        let page = Page { limit: None, cursor: None };
        let result = paginate(items, &page, |s: &String| s.clone());
        assert_eq!(result, items);
    }
}
