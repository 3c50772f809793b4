use authgraph_models::{EntityRef, Namespace, RelationTuple, SubjectKey};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use uuid::Uuid;

use crate::error::Result;

/// Storage for relation tuples (spec §3 "Tuple", §4.2 "Tuple Store").
///
/// Uniqueness of `(namespace, resource, relation, subject)` is enforced at
/// the repository level rather than via a single `ON CONFLICT` clause: a
/// `subject_relation` of `NULL` must be distinct from every non-NULL value
/// (spec invariant), which a plain unique index cannot express with a
/// naive equality comparison, so lookups use the explicit
/// `subject_relation = $n OR (subject_relation IS NULL AND $n IS NULL)`
/// predicate and writers check-then-insert under the caller's advisory
/// lock instead.
#[derive(Clone)]
pub struct TupleRepository {
    pool: PgPool,
}

fn subject_type_id_relation(key: &SubjectKey) -> (&str, &str, Option<&str>) {
    (key.entity().entity_type.as_str(), key.entity().entity_id.as_str(), key.relation())
}

impl TupleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Find the tuple for this exact key, if one exists (used to make
    /// `grant` idempotent: a re-grant returns the existing id rather than
    /// inserting a duplicate row or erroring).
    pub async fn find(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        namespace: &Namespace,
        resource: &EntityRef,
        relation: &str,
        subject: &SubjectKey,
    ) -> Result<Option<RelationTuple>> {
        let (subject_type, subject_id, subject_relation) = subject_type_id_relation(subject);
        let row = sqlx::query_as::<_, RelationTuple>(
            r#"
            SELECT id, namespace, resource_type, resource_id, relation,
                   subject_type, subject_id, subject_relation,
                   created_at, created_by, expires_at
            FROM authz_tuples
            WHERE namespace = $1
              AND resource_type = $2 AND resource_id = $3
              AND relation = $4
              AND subject_type = $5 AND subject_id = $6
              AND (subject_relation = $7 OR (subject_relation IS NULL AND $7 IS NULL))
            "#,
        )
        .bind(namespace.as_str())
        .bind(&resource.entity_type)
        .bind(&resource.entity_id)
        .bind(relation)
        .bind(subject_type)
        .bind(subject_id)
        .bind(subject_relation)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(row)
    }

    /// Insert a new tuple. Caller is responsible for the idempotency check
    /// (`find`) and for holding the namespace's advisory lock.
    pub async fn insert(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        namespace: &Namespace,
        resource: &EntityRef,
        relation: &str,
        subject: &SubjectKey,
        expires_at: Option<DateTime<Utc>>,
        created_by: Option<&str>,
    ) -> Result<RelationTuple> {
        let (subject_type, subject_id, subject_relation) = subject_type_id_relation(subject);
        let row = sqlx::query_as::<_, RelationTuple>(
            r#"
            INSERT INTO authz_tuples (
                id, namespace, resource_type, resource_id, relation,
                subject_type, subject_id, subject_relation,
                created_at, created_by, expires_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, now(), $9, $10)
            RETURNING id, namespace, resource_type, resource_id, relation,
                      subject_type, subject_id, subject_relation,
                      created_at, created_by, expires_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(namespace.as_str())
        .bind(&resource.entity_type)
        .bind(&resource.entity_id)
        .bind(relation)
        .bind(subject_type)
        .bind(subject_id)
        .bind(subject_relation)
        .bind(created_by)
        .bind(expires_at)
        .fetch_one(&mut **tx)
        .await?;
        Ok(row)
    }

    /// Bulk-insert one relation to many subjects, grouped by subject type
    /// in a single statement per group (spec §4.2 "bulk_grant"). Returns
    /// the tuples actually created; subjects that already held the grant
    /// are skipped via an `ON CONFLICT DO NOTHING` against the matching
    /// partial unique index, since a mid-batch duplicate is not a conflict
    /// worth failing the whole batch over.
    pub async fn bulk_insert_subjects(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        namespace: &Namespace,
        resource: &EntityRef,
        relation: &str,
        subjects: &[SubjectKey],
        expires_at: Option<DateTime<Utc>>,
        created_by: Option<&str>,
    ) -> Result<usize> {
        if subjects.is_empty() {
            return Ok(0);
        }
        let mut inserted = 0usize;
        for group in group_by_subject_type(subjects) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO authz_tuples (id, namespace, resource_type, resource_id, relation, subject_type, subject_id, subject_relation, created_at, created_by, expires_at) ",
            );
            builder.push_values(group, |mut b, key| {
                let (subject_type, subject_id, subject_relation) = subject_type_id_relation(key);
                b.push_bind(Uuid::new_v4())
                    .push_bind(namespace.as_str())
                    .push_bind(&resource.entity_type)
                    .push_bind(&resource.entity_id)
                    .push_bind(relation)
                    .push_bind(subject_type)
                    .push_bind(subject_id)
                    .push_bind(subject_relation)
                    .push("now()")
                    .push_bind(created_by)
                    .push_bind(expires_at);
            });
            builder.push(
                " ON CONFLICT (namespace, resource_type, resource_id, relation, subject_type, subject_id) WHERE subject_relation IS NULL DO NOTHING",
            );
            let result = builder.build().execute(&mut **tx).await?;
            inserted += result.rows_affected() as usize;
        }
        Ok(inserted)
    }

    /// Bulk-insert one subject onto many resources of the same type (spec
    /// §4.2 "bulk_grant_resources").
    pub async fn bulk_insert_resources(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        namespace: &Namespace,
        resource_type: &str,
        resource_ids: &[String],
        relation: &str,
        subject: &SubjectKey,
        expires_at: Option<DateTime<Utc>>,
        created_by: Option<&str>,
    ) -> Result<usize> {
        if resource_ids.is_empty() {
            return Ok(0);
        }
        let (subject_type, subject_id, subject_relation) = subject_type_id_relation(subject);
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO authz_tuples (id, namespace, resource_type, resource_id, relation, subject_type, subject_id, subject_relation, created_at, created_by, expires_at) ",
        );
        builder.push_values(resource_ids, |mut b, resource_id| {
            b.push_bind(Uuid::new_v4())
                .push_bind(namespace.as_str())
                .push_bind(resource_type)
                .push_bind(resource_id)
                .push_bind(relation)
                .push_bind(subject_type)
                .push_bind(subject_id)
                .push_bind(subject_relation)
                .push("now()")
                .push_bind(created_by)
                .push_bind(expires_at);
        });
        builder.push(
            " ON CONFLICT (namespace, resource_type, resource_id, relation, subject_type, subject_id) WHERE subject_relation IS NULL DO NOTHING",
        );
        let result = builder.build().execute(&mut **tx).await?;
        Ok(result.rows_affected() as usize)
    }

    pub async fn delete(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        namespace: &Namespace,
        resource: &EntityRef,
        relation: &str,
        subject: &SubjectKey,
    ) -> Result<Option<RelationTuple>> {
        let (subject_type, subject_id, subject_relation) = subject_type_id_relation(subject);
        let row = sqlx::query_as::<_, RelationTuple>(
            r#"
            DELETE FROM authz_tuples
            WHERE namespace = $1
              AND resource_type = $2 AND resource_id = $3
              AND relation = $4
              AND subject_type = $5 AND subject_id = $6
              AND (subject_relation = $7 OR (subject_relation IS NULL AND $7 IS NULL))
            RETURNING id, namespace, resource_type, resource_id, relation,
                      subject_type, subject_id, subject_relation,
                      created_at, created_by, expires_at
            "#,
        )
        .bind(namespace.as_str())
        .bind(&resource.entity_type)
        .bind(&resource.entity_id)
        .bind(relation)
        .bind(subject_type)
        .bind(subject_id)
        .bind(subject_relation)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(row)
    }

    pub async fn set_expiration(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        namespace: &Namespace,
        resource: &EntityRef,
        relation: &str,
        subject: &SubjectKey,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Option<RelationTuple>> {
        let (subject_type, subject_id, subject_relation) = subject_type_id_relation(subject);
        let row = sqlx::query_as::<_, RelationTuple>(
            r#"
            UPDATE authz_tuples
            SET expires_at = $8
            WHERE namespace = $1
              AND resource_type = $2 AND resource_id = $3
              AND relation = $4
              AND subject_type = $5 AND subject_id = $6
              AND (subject_relation = $7 OR (subject_relation IS NULL AND $7 IS NULL))
            RETURNING id, namespace, resource_type, resource_id, relation,
                      subject_type, subject_id, subject_relation,
                      created_at, created_by, expires_at
            "#,
        )
        .bind(namespace.as_str())
        .bind(&resource.entity_type)
        .bind(&resource.entity_id)
        .bind(relation)
        .bind(subject_type)
        .bind(subject_id)
        .bind(subject_relation)
        .bind(expires_at)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(row)
    }

    /// All tuples naming `resource` as the object, any relation (used by
    /// `explain`/`expand` to enumerate direct subjects of a resource).
    pub async fn tuples_for_resource(
        &self,
        namespace: &Namespace,
        resource: &EntityRef,
    ) -> Result<Vec<RelationTuple>> {
        let rows = sqlx::query_as::<_, RelationTuple>(
            r#"
            SELECT id, namespace, resource_type, resource_id, relation,
                   subject_type, subject_id, subject_relation,
                   created_at, created_by, expires_at
            FROM authz_tuples
            WHERE namespace = $1 AND resource_type = $2 AND resource_id = $3
              AND (expires_at IS NULL OR expires_at > now())
            "#,
        )
        .bind(namespace.as_str())
        .bind(&resource.entity_type)
        .bind(&resource.entity_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Every tuple in which `subject` participates directly (used to
    /// discover group memberships during resolution).
    pub async fn tuples_for_subject(
        &self,
        namespace: &Namespace,
        subject: &EntityRef,
    ) -> Result<Vec<RelationTuple>> {
        let rows = sqlx::query_as::<_, RelationTuple>(
            r#"
            SELECT id, namespace, resource_type, resource_id, relation,
                   subject_type, subject_id, subject_relation,
                   created_at, created_by, expires_at
            FROM authz_tuples
            WHERE namespace = $1 AND subject_type = $2 AND subject_id = $3
              AND (expires_at IS NULL OR expires_at > now())
            "#,
        )
        .bind(namespace.as_str())
        .bind(&subject.entity_type)
        .bind(&subject.entity_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Full unexpired tuple set for a namespace — the snapshot the pure
    /// graph-resolution layer runs over (spec Design Notes §9: resolution
    /// may be done in-memory over a fetched snapshot).
    pub async fn all_tuples(&self, namespace: &Namespace) -> Result<Vec<RelationTuple>> {
        let rows = sqlx::query_as::<_, RelationTuple>(
            r#"
            SELECT id, namespace, resource_type, resource_id, relation,
                   subject_type, subject_id, subject_relation,
                   created_at, created_by, expires_at
            FROM authz_tuples
            WHERE namespace = $1 AND (expires_at IS NULL OR expires_at > now())
            "#,
        )
        .bind(namespace.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Same as [`Self::all_tuples`], but read through the caller's open
    /// transaction. Used by write-path cycle checks (spec §4.2 enforcement
    /// steps 2-3) that must see the namespace's current state as of the
    /// advisory lock being held, not a separately-snapshotted connection.
    pub async fn all_tuples_tx(&self, tx: &mut Transaction<'_, Postgres>, namespace: &Namespace) -> Result<Vec<RelationTuple>> {
        let rows = sqlx::query_as::<_, RelationTuple>(
            r#"
            SELECT id, namespace, resource_type, resource_id, relation,
                   subject_type, subject_id, subject_relation,
                   created_at, created_by, expires_at
            FROM authz_tuples
            WHERE namespace = $1 AND (expires_at IS NULL OR expires_at > now())
            "#,
        )
        .bind(namespace.as_str())
        .fetch_all(&mut **tx)
        .await?;
        Ok(rows)
    }

    pub async fn tuples_for_subject_across_namespaces(
        &self,
        subject: &EntityRef,
        exclude_namespace: &Namespace,
    ) -> Result<Vec<RelationTuple>> {
        let rows = sqlx::query_as::<_, RelationTuple>(
            r#"
            SELECT id, namespace, resource_type, resource_id, relation,
                   subject_type, subject_id, subject_relation,
                   created_at, created_by, expires_at
            FROM authz_tuples
            WHERE subject_type = $1 AND subject_id = $2
              AND namespace != $3
              AND subject_relation IS NULL
              AND (expires_at IS NULL OR expires_at > now())
            ORDER BY created_at DESC
            "#,
        )
        .bind(&subject.entity_type)
        .bind(&subject.entity_id)
        .bind(exclude_namespace.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn grants_for_subject(
        &self,
        namespace: &Namespace,
        subject: &EntityRef,
        resource_type: Option<&str>,
    ) -> Result<Vec<RelationTuple>> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            r#"
            SELECT id, namespace, resource_type, resource_id, relation,
                   subject_type, subject_id, subject_relation,
                   created_at, created_by, expires_at
            FROM authz_tuples
            WHERE namespace =
            "#,
        );
        builder.push_bind(namespace.as_str());
        builder.push(" AND subject_type = ");
        builder.push_bind(&subject.entity_type);
        builder.push(" AND subject_id = ");
        builder.push_bind(&subject.entity_id);
        if let Some(resource_type) = resource_type {
            builder.push(" AND resource_type = ");
            builder.push_bind(resource_type);
        }
        builder.push(" AND (expires_at IS NULL OR expires_at > now())");
        let rows = builder
            .build_query_as::<RelationTuple>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    pub async fn revoke_all_for_subject(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        namespace: &Namespace,
        subject: &EntityRef,
        resource_type: Option<&str>,
    ) -> Result<usize> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("DELETE FROM authz_tuples WHERE namespace = ");
        builder.push_bind(namespace.as_str());
        builder.push(" AND subject_type = ");
        builder.push_bind(&subject.entity_type);
        builder.push(" AND subject_id = ");
        builder.push_bind(&subject.entity_id);
        if let Some(resource_type) = resource_type {
            builder.push(" AND resource_type = ");
            builder.push_bind(resource_type);
        }
        let result = builder.build().execute(&mut **tx).await?;
        Ok(result.rows_affected() as usize)
    }

    pub async fn list_expiring(
        &self,
        namespace: &Namespace,
        within: chrono::Duration,
    ) -> Result<Vec<RelationTuple>> {
        let cutoff = Utc::now() + within;
        let rows = sqlx::query_as::<_, RelationTuple>(
            r#"
            SELECT id, namespace, resource_type, resource_id, relation,
                   subject_type, subject_id, subject_relation,
                   created_at, created_by, expires_at
            FROM authz_tuples
            WHERE namespace = $1 AND expires_at IS NOT NULL AND expires_at <= $2 AND expires_at > now()
            ORDER BY expires_at ASC
            "#,
        )
        .bind(namespace.as_str())
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn cleanup_expired(&self, tx: &mut Transaction<'_, Postgres>, namespace: &Namespace) -> Result<usize> {
        let result = sqlx::query("DELETE FROM authz_tuples WHERE namespace = $1 AND expires_at IS NOT NULL AND expires_at <= now()")
            .bind(namespace.as_str())
            .execute(&mut **tx)
            .await?;
        Ok(result.rows_affected() as usize)
    }
}

fn group_by_subject_type(subjects: &[SubjectKey]) -> Vec<Vec<&SubjectKey>> {
    let mut groups: Vec<(String, Vec<&SubjectKey>)> = Vec::new();
    for subject in subjects {
        let subject_type = subject.entity().entity_type.clone();
        if let Some((_, group)) = groups.iter_mut().find(|(t, _)| *t == subject_type) {
            group.push(subject);
        } else {
            groups.push((subject_type, vec![subject]));
        }
    }
    groups.into_iter().map(|(_, group)| group).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_preserve_subject_type_batches() {
        let a = SubjectKey::Default(EntityRef::new("user", "alice").unwrap());
        let b = SubjectKey::Default(EntityRef::new("group", "eng").unwrap());
        let c = SubjectKey::Default(EntityRef::new("user", "bob").unwrap());
        let groups = group_by_subject_type(&[a, b, c]);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].len(), 2);
        assert_eq!(groups[1].len(), 1);
    }
}
