use authgraph_models::{HierarchyRule, Namespace};
use sqlx::{PgPool, Postgres, Transaction};

use crate::error::Result;

/// Storage for permission-implication rules (spec §3 "Hierarchy Rule",
/// §4.3 "Hierarchy Store"). A rule lives in exactly one namespace;
/// `Namespace::global()` rules apply to every tenant in addition to that
/// tenant's own (additive union, confirmed against the reference
/// implementation's own documentation of this behavior).
#[derive(Clone)]
pub struct HierarchyRepository {
    pool: PgPool,
}

impl HierarchyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn add_rule(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        rule: &HierarchyRule,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO authz_hierarchy_rules (namespace, resource_type, permission, implies)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (namespace, resource_type, permission, implies) DO NOTHING
            "#,
        )
        .bind(rule.namespace.as_str())
        .bind(&rule.resource_type)
        .bind(&rule.permission)
        .bind(&rule.implies)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn remove_rule(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        rule: &HierarchyRule,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM authz_hierarchy_rules
            WHERE namespace = $1 AND resource_type = $2 AND permission = $3 AND implies = $4
            "#,
        )
        .bind(rule.namespace.as_str())
        .bind(&rule.resource_type)
        .bind(&rule.permission)
        .bind(&rule.implies)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn clear(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        namespace: &Namespace,
        resource_type: &str,
    ) -> Result<usize> {
        let result = sqlx::query("DELETE FROM authz_hierarchy_rules WHERE namespace = $1 AND resource_type = $2")
            .bind(namespace.as_str())
            .bind(resource_type)
            .execute(&mut **tx)
            .await?;
        Ok(result.rows_affected() as usize)
    }

    /// Rules visible to `namespace`: its own plus the global set. This is
    /// the snapshot the pure graph-resolution layer walks (spec §4.3,
    /// §4.4 "BOTH global AND tenant hierarchies apply").
    pub async fn effective_rules(&self, namespace: &Namespace) -> Result<Vec<HierarchyRule>> {
        let rows = sqlx::query_as::<_, HierarchyRule>(
            r#"
            SELECT namespace, resource_type, permission, implies
            FROM authz_hierarchy_rules
            WHERE namespace = $1 OR namespace = $2
            "#,
        )
        .bind(namespace.as_str())
        .bind(Namespace::GLOBAL)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // requires a running Postgres instance
    async fn add_then_remove_rule_round_trips() {
        let db = crate::Database::new(crate::DatabaseConfig::from_env())
            .await
            .expect("failed to connect to database");
        let repo = HierarchyRepository::new(db.pool().clone());
        let ns = Namespace::new("acme-corp").unwrap();
        let rule = HierarchyRule::new(ns.clone(), "repo", "admin", "write");

        let mut tx = db.pool().begin().await.unwrap();
        assert!(repo.add_rule(&mut tx, &rule).await.unwrap());
        assert!(repo.remove_rule(&mut tx, &rule).await.unwrap());
        tx.rollback().await.unwrap();
    }
}
