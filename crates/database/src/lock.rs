use authgraph_models::Namespace;
use sqlx::{Postgres, Transaction};

use crate::error::Result;

/// Take a transaction-scoped advisory lock keyed on `namespace` (spec §5
/// concurrency contract): every write to a tenant's tuples or hierarchy
/// rules serializes behind this lock, but distinct tenants never block
/// each other because `hashtext` spreads namespaces across the lock
/// keyspace. The lock is released automatically at transaction end.
pub async fn lock_namespace_for_write(
    tx: &mut Transaction<'_, Postgres>,
    namespace: &Namespace,
) -> Result<()> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(namespace.as_str())
        .execute(&mut **tx)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // requires a running Postgres instance
    async fn lock_is_acquirable_within_a_transaction() {
        let db = crate::Database::new(crate::DatabaseConfig::from_env())
            .await
            .expect("failed to connect to database");
        let mut tx = db.pool().begin().await.expect("failed to begin transaction");
        let ns = Namespace::new("acme-corp").unwrap();
        lock_namespace_for_write(&mut tx, &ns).await.expect("lock should succeed");
        tx.rollback().await.expect("rollback should succeed");
    }
}
