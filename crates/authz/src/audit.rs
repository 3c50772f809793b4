use authgraph_database::repositories::audit::AuditRepository;
use authgraph_models::{AuditEvent, AuditEventQuery, Namespace};
use sqlx::PgPool;

use crate::error::Result;

/// Partition lifecycle and queries over the append-only audit trail
/// (spec §4.5 "Audit Log").
#[derive(Clone)]
pub struct AuditService {
    repo: AuditRepository,
}

impl AuditService {
    pub fn new(pool: PgPool) -> Self {
        Self {
            repo: AuditRepository::new(pool),
        }
    }

    /// Idempotently create the partition for the current month and the
    /// next `months_ahead` months; returns the partitions created or
    /// already present, in chronological order (spec §4.5
    /// "ensure_partitions").
    pub async fn ensure_partitions(&self, months_ahead: u32) -> Result<Vec<String>> {
        Ok(self.repo.ensure_partitions(months_ahead).await?)
    }

    pub async fn drop_partitions(&self, before_year: i32, before_month: u32) -> Result<Vec<String>> {
        Ok(self.repo.drop_partitions_before(before_year, before_month).await?)
    }

    pub async fn get_audit_events(&self, namespace: &Namespace, filter: AuditEventQuery) -> Result<Vec<AuditEvent>> {
        Ok(self.repo.query(namespace, filter).await?)
    }
}
