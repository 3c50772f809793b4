use authgraph_models::{AuditEvent, AuditEventQuery, Namespace, NewAuditEvent};
use chrono::{Datelike, NaiveDate, Utc};
use ipnetwork::IpNetwork;
use sqlx::{PgPool, QueryBuilder, Postgres};
use uuid::Uuid;

use crate::error::Result;

/// Storage for the append-only audit trail (spec §3 "Audit Event", §4.5
/// "Audit Log"). Events are stored in monthly range partitions of
/// `authz_audit_events` named `audit_events_yYYYYmMM`; `ensure_partitions`
/// must be called (e.g. by a scheduled job) before events land in a new
/// month, and `drop_partitions_before` implements retention.
#[derive(Clone)]
pub struct AuditRepository {
    pool: PgPool,
}

impl AuditRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Idempotently create the partition for the current month and the
    /// next `months_ahead` months (spec §4.5 "ensure_partitions"). Returns
    /// the names of the partitions created or confirmed present, in
    /// chronological order — a scheduled job calls this ahead of time so
    /// writes never land in a month that has no partition yet.
    pub async fn ensure_partitions(&self, months_ahead: u32) -> Result<Vec<String>> {
        let now = Utc::now();
        let mut year = now.year();
        let mut month = now.month();

        let mut created = Vec::with_capacity(months_ahead as usize + 1);
        for _ in 0..=months_ahead {
            created.push(self.ensure_partition(year, month).await?);
            (year, month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
        }
        Ok(created)
    }

    /// Create the partition covering `year`/`month` if it doesn't already
    /// exist. Idempotent.
    async fn ensure_partition(&self, year: i32, month: u32) -> Result<String> {
        let table = partition_name(year, month);
        let start = NaiveDate::from_ymd_opt(year, month, 1)
            .ok_or_else(|| crate::DatabaseError::InvalidInput(format!("invalid year/month {year}/{month}")))?;
        let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
        let end = NaiveDate::from_ymd_opt(next_year, next_month, 1)
            .ok_or_else(|| crate::DatabaseError::InvalidInput(format!("invalid year/month {next_year}/{next_month}")))?;

        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {table} PARTITION OF authz_audit_events FOR VALUES FROM ('{start}') TO ('{end}')"
        );
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(table)
    }

    /// Drop every partition strictly older than `year`/`month`. Returns the
    /// names of the partitions dropped.
    pub async fn drop_partitions_before(&self, year: i32, month: u32) -> Result<Vec<String>> {
        let partitions: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT c.relname
            FROM pg_catalog.pg_inherits i
            JOIN pg_catalog.pg_class c ON c.oid = i.inhrelid
            JOIN pg_catalog.pg_class p ON p.oid = i.inhparent
            WHERE p.relname = 'authz_audit_events'
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut dropped = Vec::new();
        for (name,) in partitions {
            if let Some((y, m)) = parse_partition_name(&name) {
                if (y, m) < (year, month) {
                    let sql = format!("DROP TABLE IF EXISTS {name}");
                    sqlx::query(&sql).execute(&self.pool).await?;
                    dropped.push(name);
                }
            }
        }
        Ok(dropped)
    }

    pub async fn insert(
        &self,
        event: NewAuditEvent,
        client_addr: Option<IpNetwork>,
    ) -> Result<AuditEvent> {
        let row = sqlx::query_as::<_, AuditEvent>(
            r#"
            INSERT INTO authz_audit_events (
                event_id, event_time, namespace, event_type,
                resource_type, resource_id, relation,
                subject_type, subject_id, subject_relation,
                tuple_id, expires_at,
                actor_id, request_id, on_behalf_of, reason,
                "session_user", "current_user", client_addr, application_name
            )
            VALUES (
                $1, now(), $2, $3,
                $4, $5, $6,
                $7, $8, $9,
                $10, $11,
                $12, $13, $14, $15,
                NULL, NULL, $16, NULL
            )
            RETURNING event_id, event_time, namespace, event_type,
                      resource_type, resource_id, relation,
                      subject_type, subject_id, subject_relation,
                      tuple_id, expires_at,
                      actor_id, request_id, on_behalf_of, reason,
                      "session_user", "current_user", client_addr, application_name
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(event.namespace.as_str())
        .bind(event.event_type)
        .bind(event.resource_type)
        .bind(event.resource_id)
        .bind(event.relation)
        .bind(event.subject_type)
        .bind(event.subject_id)
        .bind(event.subject_relation)
        .bind(event.tuple_id)
        .bind(event.expires_at)
        .bind(event.actor_id)
        .bind(event.request_id)
        .bind(event.on_behalf_of)
        .bind(event.reason)
        .bind(client_addr)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    /// Query events for `namespace`, most recent first, tie-broken by
    /// `event_id` for a stable order among same-timestamp rows.
    pub async fn query(&self, namespace: &Namespace, filter: AuditEventQuery) -> Result<Vec<AuditEvent>> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            r#"
            SELECT event_id, event_time, namespace, event_type,
                   resource_type, resource_id, relation,
                   subject_type, subject_id, subject_relation,
                   tuple_id, expires_at,
                   actor_id, request_id, on_behalf_of, reason,
                   "session_user", "current_user", client_addr, application_name
            FROM authz_audit_events
            WHERE namespace =
            "#,
        );
        builder.push_bind(namespace.as_str());

        if let Some(event_type) = filter.event_type {
            builder.push(" AND event_type = ");
            builder.push_bind(event_type);
        }
        if let Some(actor_id) = &filter.actor_id {
            builder.push(" AND actor_id = ");
            builder.push_bind(actor_id);
        }
        if let Some(resource_type) = &filter.resource_type {
            builder.push(" AND resource_type = ");
            builder.push_bind(resource_type);
        }
        if let Some(resource_id) = &filter.resource_id {
            builder.push(" AND resource_id = ");
            builder.push_bind(resource_id);
        }
        if let Some(subject_type) = &filter.subject_type {
            builder.push(" AND subject_type = ");
            builder.push_bind(subject_type);
        }
        if let Some(subject_id) = &filter.subject_id {
            builder.push(" AND subject_id = ");
            builder.push_bind(subject_id);
        }

        builder.push(" ORDER BY event_time DESC, event_id DESC");

        if let Some(limit) = filter.limit {
            builder.push(" LIMIT ");
            builder.push_bind(limit);
        } else {
            builder.push(" LIMIT 100");
        }

        let rows = builder.build_query_as::<AuditEvent>().fetch_all(&self.pool).await?;
        Ok(rows)
    }
}

fn partition_name(year: i32, month: u32) -> String {
    format!("audit_events_y{year:04}m{month:02}")
}

fn parse_partition_name(name: &str) -> Option<(i32, u32)> {
    let rest = name.strip_prefix("audit_events_y")?;
    let (y, rest) = rest.split_once('m')?;
    let year: i32 = y.parse().ok()?;
    let month: u32 = rest.parse().ok()?;
    Some((year, month))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_name_round_trips() {
        let name = partition_name(2026, 7);
        assert_eq!(name, "audit_events_y2026m07");
        assert_eq!(parse_partition_name(&name), Some((2026, 7)));
    }

    #[test]
    fn parse_rejects_unrelated_names() {
        assert_eq!(parse_partition_name("authz_tuples"), None);
    }

    #[tokio::test]
    #[ignore] // requires a running Postgres instance
    async fn ensure_then_query_partition() {
        let db = crate::Database::new(crate::DatabaseConfig::from_env())
            .await
            .expect("failed to connect to database");
        let repo = AuditRepository::new(db.pool().clone());
        let created = repo.ensure_partitions(2).await.expect("partitions should be created");
        assert_eq!(created.len(), 3);
    }
}
