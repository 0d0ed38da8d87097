use async_trait::async_trait;
use chrono::{DateTime, Utc};

use quotagate_core::entitlement::{ConsumptionSource, QuotaType, UsageLedger, UsageRecord};

use crate::backend::to_sql_ts;
use crate::DuckDbBackend;

#[async_trait]
impl UsageLedger for DuckDbBackend {
    async fn count_since(
        &self,
        actor_id: &str,
        quota_type: QuotaType,
        source: ConsumptionSource,
        since: DateTime<Utc>,
    ) -> anyhow::Result<u64> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT COUNT(*) FROM usage_records \
             WHERE actor_id = ?1 AND quota_type = ?2 AND source = ?3 \
               AND occurred_at >= CAST(?4 AS TIMESTAMP)",
        )?;
        let count: i64 = stmt.query_row(
            duckdb::params![
                actor_id,
                quota_type.as_str(),
                source.as_str(),
                to_sql_ts(since),
            ],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    async fn append(&self, record: &UsageRecord) -> anyhow::Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO usage_records (id, actor_id, quota_type, source, occurred_at) \
             VALUES (?1, ?2, ?3, ?4, CAST(?5 AS TIMESTAMP))",
            duckdb::params![
                record.id,
                record.actor_id,
                record.quota_type.as_str(),
                record.source.as_str(),
                to_sql_ts(record.occurred_at),
            ],
        )?;
        Ok(())
    }
}
