use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use quotagate_core::entitlement::{EntitlementStore, Grant, QuotaType, Subscription};

use crate::backend::{from_sql_ts, to_sql_ts};
use crate::DuckDbBackend;

const SUBSCRIPTION_COLUMNS: &str = "id, actor_id, status, plan_code, \
     CAST(current_period_start AS VARCHAR), \
     CAST(current_period_end AS VARCHAR), \
     CAST(created_at AS VARCHAR)";

const GRANT_COLUMNS: &str = "id, actor_id, quota_type, remaining_count, \
     CAST(valid_until AS VARCHAR), status, CAST(created_at AS VARCHAR)";

fn subscription_from_row(row: &duckdb::Row<'_>) -> Result<Subscription> {
    let status: String = row.get(2)?;
    let period_start: String = row.get(4)?;
    let period_end: String = row.get(5)?;
    let created_at: String = row.get(6)?;
    Ok(Subscription {
        id: row.get(0)?,
        actor_id: row.get(1)?,
        status: status.parse().map_err(|e: String| anyhow!(e))?,
        plan_code: row.get(3)?,
        current_period_start: from_sql_ts(&period_start)?,
        current_period_end: from_sql_ts(&period_end)?,
        created_at: from_sql_ts(&created_at)?,
    })
}

fn grant_from_row(row: &duckdb::Row<'_>) -> Result<Grant> {
    let quota_type: String = row.get(2)?;
    let remaining: i64 = row.get(3)?;
    let valid_until: String = row.get(4)?;
    let status: String = row.get(5)?;
    let created_at: String = row.get(6)?;
    Ok(Grant {
        id: row.get(0)?,
        actor_id: row.get(1)?,
        quota_type: quota_type.parse().map_err(|e: String| anyhow!(e))?,
        remaining_count: u32::try_from(remaining)
            .map_err(|_| anyhow!("grant remaining_count out of range: {remaining}"))?,
        valid_until: from_sql_ts(&valid_until)?,
        status: status.parse().map_err(|e: String| anyhow!(e))?,
        created_at: from_sql_ts(&created_at)?,
    })
}

impl DuckDbBackend {
    /// Insert or replace a subscription row.
    ///
    /// Called by the billing webhook collaborator and test fixtures; the
    /// admission path never writes subscriptions.
    pub async fn upsert_subscription(&self, subscription: &Subscription) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"INSERT INTO subscriptions (
                   id, actor_id, status, plan_code,
                   current_period_start, current_period_end, created_at
               ) VALUES (
                   ?1, ?2, ?3, ?4,
                   CAST(?5 AS TIMESTAMP), CAST(?6 AS TIMESTAMP), CAST(?7 AS TIMESTAMP)
               )
               ON CONFLICT (id) DO UPDATE SET
                   status = EXCLUDED.status,
                   plan_code = EXCLUDED.plan_code,
                   current_period_start = EXCLUDED.current_period_start,
                   current_period_end = EXCLUDED.current_period_end"#,
            duckdb::params![
                subscription.id,
                subscription.actor_id,
                subscription.status.as_str(),
                subscription.plan_code,
                to_sql_ts(subscription.current_period_start),
                to_sql_ts(subscription.current_period_end),
                to_sql_ts(subscription.created_at),
            ],
        )?;
        Ok(())
    }

    /// Insert a prepaid grant. Called by the billing webhook collaborator.
    pub async fn insert_grant(&self, grant: &Grant) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"INSERT INTO grants (
                   id, actor_id, quota_type, remaining_count, valid_until, status, created_at
               ) VALUES (?1, ?2, ?3, ?4, CAST(?5 AS TIMESTAMP), ?6, CAST(?7 AS TIMESTAMP))"#,
            duckdb::params![
                grant.id,
                grant.actor_id,
                grant.quota_type.as_str(),
                i64::from(grant.remaining_count),
                to_sql_ts(grant.valid_until),
                grant.status.as_str(),
                to_sql_ts(grant.created_at),
            ],
        )?;
        Ok(())
    }

    /// Mark a grant revoked (refunds, chargebacks). Returns `false` if the
    /// grant does not exist.
    pub async fn revoke_grant(&self, grant_id: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE grants SET status = 'revoked' WHERE id = ?1",
            duckdb::params![grant_id],
        )?;
        if changed > 0 {
            tracing::info!(grant_id, "Grant revoked");
        }
        Ok(changed > 0)
    }

    pub async fn get_grant(&self, grant_id: &str) -> Result<Option<Grant>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!("SELECT {GRANT_COLUMNS} FROM grants WHERE id = ?1"))?;
        let mut rows = stmt.query(duckdb::params![grant_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(grant_from_row(row)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl EntitlementStore for DuckDbBackend {
    async fn active_subscription(
        &self,
        actor_id: &str,
        _now: DateTime<Utc>,
    ) -> anyhow::Result<Option<Subscription>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions \
             WHERE actor_id = ?1 AND status = 'active' \
             ORDER BY created_at DESC LIMIT 1"
        ))?;
        let mut rows = stmt.query(duckdb::params![actor_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(subscription_from_row(row)?)),
            None => Ok(None),
        }
    }

    async fn usable_grants(
        &self,
        actor_id: &str,
        quota_type: QuotaType,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Grant>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {GRANT_COLUMNS} FROM grants \
             WHERE actor_id = ?1 AND quota_type = ?2 AND status = 'active' \
               AND remaining_count > 0 AND valid_until > CAST(?3 AS TIMESTAMP) \
             ORDER BY valid_until ASC, created_at ASC, id ASC"
        ))?;
        let mut rows = stmt.query(duckdb::params![actor_id, quota_type.as_str(), to_sql_ts(now)])?;
        let mut grants = Vec::new();
        while let Some(row) = rows.next()? {
            grants.push(grant_from_row(row)?);
        }
        Ok(grants)
    }

    async fn decrement_grant(&self, grant_id: &str, now: DateTime<Utc>) -> anyhow::Result<bool> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE grants SET remaining_count = remaining_count - 1 \
             WHERE id = ?1 AND status = 'active' AND remaining_count > 0 \
               AND valid_until > CAST(?2 AS TIMESTAMP)",
            duckdb::params![grant_id, to_sql_ts(now)],
        )?;
        Ok(changed == 1)
    }
}
