use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use quotagate_core::entitlement::{ActionKind, ActivityLog};

use crate::backend::{from_sql_ts, to_sql_ts};
use crate::DuckDbBackend;

impl DuckDbBackend {
    /// Record that `resource_id` was modified at `at`.
    ///
    /// Called by the plan persistence layer on every save so the per-resource
    /// update check sees fresh timestamps.
    pub async fn touch_resource(&self, resource_id: &str, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO resources (id, updated_at) VALUES (?1, CAST(?2 AS TIMESTAMP)) \
             ON CONFLICT (id) DO UPDATE SET updated_at = EXCLUDED.updated_at",
            duckdb::params![resource_id, to_sql_ts(at)],
        )?;
        Ok(())
    }
}

#[async_trait]
impl ActivityLog for DuckDbBackend {
    /// One `INSERT ... SELECT ... WHERE count < max` under the connection
    /// lock; the count and the insert cannot interleave with another caller.
    async fn record_if_under(
        &self,
        actor_id: &str,
        action: ActionKind,
        since: DateTime<Utc>,
        max_actions: u64,
        at: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        let conn = self.conn.lock().await;
        let inserted = conn.execute(
            "INSERT INTO activity_log (actor_id, action, occurred_at) \
             SELECT ?1, ?2, CAST(?3 AS TIMESTAMP) \
             WHERE (SELECT COUNT(*) FROM activity_log \
                    WHERE actor_id = ?1 AND action = ?2 \
                      AND occurred_at > CAST(?4 AS TIMESTAMP)) < ?5",
            duckdb::params![
                actor_id,
                action.as_str(),
                to_sql_ts(at),
                to_sql_ts(since),
                i64::try_from(max_actions).unwrap_or(i64::MAX),
            ],
        )?;
        Ok(inserted == 1)
    }

    async fn release_action(
        &self,
        actor_id: &str,
        action: ActionKind,
        at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "DELETE FROM activity_log WHERE rowid IN ( \
                 SELECT rowid FROM activity_log \
                 WHERE actor_id = ?1 AND action = ?2 \
                   AND occurred_at = CAST(?3 AS TIMESTAMP) \
                 LIMIT 1)",
            duckdb::params![actor_id, action.as_str(), to_sql_ts(at)],
        )?;
        Ok(())
    }

    async fn resource_last_modified(
        &self,
        resource_id: &str,
    ) -> anyhow::Result<Option<DateTime<Utc>>> {
        let conn = self.conn.lock().await;
        let mut stmt =
            conn.prepare("SELECT CAST(updated_at AS VARCHAR) FROM resources WHERE id = ?1")?;
        let mut rows = stmt.query(duckdb::params![resource_id])?;
        match rows.next()? {
            Some(row) => {
                let raw: String = row.get(0)?;
                Ok(Some(from_sql_ts(&raw)?))
            }
            None => Ok(None),
        }
    }
}
