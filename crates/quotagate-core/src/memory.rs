//! In-process implementation of every storage seam.
//!
//! Backs unit tests and embedders that do not need persistence. All state
//! lives behind one `tokio::sync::Mutex`, so the grant decrement and the
//! rate-limit check-and-record are single critical sections, like the guarded
//! statements in the DuckDB backend.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::entitlement::{
    ActionKind, ActivityLog, ConsumptionSource, EntitlementStore, Grant, GrantStatus, QuotaType,
    Subscription, SubscriptionStatus, UsageLedger, UsageRecord,
};

#[derive(Default)]
struct Tables {
    subscriptions: Vec<Subscription>,
    grants: Vec<Grant>,
    usage: Vec<UsageRecord>,
    activity: Vec<(String, ActionKind, DateTime<Utc>)>,
    resources: HashMap<String, DateTime<Utc>>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_subscription(&self, subscription: Subscription) {
        self.tables.lock().await.subscriptions.push(subscription);
    }

    pub async fn insert_grant(&self, grant: Grant) {
        self.tables.lock().await.grants.push(grant);
    }

    pub async fn grant(&self, grant_id: &str) -> Option<Grant> {
        self.tables
            .lock()
            .await
            .grants
            .iter()
            .find(|g| g.id == grant_id)
            .cloned()
    }

    pub async fn usage_records(&self) -> Vec<UsageRecord> {
        self.tables.lock().await.usage.clone()
    }

    /// Number of recorded rate-limiter rows for `actor_id`.
    pub async fn activity_count(&self, actor_id: &str) -> usize {
        self.tables
            .lock()
            .await
            .activity
            .iter()
            .filter(|(actor, _, _)| actor == actor_id)
            .count()
    }

    pub async fn touch_resource(&self, resource_id: &str, at: DateTime<Utc>) {
        self.tables
            .lock()
            .await
            .resources
            .insert(resource_id.to_string(), at);
    }
}

#[async_trait]
impl EntitlementStore for MemoryStore {
    async fn active_subscription(
        &self,
        actor_id: &str,
        _now: DateTime<Utc>,
    ) -> anyhow::Result<Option<Subscription>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .subscriptions
            .iter()
            .filter(|s| s.actor_id == actor_id && s.status == SubscriptionStatus::Active)
            .max_by_key(|s| s.created_at)
            .cloned())
    }

    async fn usable_grants(
        &self,
        actor_id: &str,
        quota_type: QuotaType,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Grant>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .grants
            .iter()
            .filter(|g| g.actor_id == actor_id && g.quota_type == quota_type && g.is_usable(now))
            .cloned()
            .collect())
    }

    async fn decrement_grant(&self, grant_id: &str, now: DateTime<Utc>) -> anyhow::Result<bool> {
        let mut tables = self.tables.lock().await;
        let Some(grant) = tables.grants.iter_mut().find(|g| {
            g.id == grant_id
                && g.status == GrantStatus::Active
                && g.remaining_count > 0
                && g.valid_until > now
        }) else {
            return Ok(false);
        };
        grant.remaining_count -= 1;
        Ok(true)
    }
}

#[async_trait]
impl UsageLedger for MemoryStore {
    async fn count_since(
        &self,
        actor_id: &str,
        quota_type: QuotaType,
        source: ConsumptionSource,
        since: DateTime<Utc>,
    ) -> anyhow::Result<u64> {
        let tables = self.tables.lock().await;
        let count = tables
            .usage
            .iter()
            .filter(|r| {
                r.actor_id == actor_id
                    && r.quota_type == quota_type
                    && r.source == source
                    && r.occurred_at >= since
            })
            .count();
        Ok(count as u64)
    }

    async fn append(&self, record: &UsageRecord) -> anyhow::Result<()> {
        self.tables.lock().await.usage.push(record.clone());
        Ok(())
    }
}

#[async_trait]
impl ActivityLog for MemoryStore {
    async fn record_if_under(
        &self,
        actor_id: &str,
        action: ActionKind,
        since: DateTime<Utc>,
        max_actions: u64,
        at: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        let mut tables = self.tables.lock().await;
        let count = tables
            .activity
            .iter()
            .filter(|(actor, kind, recorded)| {
                actor == actor_id && *kind == action && *recorded > since
            })
            .count() as u64;
        if count >= max_actions {
            return Ok(false);
        }
        tables.activity.push((actor_id.to_string(), action, at));
        Ok(true)
    }

    async fn release_action(
        &self,
        actor_id: &str,
        action: ActionKind,
        at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let mut tables = self.tables.lock().await;
        let found = tables.activity.iter().position(|(actor, kind, recorded)| {
            actor == actor_id && *kind == action && *recorded == at
        });
        if let Some(pos) = found {
            tables.activity.remove(pos);
        }
        Ok(())
    }

    async fn resource_last_modified(
        &self,
        resource_id: &str,
    ) -> anyhow::Result<Option<DateTime<Utc>>> {
        Ok(self.tables.lock().await.resources.get(resource_id).copied())
    }
}
