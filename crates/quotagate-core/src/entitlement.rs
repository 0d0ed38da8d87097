//! Entitlement records and the storage seams the consumer reads through.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Authenticated principal being rate- and quota-checked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub email: Option<String>,
}

impl Actor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

/// Category of metered action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaType {
    PlanGeneration,
    TravelInfo,
}

impl QuotaType {
    pub const ALL: [QuotaType; 2] = [QuotaType::PlanGeneration, QuotaType::TravelInfo];

    pub fn as_str(&self) -> &'static str {
        match self {
            QuotaType::PlanGeneration => "plan_generation",
            QuotaType::TravelInfo => "travel_info",
        }
    }
}

impl fmt::Display for QuotaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuotaType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plan_generation" => Ok(QuotaType::PlanGeneration),
            "travel_info" => Ok(QuotaType::TravelInfo),
            other => Err(format!("unknown quota type: {other}")),
        }
    }
}

/// Entitlement source a decision was charged against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumptionSource {
    Admin,
    Subscription,
    /// Free-tier allowance for actors without a usable subscription.
    Free,
    Ticket,
}

impl ConsumptionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsumptionSource::Admin => "admin",
            ConsumptionSource::Subscription => "subscription",
            ConsumptionSource::Free => "free",
            ConsumptionSource::Ticket => "ticket",
        }
    }
}

impl fmt::Display for ConsumptionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConsumptionSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(ConsumptionSource::Admin),
            "subscription" => Ok(ConsumptionSource::Subscription),
            "free" => Ok(ConsumptionSource::Free),
            "ticket" => Ok(ConsumptionSource::Ticket),
            other => Err(format!("unknown consumption source: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Canceled,
    Incomplete,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::Incomplete => "incomplete",
        }
    }
}

impl FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SubscriptionStatus::Active),
            "trialing" => Ok(SubscriptionStatus::Trialing),
            "past_due" => Ok(SubscriptionStatus::PastDue),
            "canceled" => Ok(SubscriptionStatus::Canceled),
            "incomplete" => Ok(SubscriptionStatus::Incomplete),
            other => Err(format!("unknown subscription status: {other}")),
        }
    }
}

/// Continuous, periodically-resetting entitlement tied to a billing plan.
///
/// Written only by the billing collaborator. The accounting period is the
/// half-open range `[current_period_start, current_period_end)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub actor_id: String,
    pub status: SubscriptionStatus,
    pub plan_code: String,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Subscription {
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.status == SubscriptionStatus::Active && self.current_period_end > now
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantStatus {
    Active,
    Revoked,
}

impl GrantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantStatus::Active => "active",
            GrantStatus::Revoked => "revoked",
        }
    }
}

impl FromStr for GrantStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(GrantStatus::Active),
            "revoked" => Ok(GrantStatus::Revoked),
            other => Err(format!("unknown grant status: {other}")),
        }
    }
}

/// Discrete, depletable, time-boxed entitlement ("ticket").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub id: String,
    pub actor_id: String,
    pub quota_type: QuotaType,
    pub remaining_count: u32,
    pub valid_until: DateTime<Utc>,
    pub status: GrantStatus,
    pub created_at: DateTime<Utc>,
}

impl Grant {
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.status == GrantStatus::Active && self.remaining_count > 0 && self.valid_until > now
    }
}

/// One row of the append-only consumption ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: String,
    pub actor_id: String,
    pub quota_type: QuotaType,
    pub source: ConsumptionSource,
    pub occurred_at: DateTime<Utc>,
}

impl UsageRecord {
    pub fn new(
        actor_id: &str,
        quota_type: QuotaType,
        source: ConsumptionSource,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            actor_id: actor_id.to_string(),
            quota_type,
            source,
            occurred_at,
        }
    }
}

/// Kind of gated action tracked by the rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    CreatePlan,
    RegeneratePlan,
    TravelInfo,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::CreatePlan => "create_plan",
            ActionKind::RegeneratePlan => "regenerate_plan",
            ActionKind::TravelInfo => "travel_info",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create_plan" => Ok(ActionKind::CreatePlan),
            "regenerate_plan" => Ok(ActionKind::RegeneratePlan),
            "travel_info" => Ok(ActionKind::TravelInfo),
            other => Err(format!("unknown action: {other}")),
        }
    }
}

/// Read access to subscriptions and grants, plus the one permitted mutation.
///
/// Implementations must not swallow storage failures: the consumer alone
/// decides whether a failed read fails open.
#[async_trait]
pub trait EntitlementStore: Send + Sync + 'static {
    /// The most recently created `active` subscription for `actor_id`, if any.
    /// Period expiry is checked by the caller.
    async fn active_subscription(
        &self,
        actor_id: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<Subscription>>;

    /// Grants of `quota_type` that are active, non-empty and unexpired at `now`.
    async fn usable_grants(
        &self,
        actor_id: &str,
        quota_type: QuotaType,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Grant>>;

    /// Decrement `remaining_count` by one iff it is still positive.
    ///
    /// Must be a single conditional update at the storage layer. Returns
    /// `false` when no row was affected (the grant was drained by a racing
    /// caller, expired, or revoked).
    async fn decrement_grant(&self, grant_id: &str, now: DateTime<Utc>) -> anyhow::Result<bool>;
}

/// Append-only consumption log.
#[async_trait]
pub trait UsageLedger: Send + Sync + 'static {
    /// Records charged to `source` for the pair with `occurred_at >= since`.
    /// The consumer asks for `Subscription` or `Free`, never mixing the two.
    async fn count_since(
        &self,
        actor_id: &str,
        quota_type: QuotaType,
        source: ConsumptionSource,
        since: DateTime<Utc>,
    ) -> anyhow::Result<u64>;

    async fn append(&self, record: &UsageRecord) -> anyhow::Result<()>;
}

/// Storage behind the rate limiter.
#[async_trait]
pub trait ActivityLog: Send + Sync + 'static {
    /// Record `action` at `at` iff fewer than `max_actions` rows for the pair
    /// are newer than `since`. Returns whether the row was recorded.
    ///
    /// Count and insert must be one atomic step: concurrent callers may never
    /// both observe `max_actions - 1`.
    async fn record_if_under(
        &self,
        actor_id: &str,
        action: ActionKind,
        since: DateTime<Utc>,
        max_actions: u64,
        at: DateTime<Utc>,
    ) -> anyhow::Result<bool>;

    /// Remove one row recorded at `at` for the pair. Used when an admitted
    /// action is not carried out after all.
    async fn release_action(
        &self,
        actor_id: &str,
        action: ActionKind,
        at: DateTime<Utc>,
    ) -> anyhow::Result<()>;

    /// Last-modified timestamp of a gated resource (e.g. a saved plan).
    async fn resource_last_modified(
        &self,
        resource_id: &str,
    ) -> anyhow::Result<Option<DateTime<Utc>>>;
}
