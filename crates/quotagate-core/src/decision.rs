use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entitlement::{ConsumptionSource, QuotaType};

/// Why a request was softly denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    RateLimited,
    QuotaExceeded,
    /// Lost the race for a grant twice in a row.
    Contention,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::RateLimited => "rate_limited",
            DenyReason::QuotaExceeded => "quota_exceeded",
            DenyReason::Contention => "contention",
        }
    }
}

/// Outcome of an admission check. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<ConsumptionSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<DenyReason>,
    /// Set when the decision defaulted to allow because storage could not be read.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub degraded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl Decision {
    pub fn allow(source: ConsumptionSource) -> Self {
        Self {
            allowed: true,
            source: Some(source),
            reason: None,
            degraded: false,
            retry_after_secs: None,
        }
    }

    /// Allow that charged nothing, e.g. a standalone rate check.
    pub fn pass() -> Self {
        Self {
            source: None,
            ..Self::allow(ConsumptionSource::Subscription)
        }
    }

    /// Fail-open allow issued while the entitlement store is unavailable.
    pub fn allow_degraded() -> Self {
        Self {
            degraded: true,
            ..Self::allow(ConsumptionSource::Subscription)
        }
    }

    pub fn deny(reason: DenyReason) -> Self {
        Self {
            allowed: false,
            source: None,
            reason: Some(reason),
            degraded: false,
            retry_after_secs: None,
        }
    }

    pub fn rate_limited(retry_after_secs: u64) -> Self {
        Self {
            retry_after_secs: Some(retry_after_secs),
            ..Self::deny(DenyReason::RateLimited)
        }
    }
}

/// Display-only snapshot of an actor's remaining entitlements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageStatus {
    pub quota_type: QuotaType,
    pub plan_code: Option<String>,
    /// `None` means unlimited.
    pub allowance: Option<u32>,
    pub used: u64,
    /// Subscription units left this period; `None` means unlimited.
    pub remaining: Option<u64>,
    pub resets_at: Option<DateTime<Utc>>,
    /// Units left across all usable grants.
    pub ticket_count: u64,
}
