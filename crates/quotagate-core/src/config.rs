use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::entitlement::{Actor, QuotaType};

/// Per-period allowance for subscription or free-tier consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Allowance {
    Limited(u32),
    Unlimited,
}

impl Allowance {
    pub fn limit(&self) -> Option<u32> {
        match self {
            Allowance::Limited(n) => Some(*n),
            Allowance::Unlimited => None,
        }
    }

    fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("unlimited") || raw == "-1" {
            return Ok(Allowance::Unlimited);
        }
        raw.parse::<u32>()
            .map(Allowance::Limited)
            .map_err(|e| format!("invalid allowance {raw:?}: {e}"))
    }
}

/// Admin allowlist and allowances, handed to the consumer explicitly.
#[derive(Debug, Clone, PartialEq)]
pub struct QuotaConfig {
    /// Lower-cased actor ids or emails that bypass every check.
    pub admins: HashSet<String>,
    pub default_allowances: HashMap<QuotaType, Allowance>,
    /// Keyed by plan code; entries override `default_allowances`.
    pub plan_allowances: HashMap<String, HashMap<QuotaType, Allowance>>,
    /// Per calendar month (UTC) for actors without a usable subscription.
    pub free_allowances: HashMap<QuotaType, Allowance>,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            admins: HashSet::new(),
            default_allowances: QuotaType::ALL
                .into_iter()
                .map(|q| (q, Allowance::Limited(30)))
                .collect(),
            plan_allowances: HashMap::new(),
            free_allowances: QuotaType::ALL
                .into_iter()
                .map(|q| (q, Allowance::Limited(0)))
                .collect(),
        }
    }
}

impl QuotaConfig {
    pub fn with_admin(mut self, id_or_email: &str) -> Self {
        self.admins.insert(id_or_email.trim().to_lowercase());
        self
    }

    pub fn with_allowance(mut self, quota_type: QuotaType, allowance: Allowance) -> Self {
        self.default_allowances.insert(quota_type, allowance);
        self
    }

    pub fn with_plan_allowance(
        mut self,
        plan_code: &str,
        quota_type: QuotaType,
        allowance: Allowance,
    ) -> Self {
        self.plan_allowances
            .entry(plan_code.to_string())
            .or_default()
            .insert(quota_type, allowance);
        self
    }

    pub fn with_free_allowance(mut self, quota_type: QuotaType, allowance: Allowance) -> Self {
        self.free_allowances.insert(quota_type, allowance);
        self
    }

    pub fn is_admin(&self, actor: &Actor) -> bool {
        if self.admins.contains(&actor.id.to_lowercase()) {
            return true;
        }
        actor
            .email
            .as_deref()
            .is_some_and(|email| self.admins.contains(&email.to_lowercase()))
    }

    /// Allowance for `quota_type` under `plan_code`. Unknown quota types with
    /// no configured default get nothing.
    pub fn allowance_for(&self, plan_code: &str, quota_type: QuotaType) -> Allowance {
        self.plan_allowances
            .get(plan_code)
            .and_then(|per_plan| per_plan.get(&quota_type))
            .or_else(|| self.default_allowances.get(&quota_type))
            .copied()
            .unwrap_or(Allowance::Limited(0))
    }

    pub fn free_allowance(&self, quota_type: QuotaType) -> Allowance {
        self.free_allowances
            .get(&quota_type)
            .copied()
            .unwrap_or(Allowance::Limited(0))
    }

    /// Parse `plan:quota_type=allowance` entries separated by commas.
    pub fn parse_plan_allowances(
        raw: &str,
    ) -> Result<HashMap<String, HashMap<QuotaType, Allowance>>, String> {
        let mut out: HashMap<String, HashMap<QuotaType, Allowance>> = HashMap::new();
        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (key, value) = entry
                .split_once('=')
                .ok_or_else(|| format!("plan allowance {entry:?} is missing '='"))?;
            let (plan, quota) = key
                .split_once(':')
                .ok_or_else(|| format!("plan allowance {entry:?} is missing ':'"))?;
            let quota_type = quota.trim().parse::<QuotaType>()?;
            out.entry(plan.trim().to_string())
                .or_default()
                .insert(quota_type, Allowance::parse(value)?);
        }
        Ok(out)
    }
}

/// Sliding-window limits enforced before any quota is consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub max_actions: u64,
    pub window: Duration,
    pub min_update_interval: Duration,
    pub disabled: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_actions: 5,
            window: Duration::from_secs(60),
            min_update_interval: Duration::from_secs(3),
            disabled: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub data_dir: String,
    pub duckdb_memory_limit: String,
    /// When unset, a secret is generated and persisted in the `settings` table.
    pub jwt_secret: Option<String>,
    pub quota: QuotaConfig,
    pub rate_limit: RateLimitConfig,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_secs(key: &str, default: u64) -> Result<Duration, String> {
    env_or(key, &default.to_string())
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|e| format!("invalid {key}: {e}"))
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let mut quota = QuotaConfig::default();
        if let Ok(raw) = std::env::var("QUOTAGATE_ADMINS") {
            for admin in raw.split(',').map(str::trim).filter(|a| !a.is_empty()) {
                quota = quota.with_admin(admin);
            }
        }
        if let Ok(raw) = std::env::var("QUOTAGATE_PLAN_GENERATION_ALLOWANCE") {
            quota = quota.with_allowance(QuotaType::PlanGeneration, Allowance::parse(&raw)?);
        }
        if let Ok(raw) = std::env::var("QUOTAGATE_TRAVEL_INFO_ALLOWANCE") {
            quota = quota.with_allowance(QuotaType::TravelInfo, Allowance::parse(&raw)?);
        }
        if let Ok(raw) = std::env::var("QUOTAGATE_FREE_PLAN_GENERATION_ALLOWANCE") {
            quota = quota.with_free_allowance(QuotaType::PlanGeneration, Allowance::parse(&raw)?);
        }
        if let Ok(raw) = std::env::var("QUOTAGATE_FREE_TRAVEL_INFO_ALLOWANCE") {
            quota = quota.with_free_allowance(QuotaType::TravelInfo, Allowance::parse(&raw)?);
        }
        if let Ok(raw) = std::env::var("QUOTAGATE_PLAN_ALLOWANCES") {
            quota.plan_allowances = QuotaConfig::parse_plan_allowances(&raw)?;
        }

        let rate_limit = RateLimitConfig {
            max_actions: env_or("QUOTAGATE_RATE_MAX_ACTIONS", "5")
                .parse()
                .map_err(|e| format!("invalid QUOTAGATE_RATE_MAX_ACTIONS: {e}"))?,
            window: parse_secs("QUOTAGATE_RATE_WINDOW_SECS", 60)?,
            min_update_interval: parse_secs("QUOTAGATE_MIN_UPDATE_INTERVAL_SECS", 3)?,
            disabled: std::env::var("QUOTAGATE_RATE_LIMIT_DISABLE")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        };

        Ok(Self {
            port: env_or("QUOTAGATE_PORT", "3000")
                .parse()
                .map_err(|e| format!("invalid port: {e}"))?,
            data_dir: env_or("QUOTAGATE_DATA_DIR", "./data"),
            duckdb_memory_limit: env_or("QUOTAGATE_DUCKDB_MEMORY", "1GB"),
            jwt_secret: std::env::var("QUOTAGATE_JWT_SECRET")
                .ok()
                .filter(|s| !s.is_empty()),
            quota,
            rate_limit,
        })
    }
}
