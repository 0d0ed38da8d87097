//! Decide which entitlement source pays for a request and debit it.
//!
//! Sources are spent earliest-expiry-first: a grant that lapses before the
//! subscription period ends is consumed before subscription quota. Ties go
//! to the subscription. Actors without a usable subscription draw on the
//! free tier instead, whose period is the current UTC calendar month.

use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::{Allowance, QuotaConfig};
use crate::decision::{Decision, DenyReason, UsageStatus};
use crate::entitlement::{
    Actor, ConsumptionSource, EntitlementStore, Grant, QuotaType, UsageLedger, UsageRecord,
};
use crate::error::GateError;

/// Maximum number of source selections per call: the first pick plus one
/// retry after losing a grant race.
const MAX_SELECTIONS: usize = 2;

/// A ledger-backed source with room left in its current period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodQuota {
    /// `Subscription` or `Free`.
    pub source: ConsumptionSource,
    pub ends_at: DateTime<Utc>,
}

/// What storage says the actor can spend right now.
#[derive(Debug, Clone, Default)]
pub struct Candidates {
    pub period: Option<PeriodQuota>,
    pub grants: Vec<Grant>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Choice {
    /// Append a ledger record charged to this source.
    Period(ConsumptionSource),
    Ticket(Grant),
}

/// Bounds of the UTC calendar month containing `now`.
pub fn calendar_month(now: DateTime<Utc>) -> anyhow::Result<(DateTime<Utc>, DateTime<Utc>)> {
    let (year, month) = (now.year(), now.month());
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    let start = NaiveDate::from_ymd_opt(year, month, 1).and_then(|d| d.and_hms_opt(0, 0, 0));
    let end = NaiveDate::from_ymd_opt(next_year, next_month, 1).and_then(|d| d.and_hms_opt(0, 0, 0));
    match (start, end) {
        (Some(start), Some(end)) => Ok((start.and_utc(), end.and_utc())),
        _ => anyhow::bail!("no calendar month around {now}"),
    }
}

/// Pick the source to debit, ignoring the grant named in `excluded`.
pub fn select_source(candidates: &Candidates, excluded: Option<&str>) -> Option<Choice> {
    let best_grant = candidates
        .grants
        .iter()
        .filter(|g| Some(g.id.as_str()) != excluded)
        .min_by(|a, b| {
            a.valid_until
                .cmp(&b.valid_until)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });

    match (candidates.period, best_grant) {
        (None, None) => None,
        (Some(period), None) => Some(Choice::Period(period.source)),
        (None, Some(grant)) => Some(Choice::Ticket(grant.clone())),
        (Some(period), Some(grant)) => {
            if grant.valid_until < period.ends_at {
                Some(Choice::Ticket(grant.clone()))
            } else {
                Some(Choice::Period(period.source))
            }
        }
    }
}

pub struct QuotaConsumer {
    config: Arc<QuotaConfig>,
    entitlements: Arc<dyn EntitlementStore>,
    ledger: Arc<dyn UsageLedger>,
    clock: Arc<dyn Clock>,
}

impl QuotaConsumer {
    pub fn new(
        config: Arc<QuotaConfig>,
        entitlements: Arc<dyn EntitlementStore>,
        ledger: Arc<dyn UsageLedger>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            entitlements,
            ledger,
            clock,
        }
    }

    pub fn config(&self) -> &QuotaConfig {
        &self.config
    }

    /// Decide whether `actor` may consume one unit of `quota_type` and, if so,
    /// debit the chosen source.
    ///
    /// Read failures fail open with a degraded allow. Commit failures are
    /// returned as [`GateError::CommitFailure`].
    pub async fn check_and_consume(
        &self,
        actor: &Actor,
        quota_type: QuotaType,
    ) -> Result<Decision, GateError> {
        if self.config.is_admin(actor) {
            debug!(actor_id = %actor.id, %quota_type, "admin bypass");
            return Ok(Decision::allow(ConsumptionSource::Admin));
        }

        let mut lost_grant: Option<String> = None;
        for attempt in 0..MAX_SELECTIONS {
            let now = self.clock.now();
            let candidates = match self.load_candidates(&actor.id, quota_type, now).await {
                Ok(candidates) => candidates,
                Err(e) => {
                    warn!(
                        actor_id = %actor.id,
                        %quota_type,
                        degraded = true,
                        error = %e,
                        "Entitlement read failed, admitting without consumption"
                    );
                    return Ok(Decision::allow_degraded());
                }
            };

            match select_source(&candidates, lost_grant.as_deref()) {
                None => {
                    info!(actor_id = %actor.id, %quota_type, "Quota exceeded");
                    return Ok(Decision::deny(DenyReason::QuotaExceeded));
                }
                Some(Choice::Period(source)) => {
                    let record = UsageRecord::new(&actor.id, quota_type, source, now);
                    self.ledger
                        .append(&record)
                        .await
                        .map_err(|cause| self.commit_failure(actor, quota_type, source, cause))?;
                    debug!(actor_id = %actor.id, %quota_type, %source, "Consumed period quota");
                    return Ok(Decision::allow(source));
                }
                Some(Choice::Ticket(grant)) => {
                    let debited = self
                        .entitlements
                        .decrement_grant(&grant.id, now)
                        .await
                        .map_err(|cause| {
                            self.commit_failure(actor, quota_type, ConsumptionSource::Ticket, cause)
                        })?;
                    if debited {
                        debug!(
                            actor_id = %actor.id,
                            %quota_type,
                            grant_id = %grant.id,
                            "Consumed ticket"
                        );
                        return Ok(Decision::allow(ConsumptionSource::Ticket));
                    }
                    debug!(
                        actor_id = %actor.id,
                        grant_id = %grant.id,
                        attempt,
                        "Lost race for grant, reselecting"
                    );
                    lost_grant = Some(grant.id);
                }
            }
        }

        warn!(actor_id = %actor.id, %quota_type, "Grant contention persisted after retry");
        Ok(Decision::deny(DenyReason::Contention))
    }

    /// Current allowance, usage and ticket balance for display.
    pub async fn usage_status(
        &self,
        actor: &Actor,
        quota_type: QuotaType,
    ) -> Result<UsageStatus, GateError> {
        if self.config.is_admin(actor) {
            return Ok(UsageStatus {
                quota_type,
                plan_code: None,
                allowance: None,
                used: 0,
                remaining: None,
                resets_at: None,
                ticket_count: 0,
            });
        }

        let now = self.clock.now();
        let (subscription, grants) = tokio::join!(
            self.entitlements.active_subscription(&actor.id, now),
            self.entitlements.usable_grants(&actor.id, quota_type, now),
        );
        let ticket_count = grants?
            .iter()
            .filter(|g| g.is_usable(now))
            .map(|g| u64::from(g.remaining_count))
            .sum();

        let Some(subscription) = subscription?.filter(|s| s.is_usable(now)) else {
            let allowance = self.config.free_allowance(quota_type);
            if allowance == Allowance::Limited(0) {
                return Ok(UsageStatus {
                    quota_type,
                    plan_code: None,
                    allowance: Some(0),
                    used: 0,
                    remaining: Some(0),
                    resets_at: None,
                    ticket_count,
                });
            }
            let (month_start, month_end) = calendar_month(now)?;
            let used = self
                .ledger
                .count_since(&actor.id, quota_type, ConsumptionSource::Free, month_start)
                .await?;
            let allowance = allowance.limit();
            return Ok(UsageStatus {
                quota_type,
                plan_code: None,
                allowance,
                used,
                remaining: allowance.map(|limit| u64::from(limit).saturating_sub(used)),
                resets_at: Some(month_end),
                ticket_count,
            });
        };

        let allowance = self
            .config
            .allowance_for(&subscription.plan_code, quota_type)
            .limit();
        let used = self
            .ledger
            .count_since(
                &actor.id,
                quota_type,
                ConsumptionSource::Subscription,
                subscription.current_period_start,
            )
            .await?;

        Ok(UsageStatus {
            quota_type,
            plan_code: Some(subscription.plan_code),
            allowance,
            used,
            remaining: allowance.map(|limit| u64::from(limit).saturating_sub(used)),
            resets_at: Some(subscription.current_period_end),
            ticket_count,
        })
    }

    async fn load_candidates(
        &self,
        actor_id: &str,
        quota_type: QuotaType,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Candidates> {
        let (subscription, grants) = tokio::join!(
            self.entitlements.active_subscription(actor_id, now),
            self.entitlements.usable_grants(actor_id, quota_type, now),
        );
        let grants: Vec<Grant> = grants?.into_iter().filter(|g| g.is_usable(now)).collect();

        let period = match subscription?.filter(|s| s.is_usable(now)) {
            Some(sub) => {
                let allowance = self.config.allowance_for(&sub.plan_code, quota_type);
                let period = PeriodQuota {
                    source: ConsumptionSource::Subscription,
                    ends_at: sub.current_period_end,
                };
                self.with_room(actor_id, quota_type, period, allowance, sub.current_period_start)
                    .await?
            }
            None => {
                let allowance = self.config.free_allowance(quota_type);
                let (month_start, month_end) = calendar_month(now)?;
                let period = PeriodQuota {
                    source: ConsumptionSource::Free,
                    ends_at: month_end,
                };
                self.with_room(actor_id, quota_type, period, allowance, month_start)
                    .await?
            }
        };

        Ok(Candidates { period, grants })
    }

    /// `period` if its ledger count since `starts_at` is under `allowance`.
    async fn with_room(
        &self,
        actor_id: &str,
        quota_type: QuotaType,
        period: PeriodQuota,
        allowance: Allowance,
        starts_at: DateTime<Utc>,
    ) -> anyhow::Result<Option<PeriodQuota>> {
        let has_room = match allowance {
            Allowance::Unlimited => true,
            Allowance::Limited(0) => false,
            Allowance::Limited(limit) => {
                let used = self
                    .ledger
                    .count_since(actor_id, quota_type, period.source, starts_at)
                    .await?;
                used < u64::from(limit)
            }
        };
        Ok(has_room.then_some(period))
    }

    fn commit_failure(
        &self,
        actor: &Actor,
        quota_type: QuotaType,
        source_kind: ConsumptionSource,
        cause: anyhow::Error,
    ) -> GateError {
        error!(
            actor_id = %actor.id,
            %quota_type,
            source = %source_kind,
            error = %cause,
            "Failed to commit consumption"
        );
        GateError::CommitFailure {
            actor_id: actor.id.clone(),
            quota_type,
            source_kind,
            cause,
        }
    }
}
