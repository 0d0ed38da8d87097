//! Single admission entry point for gated handlers.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::consumer::QuotaConsumer;
use crate::decision::{Decision, UsageStatus};
use crate::entitlement::{ActionKind, Actor, ConsumptionSource, QuotaType};
use crate::error::GateError;
use crate::rate_limit::{ActionAdmission, RateLimiter, RateOutcome};

/// An expensive operation a handler is about to perform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum GatedAction {
    CreatePlan,
    RegeneratePlan { resource_id: String },
    TravelInfo,
}

impl GatedAction {
    pub fn kind(&self) -> ActionKind {
        match self {
            GatedAction::CreatePlan => ActionKind::CreatePlan,
            GatedAction::RegeneratePlan { .. } => ActionKind::RegeneratePlan,
            GatedAction::TravelInfo => ActionKind::TravelInfo,
        }
    }

    pub fn quota_type(&self) -> QuotaType {
        match self {
            GatedAction::CreatePlan | GatedAction::RegeneratePlan { .. } => {
                QuotaType::PlanGeneration
            }
            GatedAction::TravelInfo => QuotaType::TravelInfo,
        }
    }

    /// The resource an update-style action modifies.
    pub fn resource_id(&self) -> Option<&str> {
        match self {
            GatedAction::RegeneratePlan { resource_id } => Some(resource_id),
            _ => None,
        }
    }
}

/// Rate limiter first, quota second.
///
/// Callers invoke [`AccessGate::check_access`] exactly once per attempted
/// operation and skip the work when `allowed` is false. The action slot is
/// taken before quota is consulted and handed back when quota does not allow,
/// so only allowed decisions stay in the activity log.
pub struct AccessGate {
    limiter: RateLimiter,
    consumer: QuotaConsumer,
}

impl AccessGate {
    pub fn new(limiter: RateLimiter, consumer: QuotaConsumer) -> Self {
        Self { limiter, consumer }
    }

    pub async fn check_access(
        &self,
        actor: Option<&Actor>,
        action: &GatedAction,
    ) -> Result<Decision, GateError> {
        let actor = actor.ok_or(GateError::Unauthenticated)?;

        if self.consumer.config().is_admin(actor) {
            debug!(actor_id = %actor.id, action = %action.kind(), "admin bypass");
            return Ok(Decision::allow(ConsumptionSource::Admin));
        }

        if let Some(resource_id) = action.resource_id() {
            if let RateOutcome::Limited { retry_after_secs } =
                self.limiter.check_resource_update(resource_id).await
            {
                return Ok(Decision::rate_limited(retry_after_secs));
            }
        }

        let recorded_at = match self.limiter.admit_action(&actor.id, action.kind()).await {
            ActionAdmission::Limited { retry_after_secs } => {
                return Ok(Decision::rate_limited(retry_after_secs));
            }
            ActionAdmission::Recorded { at } => Some(at),
            ActionAdmission::Unrecorded => None,
        };

        let result = self
            .consumer
            .check_and_consume(actor, action.quota_type())
            .await;

        let allowed = matches!(&result, Ok(decision) if decision.allowed);
        if let (false, Some(at)) = (allowed, recorded_at) {
            self.limiter
                .release_action(&actor.id, action.kind(), at)
                .await;
        }

        let decision = result?;
        info!(
            actor_id = %actor.id,
            action = %action.kind(),
            allowed = decision.allowed,
            source = ?decision.source,
            reason = ?decision.reason,
            degraded = decision.degraded,
            "Access decision"
        );
        Ok(decision)
    }

    /// Per-resource update check on its own, for update paths that do not
    /// consume quota (e.g. autosave).
    pub async fn check_update(
        &self,
        actor: Option<&Actor>,
        resource_id: &str,
    ) -> Result<Decision, GateError> {
        let actor = actor.ok_or(GateError::Unauthenticated)?;
        if self.consumer.config().is_admin(actor) {
            return Ok(Decision::allow(ConsumptionSource::Admin));
        }
        Ok(match self.limiter.check_resource_update(resource_id).await {
            RateOutcome::Allowed => Decision::pass(),
            RateOutcome::Limited { retry_after_secs } => Decision::rate_limited(retry_after_secs),
        })
    }

    pub async fn usage_status(
        &self,
        actor: Option<&Actor>,
        quota_type: QuotaType,
    ) -> Result<UsageStatus, GateError> {
        let actor = actor.ok_or(GateError::Unauthenticated)?;
        self.consumer.usage_status(actor, quota_type).await
    }
}
