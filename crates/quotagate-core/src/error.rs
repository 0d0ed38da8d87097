use thiserror::Error;

use crate::entitlement::{ConsumptionSource, QuotaType};

/// Hard failures of an admission check.
///
/// Soft denials (rate limit, quota exhaustion) are returned as
/// [`Decision`](crate::decision::Decision) values, not errors.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("unauthenticated")]
    Unauthenticated,

    /// A debit or ledger insert failed after the request had been admitted.
    /// The request must not proceed: its consumption was not recorded.
    #[error("failed to commit {source_kind} consumption of {quota_type} for {actor_id}: {cause}")]
    CommitFailure {
        actor_id: String,
        quota_type: QuotaType,
        source_kind: ConsumptionSource,
        cause: anyhow::Error,
    },

    /// Display queries do not fail open.
    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}
