use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};

use quotagate_core::entitlement::QuotaType;

use crate::{auth::resolve_actor, error::AppError, state::AppState};

/// `GET /api/usage/{quota_type}`: remaining allowance and tickets for display.
pub async fn usage_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(quota_type): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let actor = resolve_actor(&headers, &state.jwt_secret);
    let quota_type: QuotaType = quota_type.parse().map_err(AppError::BadRequest)?;
    let status = state.gate.usage_status(actor.as_ref(), quota_type).await?;
    Ok(Json(status))
}
