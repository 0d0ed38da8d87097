use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};

use quotagate_core::GatedAction;

use crate::{auth::resolve_actor, error::AppError, state::AppState};

/// `POST /api/access/check`: admit (and charge) one gated operation.
///
/// Body: `{"action": "create_plan"}`, `{"action": "travel_info"}` or
/// `{"action": "regenerate_plan", "resource_id": "..."}`.
///
/// Unauthenticated callers get 401 before the body is looked at.
/// Allowed decisions come back as `200` with the decision body, including
/// fail-open ones (`"degraded": true`). Denials map to 429 / 402 / 409.
pub async fn check_access(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<GatedAction>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let actor = resolve_actor(&headers, &state.jwt_secret).ok_or(AppError::Unauthorized)?;
    let Json(action) = body.map_err(|e| AppError::BadRequest(e.body_text()))?;

    let decision = state.gate.check_access(Some(&actor), &action).await?;
    match AppError::from_denial(&decision) {
        Some(err) => Err(err),
        None => Ok(Json(decision)),
    }
}
