use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};

use crate::{auth::resolve_actor, error::AppError, state::AppState};

/// `POST /api/resources/{id}/update-check`: minimum-interval check for
/// update paths that consume no quota (autosave).
pub async fn update_check(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(resource_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let actor = resolve_actor(&headers, &state.jwt_secret);
    let decision = state.gate.check_update(actor.as_ref(), &resource_id).await?;
    match AppError::from_denial(&decision) {
        Some(err) => Err(err),
        None => Ok(Json(decision)),
    }
}
