use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Value};

use quotagate_core::{config::Config, entitlement::QuotaType};

use crate::state::AppState;

/// Rate-limit and quota settings the gate is running with.
fn gate_summary(config: &Config) -> Value {
    let free_allowances: serde_json::Map<String, Value> = QuotaType::ALL
        .into_iter()
        .map(|quota_type| {
            let limit = config.quota.free_allowance(quota_type).limit();
            (quota_type.as_str().to_string(), json!(limit))
        })
        .collect();
    json!({
        "rate_limit_disabled": config.rate_limit.disabled,
        "max_actions": config.rate_limit.max_actions,
        "window_secs": config.rate_limit.window.as_secs(),
        "admins": config.quota.admins.len(),
        "free_allowances": free_allowances,
    })
}

/// `GET /health`: liveness check plus the active gate settings.
///
/// `200 OK` when DuckDB answers, `503 Service Unavailable` otherwise. A
/// `null` free allowance means unlimited.
///
/// ```json
/// { "status": "ok", "version": "0.1.0",
///   "gate": { "rate_limit_disabled": false, "max_actions": 5, "window_secs": 60,
///             "admins": 1, "free_allowances": { "plan_generation": 0, "travel_info": 0 } } }
/// ```
#[tracing::instrument(skip(state))]
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let gate = gate_summary(&state.config);
    match state.db.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "version": env!("CARGO_PKG_VERSION"),
                "gate": gate,
            })),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Health check: DuckDB unreachable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "degraded",
                    "version": env!("CARGO_PKG_VERSION"),
                    "gate": gate,
                })),
            )
                .into_response()
        }
    }
}
