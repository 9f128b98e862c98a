use axum::{Json, extract::State};
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::AppState;
use crate::utils::ApiResult;

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub warehouse_reachable: bool,
}

/// Liveness/readiness probe (SPEC_FULL.md ambient supplements).
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service health", body = HealthResponse)),
    tag = "Health"
)]
pub async fn health(State(state): State<Arc<AppState>>) -> ApiResult<Json<HealthResponse>> {
    let warehouse_reachable = sqlx::query("SELECT 1").execute(&state.db).await.is_ok();

    Ok(Json(HealthResponse {
        status: if warehouse_reachable { "ok" } else { "degraded" }.to_string(),
        warehouse_reachable,
    }))
}
