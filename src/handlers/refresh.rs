use axum::{Json, extract::State};
use std::sync::Arc;
use std::time::Instant;
use validator::Validate;

use crate::AppState;
use crate::models::{RefreshRequest, RefreshResponse};
use crate::utils::ApiResult;

/// Trigger a bounded sync for a single establishment (spec.md §4.6).
///
/// Returns `409 Conflict` (via `ApiError::conflict`) if a refresh is already
/// running for this establishment.
#[utoipa::path(
    post,
    path = "/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Refresh completed", body = RefreshResponse),
        (status = 409, description = "Refresh already in progress for this establishment"),
        (status = 401, description = "Missing or invalid bearer token")
    ),
    security(("bearer_auth" = [])),
    tag = "Refresh"
)]
pub async fn refresh(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RefreshRequest>,
) -> ApiResult<Json<RefreshResponse>> {
    req.validate().map_err(|e| crate::utils::ApiError::validation_error(e.to_string()))?;

    let started = Instant::now();
    let outcome = state.refresh_service.refresh(&req.establishment_external_id).await?;

    Ok(Json(RefreshResponse {
        establishment_external_id: req.establishment_external_id,
        students_synced: outcome.students_synced,
        vespa_synced: outcome.vespa_synced,
        responses_synced: outcome.responses_synced,
        duration_seconds: started.elapsed().as_secs_f64(),
        errors: outcome.errors,
    }))
}
