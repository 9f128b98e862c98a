use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use crate::utils::ApiError;

/// Guards the manual refresh endpoint (spec.md §4.6, §6.3 "bearer-token
/// middleware"). Deliberately simpler than a full JWT/Casbin stack: there is
/// one caller (an operator or a scheduler) and one static shared secret.
#[derive(Clone)]
pub struct AuthState {
    pub bearer_token: String,
}

pub async fn auth_middleware(
    State(state): State<AuthState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let header_value = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ApiError::unauthorized("Missing authorization header"))?;

    let token = header_value
        .strip_prefix("Bearer ")
        .ok_or_else(|| ApiError::unauthorized("Invalid authorization header format"))?;

    if token != state.bearer_token {
        tracing::warn!("Rejected refresh request with invalid bearer token");
        return Err(ApiError::unauthorized("Invalid bearer token"));
    }

    Ok(next.run(req).await)
}
