use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Unified error type for the sync engine and the Refresh API.
///
/// Variants map onto the error taxonomy from the design: fatal configuration
/// errors abort the run, transient I/O errors are retried upstream before
/// reaching here, and `DataError`/`Invariant` describe the per-record and
/// post-hoc checks that the orchestrator downgrades to a skip-and-count
/// rather than a failed run.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("transient I/O error: {0}")]
    Transient(String),

    #[error("data error: {0}")]
    DataError(String),

    #[error("invariant violation: {0}")]
    Invariant(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn data_error(msg: impl Into<String>) -> Self {
        Self::DataError(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::Invariant(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn validation_error(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn internal_error(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether a failure at this step should still allow the orchestrator to
    /// proceed to later steps (their preconditions permitting) and mark the
    /// run `partial`, versus aborting the whole run as `failed`.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::Unauthorized(_))
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self {
            Self::Configuration(_) => (StatusCode::INTERNAL_SERVER_ERROR, "configuration_error"),
            Self::Transient(_) => (StatusCode::SERVICE_UNAVAILABLE, "transient_error"),
            Self::DataError(_) => (StatusCode::UNPROCESSABLE_ENTITY, "data_error"),
            Self::Invariant(_) => (StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation"),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            Self::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            Self::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            Self::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
            Self::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
            Self::Http(_) => (StatusCode::BAD_GATEWAY, "upstream_error"),
            Self::Serialization(_) => (StatusCode::INTERNAL_SERVER_ERROR, "serialization_error"),
            Self::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "io_error"),
        };

        if status.is_server_error() {
            tracing::error!("{}: {}", kind, self);
        } else {
            tracing::warn!("{}: {}", kind, self);
        }

        (status, Json(ErrorBody { error: kind.to_string(), message: self.to_string() })).into_response()
    }
}
