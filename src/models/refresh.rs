use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct RefreshRequest {
    #[validate(length(min = 1, message = "establishment_external_id must not be empty"))]
    pub establishment_external_id: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RefreshResponse {
    pub establishment_external_id: String,
    pub students_synced: u64,
    pub vespa_synced: u64,
    pub responses_synced: u64,
    pub duration_seconds: f64,
    pub errors: Vec<String>,
}
