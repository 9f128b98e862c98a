use crate::models::vespa_score::VespaElement;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;

/// A catalog psychometric item. Seeded once by a migration; read-only to
/// the pipeline itself (the Extractor never writes `questions` rows).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct Question {
    pub id: i64,
    pub question_id: String,
    pub text: String,
    pub vespa_category: VespaElement,
    /// Per-cycle source-system field identifier, e.g. `{"1": "field_123", "2": "field_456"}`.
    #[sqlx(json)]
    pub cycle_field_map: HashMap<String, String>,
}
