use crate::models::vespa_score::VespaElement;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;

/// A histogram over integer score buckets, serialized as JSONB.
///
/// Keys are stringified bucket labels (e.g. `"1"`..`"10"`) rather than a
/// plain array so that zero-count buckets survive a round trip through
/// `serde_json::Value` without needing a fixed-length array type.
pub type Distribution = BTreeMap<String, u64>;

/// Per-establishment, per-cycle, per-year, per-element aggregate.
///
/// Primary key is `(establishment_id, cycle, academic_year, element)`; rows
/// are fully replaced (truncate-then-insert) on every Aggregator run, never
/// patched in place.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct SchoolStatistics {
    pub establishment_id: i64,
    pub cycle: i16,
    pub academic_year: String,
    pub element: VespaElement,
    pub mean: f64,
    pub std_dev: f64,
    pub count: i64,
    pub percentile_25: f64,
    pub percentile_50: f64,
    pub percentile_75: f64,
    #[sqlx(json)]
    pub distribution: Distribution,
}

/// Per-establishment, per-question, per-cycle, per-year aggregate.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct QuestionStatistics {
    pub establishment_id: i64,
    pub question_id: String,
    pub cycle: i16,
    pub academic_year: String,
    pub mean: f64,
    pub std_dev: f64,
    pub count: i64,
    pub mode: i16,
    #[sqlx(json)]
    pub distribution: Distribution,
}

/// Same shape as `SchoolStatistics` but aggregated over every establishment
/// for a `(cycle, academic_year, element)` — computed from the raw
/// per-student population, never by averaging the per-school means.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct NationalStatistics {
    pub cycle: i16,
    pub academic_year: String,
    pub element: VespaElement,
    pub mean: f64,
    pub std_dev: f64,
    pub count: i64,
    pub percentile_25: f64,
    pub percentile_50: f64,
    pub percentile_75: f64,
    #[sqlx(json)]
    pub distribution: Distribution,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct NationalQuestionStatistics {
    pub question_id: String,
    pub cycle: i16,
    pub academic_year: String,
    pub mean: f64,
    pub std_dev: f64,
    pub count: i64,
    pub mode: i16,
    #[sqlx(json)]
    pub distribution: Distribution,
}
