use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// One student's enrollment for a single academic year.
///
/// `(email, academic_year)` is the warehouse identity: the same person
/// shows up as a distinct row in every year they're assessed, by design —
/// see the Linker's matching policy.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct Student {
    pub id: i64,
    pub external_id: String,
    pub email: String,
    pub academic_year: String,
    pub name: String,
    pub establishment_id: i64,
    pub year_group: Option<String>,
    pub course: Option<String>,
    pub faculty: Option<String>,
    pub student_group: Option<String>,
}
