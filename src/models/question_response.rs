use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// One Likert (1-5) answer to one catalog question for one student/cycle.
///
/// `academic_year` is never computed from this record's own dates — it is
/// always inherited from the paired `VespaScore` by the Classifier.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct QuestionResponse {
    pub id: i64,
    pub student_id: i64,
    pub cycle: i16,
    pub question_id: String,
    pub response_value: i16,
    pub academic_year: String,
}
