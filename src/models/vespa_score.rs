use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// The six measured elements of a VESPA score, used both as a field
/// discriminator for statistics rows and as a histogram dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum VespaElement {
    Vision,
    Effort,
    Systems,
    Practice,
    Attitude,
    Overall,
}

impl VespaElement {
    pub const ALL: [VespaElement; 6] = [
        Self::Vision,
        Self::Effort,
        Self::Systems,
        Self::Practice,
        Self::Attitude,
        Self::Overall,
    ];

    pub fn as_column_str(&self) -> &'static str {
        match self {
            Self::Vision => "vision",
            Self::Effort => "effort",
            Self::Systems => "systems",
            Self::Practice => "practice",
            Self::Attitude => "attitude",
            Self::Overall => "overall",
        }
    }

    pub fn from_column_str(s: &str) -> Option<Self> {
        match s {
            "vision" => Some(Self::Vision),
            "effort" => Some(Self::Effort),
            "systems" => Some(Self::Systems),
            "practice" => Some(Self::Practice),
            "attitude" => Some(Self::Attitude),
            "overall" => Some(Self::Overall),
            _ => None,
        }
    }
}

impl sqlx::Type<sqlx::Postgres> for VespaElement {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <String as sqlx::Type<sqlx::Postgres>>::type_info()
    }
}

impl sqlx::Encode<'_, sqlx::Postgres> for VespaElement {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode_by_ref(&self.as_column_str(), buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for VespaElement {
    fn decode(
        value: sqlx::postgres::PgValueRef<'r>,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let s = <String as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        Self::from_column_str(&s).ok_or_else(|| format!("unknown vespa element {s:?}").into())
    }
}

/// One assessment occasion's six-component score for one student.
///
/// `(student_id, cycle, academic_year)` is the conflict key the Loader
/// upserts against; it's also what `ClassifyResponse` looks up to inherit
/// a year onto the paired `QuestionResponse` rows.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct VespaScore {
    pub id: i64,
    pub student_id: i64,
    pub cycle: i16,
    pub vision: i16,
    pub effort: i16,
    pub systems: i16,
    pub practice: i16,
    pub attitude: i16,
    /// May carry a fractional value even though the components are integers.
    pub overall: f64,
    pub completion_date: Option<chrono::NaiveDate>,
    pub created_date: Option<chrono::NaiveDate>,
    pub academic_year: String,
}

impl VespaScore {
    pub fn element_value(&self, element: VespaElement) -> f64 {
        match element {
            VespaElement::Vision => self.vision as f64,
            VespaElement::Effort => self.effort as f64,
            VespaElement::Systems => self.systems as f64,
            VespaElement::Practice => self.practice as f64,
            VespaElement::Attitude => self.attitude as f64,
            VespaElement::Overall => self.overall,
        }
    }
}
