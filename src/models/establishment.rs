use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Whether an establishment has opted into the UK-style academic year
/// (August-to-July). Newer field on the source CRM; many establishments
/// have never set it. Per the documented policy (spec.md §9), unset is
/// treated the same as `Yes` — not silently "fixed" to something else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum UseStandardYear {
    Yes,
    No,
    Unset,
}

impl Default for UseStandardYear {
    fn default() -> Self {
        Self::Unset
    }
}

impl UseStandardYear {
    pub fn from_source_str(s: Option<&str>) -> Self {
        match s.map(|s| s.trim().to_lowercase()) {
            Some(ref s) if s == "yes" || s == "true" => Self::Yes,
            Some(ref s) if s == "no" || s == "false" => Self::No,
            _ => Self::Unset,
        }
    }

    fn as_column_str(&self) -> &'static str {
        match self {
            Self::Yes => "yes",
            Self::No => "no",
            Self::Unset => "unset",
        }
    }
}

// Stored as a plain TEXT column (`'yes' | 'no' | 'unset'`); this keeps the
// warehouse schema readable in a `SELECT *` without a Postgres enum type.
impl sqlx::Type<sqlx::Postgres> for UseStandardYear {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <String as sqlx::Type<sqlx::Postgres>>::type_info()
    }
}

impl sqlx::Encode<'_, sqlx::Postgres> for UseStandardYear {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode_by_ref(&self.as_column_str(), buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for UseStandardYear {
    fn decode(
        value: sqlx::postgres::PgValueRef<'r>,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let s = <String as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        Ok(Self::from_source_str(Some(&s)))
    }
}

/// An organization running VESPA assessments.
///
/// Created once on first sight and rarely updated; the pipeline never
/// deletes establishment rows.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct Establishment {
    pub id: i64,
    pub external_id: String,
    pub name: String,
    pub trust: Option<String>,
    pub is_australian: bool,
    pub use_standard_year: UseStandardYear,
}
