use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// What triggered the run — drives which orchestrator steps execute and
/// what scope the Aggregator touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SyncRunType {
    Full,
    Refresh,
}

impl SyncRunType {
    fn as_column_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Refresh => "refresh",
        }
    }

    fn from_column_str(s: &str) -> Option<Self> {
        match s {
            "full" => Some(Self::Full),
            "refresh" => Some(Self::Refresh),
            _ => None,
        }
    }
}

impl sqlx::Type<sqlx::Postgres> for SyncRunType {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <String as sqlx::Type<sqlx::Postgres>>::type_info()
    }
}

impl sqlx::Encode<'_, sqlx::Postgres> for SyncRunType {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode_by_ref(&self.as_column_str(), buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for SyncRunType {
    fn decode(
        value: sqlx::postgres::PgValueRef<'r>,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let s = <String as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        Self::from_column_str(&s).ok_or_else(|| format!("unknown sync run type {s:?}").into())
    }
}

/// Lifecycle of one pipeline invocation. `Started` is the only writable
/// entry state; the orchestrator moves it to exactly one terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SyncRunStatus {
    Started,
    Completed,
    Partial,
    Failed,
}

impl SyncRunStatus {
    fn as_column_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Completed => "completed",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }

    fn from_column_str(s: &str) -> Option<Self> {
        match s {
            "started" => Some(Self::Started),
            "completed" => Some(Self::Completed),
            "partial" => Some(Self::Partial),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Process exit code convention from spec.md §6.3.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Completed => 0,
            Self::Failed => 1,
            Self::Partial => 2,
            Self::Started => unreachable!("a finished run is never left in Started"),
        }
    }
}

impl sqlx::Type<sqlx::Postgres> for SyncRunStatus {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <String as sqlx::Type<sqlx::Postgres>>::type_info()
    }
}

impl sqlx::Encode<'_, sqlx::Postgres> for SyncRunStatus {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode_by_ref(&self.as_column_str(), buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for SyncRunStatus {
    fn decode(
        value: sqlx::postgres::PgValueRef<'r>,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let s = <String as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        Self::from_column_str(&s).ok_or_else(|| format!("unknown sync run status {s:?}").into())
    }
}

/// Per-run counts and a compact error summary, the warehouse-side mirror
/// of the text report written alongside it (`utils::report::RunReport`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct SyncErrorSummary {
    pub responses_no_matching_score: u64,
    pub duplicate_records_in_page: u64,
    pub records_skipped: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct SyncRunRecord {
    pub id: Uuid,
    pub run_type: SyncRunType,
    pub status: SyncRunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub students_synced: i64,
    pub vespa_synced: i64,
    pub responses_synced: i64,
    #[sqlx(json)]
    pub errors_summary: SyncErrorSummary,
}
