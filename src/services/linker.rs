//! Identifier resolution (spec.md §4.3).
//!
//! Built the same way the reference connection-pool manager caches one
//! pool per cluster: a `DashMap` warmed once with a single scan at sync
//! start, extended in place (insert-only) as new rows are created during
//! the run. Lock-free reads under concurrent linker lookups.

use crate::utils::error::ApiResult;
use dashmap::DashMap;
use sqlx::PgPool;

/// `(email, academic_year)` → warehouse student id.
type StudentKey = (String, String);

#[derive(Default)]
pub struct Linker {
    by_email_year: DashMap<StudentKey, i64>,
    by_external_id_year: DashMap<StudentKey, i64>,
    by_establishment_external_id: DashMap<String, i64>,
}

impl Linker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Warm all three caches with a single scan of each table. Must run
    /// before any concurrent lookups begin (spec.md §5: "populated before
    /// concurrent work begins and extended monotonically").
    pub async fn warm(&self, pool: &PgPool) -> ApiResult<()> {
        let establishments =
            sqlx::query_as::<_, (String, i64)>("SELECT external_id, id FROM establishments")
                .fetch_all(pool)
                .await?;
        for (external_id, id) in establishments {
            self.by_establishment_external_id.insert(external_id, id);
        }

        let students = sqlx::query_as::<_, (String, String, String, i64)>(
            "SELECT email, external_id, academic_year, id FROM students",
        )
        .fetch_all(pool)
        .await?;
        for (email, external_id, academic_year, id) in students {
            self.by_email_year.insert((email, academic_year.clone()), id);
            self.by_external_id_year.insert((external_id, academic_year), id);
        }

        tracing::info!(
            "linker cache warmed: {} establishments, {} students",
            self.by_establishment_external_id.len(),
            self.by_email_year.len()
        );
        Ok(())
    }

    pub fn resolve_establishment(&self, external_id: &str) -> Option<i64> {
        self.by_establishment_external_id.get(external_id).map(|v| *v)
    }

    /// Primary matcher: email + academic_year is the authoritative key.
    pub fn resolve_student(&self, email: &str, academic_year: &str) -> Option<i64> {
        self.by_email_year.get(&(email.to_string(), academic_year.to_string())).map(|v| *v)
    }

    /// Fallback for records lacking email.
    pub fn resolve_student_by_external_id(
        &self,
        external_id: &str,
        academic_year: &str,
    ) -> Option<i64> {
        self.by_external_id_year
            .get(&(external_id.to_string(), academic_year.to_string()))
            .map(|v| *v)
    }

    /// Record a newly-inserted establishment so later lookups within the
    /// same run see it without a re-scan.
    pub fn record_establishment(&self, external_id: String, id: i64) {
        self.by_establishment_external_id.insert(external_id, id);
    }

    /// Record a newly-inserted (or re-upserted) student.
    pub fn record_student(&self, email: String, external_id: String, academic_year: String, id: i64) {
        self.by_email_year.insert((email, academic_year.clone()), id);
        self.by_external_id_year.insert((external_id, academic_year), id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_student_after_record() {
        let linker = Linker::new();
        linker.record_student(
            "alice@example.edu".into(),
            "ext-1".into(),
            "2024/2025".into(),
            7,
        );
        assert_eq!(linker.resolve_student("alice@example.edu", "2024/2025"), Some(7));
        assert_eq!(linker.resolve_student("alice@example.edu", "2025/2026"), None);
        assert_eq!(linker.resolve_student_by_external_id("ext-1", "2024/2025"), Some(7));
    }

    #[test]
    fn resolves_establishment_after_record() {
        let linker = Linker::new();
        linker.record_establishment("ext-school-1".into(), 3);
        assert_eq!(linker.resolve_establishment("ext-school-1"), Some(3));
        assert_eq!(linker.resolve_establishment("unknown"), None);
    }
}
