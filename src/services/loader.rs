//! Batched, idempotent upsert into the warehouse (spec.md §4.4).
//!
//! Each entity gets its own upsert method because the conflict key and
//! column list are entity-specific and must match the warehouse's unique
//! constraint exactly — mismatches here are "the single most common
//! source of historical data loss" per the design, so the key is spelled
//! out in the SQL rather than threaded through generically. Each method
//! follows the same shape: dedup within the batch keeping the last
//! occurrence per conflict key (`vec_to_map`), chunk to `batch_size`, then
//! halve-and-retry on failure down to single rows, which are recorded as
//! skips rather than aborting the whole batch.

use crate::models::{Establishment, QuestionResponse, Student, VespaScore};
use crate::utils::collection_ext::vec_to_map;
use crate::utils::error::ApiResult;
use sqlx::PgPool;

#[derive(Debug, Default, Clone, Copy)]
pub struct BatchResult {
    pub inserted: u64,
    pub updated: u64,
    pub skipped: u64,
}

impl std::ops::AddAssign for BatchResult {
    fn add_assign(&mut self, other: Self) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.skipped += other.skipped;
    }
}

fn split_half<T>(mut rows: Vec<T>) -> (Vec<T>, Vec<T>) {
    let mid = rows.len() / 2;
    let right = rows.split_off(mid);
    (rows, right)
}

pub struct Loader {
    pool: PgPool,
}

impl Loader {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn upsert_establishment_row(pool: &PgPool, row: &Establishment) -> sqlx::Result<bool> {
        sqlx::query_scalar::<_, bool>(
            r#"
            INSERT INTO establishments (external_id, name, trust, is_australian, use_standard_year)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (external_id) DO UPDATE SET
                name = excluded.name,
                trust = excluded.trust,
                is_australian = excluded.is_australian,
                use_standard_year = excluded.use_standard_year
            RETURNING (xmax = 0)
            "#,
        )
        .bind(&row.external_id)
        .bind(&row.name)
        .bind(&row.trust)
        .bind(row.is_australian)
        .bind(row.use_standard_year)
        .fetch_one(pool)
        .await
    }

    fn upsert_establishments_halving<'a>(
        &'a self,
        rows: Vec<Establishment>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ApiResult<BatchResult>> + Send + 'a>>
    {
        Box::pin(async move {
            let mut inserted = 0u64;
            let mut updated = 0u64;
            let mut failed = false;
            for row in &rows {
                match Self::upsert_establishment_row(&self.pool, row).await {
                    Ok(true) => inserted += 1,
                    Ok(false) => updated += 1,
                    Err(e) => {
                        tracing::warn!("establishment batch row failed: {e}");
                        failed = true;
                        break;
                    },
                }
            }
            if !failed {
                return Ok(BatchResult { inserted, updated, skipped: 0 });
            }
            if rows.len() == 1 {
                tracing::warn!("skipping unloadable establishment row after retry");
                return Ok(BatchResult { skipped: 1, ..Default::default() });
            }
            let (left, right) = split_half(rows);
            let mut total = self.upsert_establishments_halving(left).await?;
            total += self.upsert_establishments_halving(right).await?;
            Ok(total)
        })
    }

    pub async fn upsert_establishments(
        &self,
        rows: Vec<Establishment>,
        batch_size: usize,
    ) -> ApiResult<BatchResult> {
        let deduped = vec_to_map(rows, |r| r.external_id.clone());
        let rows: Vec<_> = deduped.into_values().collect();

        let mut total = BatchResult::default();
        for chunk in rows.chunks(batch_size.max(1)) {
            total += self.upsert_establishments_halving(chunk.to_vec()).await?;
        }
        Ok(total)
    }

    async fn upsert_student_row(pool: &PgPool, row: &Student) -> sqlx::Result<bool> {
        sqlx::query_scalar::<_, bool>(
            r#"
            INSERT INTO students (
                external_id, email, academic_year, name, establishment_id,
                year_group, course, faculty, student_group
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (email, academic_year) DO UPDATE SET
                external_id = excluded.external_id,
                name = excluded.name,
                establishment_id = excluded.establishment_id,
                year_group = excluded.year_group,
                course = excluded.course,
                faculty = excluded.faculty,
                student_group = excluded.student_group
            RETURNING (xmax = 0)
            "#,
        )
        .bind(&row.external_id)
        .bind(&row.email)
        .bind(&row.academic_year)
        .bind(&row.name)
        .bind(row.establishment_id)
        .bind(&row.year_group)
        .bind(&row.course)
        .bind(&row.faculty)
        .bind(&row.student_group)
        .fetch_one(pool)
        .await
    }

    fn upsert_students_halving<'a>(
        &'a self,
        rows: Vec<Student>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ApiResult<BatchResult>> + Send + 'a>>
    {
        Box::pin(async move {
            let mut inserted = 0u64;
            let mut updated = 0u64;
            let mut failed = false;
            for row in &rows {
                match Self::upsert_student_row(&self.pool, row).await {
                    Ok(true) => inserted += 1,
                    Ok(false) => updated += 1,
                    Err(e) => {
                        tracing::warn!("student batch row failed: {e}");
                        failed = true;
                        break;
                    },
                }
            }
            if !failed {
                return Ok(BatchResult { inserted, updated, skipped: 0 });
            }
            if rows.len() == 1 {
                tracing::warn!("skipping unloadable student row after retry");
                return Ok(BatchResult { skipped: 1, ..Default::default() });
            }
            let (left, right) = split_half(rows);
            let mut total = self.upsert_students_halving(left).await?;
            total += self.upsert_students_halving(right).await?;
            Ok(total)
        })
    }

    pub async fn upsert_students(&self, rows: Vec<Student>, batch_size: usize) -> ApiResult<BatchResult> {
        let deduped = vec_to_map(rows, |r| (r.email.clone(), r.academic_year.clone()));
        let rows: Vec<_> = deduped.into_values().collect();

        let mut total = BatchResult::default();
        for chunk in rows.chunks(batch_size.max(1)) {
            total += self.upsert_students_halving(chunk.to_vec()).await?;
        }
        Ok(total)
    }

    async fn upsert_vespa_score_row(pool: &PgPool, row: &VespaScore) -> sqlx::Result<bool> {
        sqlx::query_scalar::<_, bool>(
            r#"
            INSERT INTO vespa_scores (
                student_id, cycle, vision, effort, systems, practice, attitude,
                overall, completion_date, created_date, academic_year
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (student_id, cycle, academic_year) DO UPDATE SET
                vision = excluded.vision,
                effort = excluded.effort,
                systems = excluded.systems,
                practice = excluded.practice,
                attitude = excluded.attitude,
                overall = excluded.overall,
                completion_date = excluded.completion_date,
                created_date = excluded.created_date
            RETURNING (xmax = 0)
            "#,
        )
        .bind(row.student_id)
        .bind(row.cycle)
        .bind(row.vision)
        .bind(row.effort)
        .bind(row.systems)
        .bind(row.practice)
        .bind(row.attitude)
        .bind(row.overall)
        .bind(row.completion_date)
        .bind(row.created_date)
        .bind(&row.academic_year)
        .fetch_one(pool)
        .await
    }

    fn upsert_vespa_scores_halving<'a>(
        &'a self,
        rows: Vec<VespaScore>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ApiResult<BatchResult>> + Send + 'a>>
    {
        Box::pin(async move {
            let mut inserted = 0u64;
            let mut updated = 0u64;
            let mut failed = false;
            for row in &rows {
                match Self::upsert_vespa_score_row(&self.pool, row).await {
                    Ok(true) => inserted += 1,
                    Ok(false) => updated += 1,
                    Err(e) => {
                        tracing::warn!("vespa_score batch row failed: {e}");
                        failed = true;
                        break;
                    },
                }
            }
            if !failed {
                return Ok(BatchResult { inserted, updated, skipped: 0 });
            }
            if rows.len() == 1 {
                tracing::warn!("skipping unloadable vespa_score row after retry");
                return Ok(BatchResult { skipped: 1, ..Default::default() });
            }
            let (left, right) = split_half(rows);
            let mut total = self.upsert_vespa_scores_halving(left).await?;
            total += self.upsert_vespa_scores_halving(right).await?;
            Ok(total)
        })
    }

    pub async fn upsert_vespa_scores(
        &self,
        rows: Vec<VespaScore>,
        batch_size: usize,
    ) -> ApiResult<BatchResult> {
        let deduped = vec_to_map(rows, |r| (r.student_id, r.cycle, r.academic_year.clone()));
        let rows: Vec<_> = deduped.into_values().collect();

        let mut total = BatchResult::default();
        for chunk in rows.chunks(batch_size.max(1)) {
            total += self.upsert_vespa_scores_halving(chunk.to_vec()).await?;
        }
        Ok(total)
    }

    async fn upsert_question_response_row(pool: &PgPool, row: &QuestionResponse) -> sqlx::Result<bool> {
        sqlx::query_scalar::<_, bool>(
            r#"
            INSERT INTO question_responses (
                student_id, cycle, question_id, response_value, academic_year
            ) VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (student_id, cycle, academic_year, question_id) DO UPDATE SET
                response_value = excluded.response_value
            RETURNING (xmax = 0)
            "#,
        )
        .bind(row.student_id)
        .bind(row.cycle)
        .bind(&row.question_id)
        .bind(row.response_value)
        .bind(&row.academic_year)
        .fetch_one(pool)
        .await
    }

    fn upsert_question_responses_halving<'a>(
        &'a self,
        rows: Vec<QuestionResponse>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ApiResult<BatchResult>> + Send + 'a>>
    {
        Box::pin(async move {
            let mut inserted = 0u64;
            let mut updated = 0u64;
            let mut failed = false;
            for row in &rows {
                match Self::upsert_question_response_row(&self.pool, row).await {
                    Ok(true) => inserted += 1,
                    Ok(false) => updated += 1,
                    Err(e) => {
                        tracing::warn!("question_response batch row failed: {e}");
                        failed = true;
                        break;
                    },
                }
            }
            if !failed {
                return Ok(BatchResult { inserted, updated, skipped: 0 });
            }
            if rows.len() == 1 {
                tracing::warn!("skipping unloadable question_response row after retry");
                return Ok(BatchResult { skipped: 1, ..Default::default() });
            }
            let (left, right) = split_half(rows);
            let mut total = self.upsert_question_responses_halving(left).await?;
            total += self.upsert_question_responses_halving(right).await?;
            Ok(total)
        })
    }

    pub async fn upsert_question_responses(
        &self,
        rows: Vec<QuestionResponse>,
        batch_size: usize,
    ) -> ApiResult<BatchResult> {
        let deduped = vec_to_map(rows, |r| {
            (r.student_id, r.cycle, r.academic_year.clone(), r.question_id.clone())
        });
        let rows: Vec<_> = deduped.into_values().collect();

        let mut total = BatchResult::default();
        for chunk in rows.chunks(batch_size.max(1)) {
            total += self.upsert_question_responses_halving(chunk.to_vec()).await?;
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn student(email: &str, year: &str) -> Student {
        Student {
            id: 0,
            external_id: "ext".into(),
            email: email.into(),
            academic_year: year.into(),
            name: "Name".into(),
            establishment_id: 1,
            year_group: None,
            course: None,
            faculty: None,
            student_group: None,
        }
    }

    #[test]
    fn within_batch_dedup_keeps_last_occurrence() {
        let mut rows: Vec<Student> =
            (0..499).map(|i| student(&format!("s{i}@ex.edu"), "2024/2025")).collect();
        rows[0].name = "original".into();
        let mut dup = student("s0@ex.edu", "2024/2025");
        dup.name = "winner".into();
        rows.push(dup);

        let deduped = vec_to_map(rows, |r| (r.email.clone(), r.academic_year.clone()));
        assert_eq!(deduped.len(), 499);
        assert_eq!(
            deduped.get(&("s0@ex.edu".to_string(), "2024/2025".to_string())).unwrap().name,
            "winner"
        );
    }

    #[test]
    fn conflict_key_never_crosses_academic_year() {
        let rows = vec![student("same@ex.edu", "2024/2025"), student("same@ex.edu", "2025/2026")];
        let deduped = vec_to_map(rows, |r| (r.email.clone(), r.academic_year.clone()));
        assert_eq!(deduped.len(), 2);
    }

    #[test]
    fn split_half_covers_all_rows_without_overlap() {
        let rows: Vec<i32> = (0..7).collect();
        let (left, right) = split_half(rows);
        assert_eq!(left.len() + right.len(), 7);
        assert_eq!(left, vec![0, 1, 2]);
        assert_eq!(right, vec![3, 4, 5, 6]);
    }
}
