//! Statistics recomputation (spec.md §4.5).
//!
//! Mirrors the reference `DataStatisticsService`'s collect → compute →
//! truncate-and-insert shape, generalized from one cluster's cache row to
//! per-establishment/per-cycle/per-year scopes plus national rollups. The
//! whole recompute for a scope runs inside one transaction so a dashboard
//! reader never observes an empty gap between truncate and insert — on
//! failure the transaction rolls back and the prior (stale) rows survive.

use crate::models::statistics::Distribution;
use crate::models::vespa_score::VespaElement;
use crate::utils::error::ApiResult;
use sqlx::PgPool;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy)]
pub enum Scope {
    All,
    Establishment(i64),
    Year(String),
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AggregateCounts {
    pub school_rows: u64,
    pub question_rows: u64,
    pub national_rows: u64,
    pub national_question_rows: u64,
}

/// Arithmetic mean. Empty input is a programmer error upstream (every
/// group the aggregator computes over has `count >= 1` by construction).
pub fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation (divides by `n`, not `n - 1`) — matches
/// spec.md §4.5's "std dev (population)".
pub fn population_std_dev(values: &[f64], mean: f64) -> f64 {
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Linear-interpolation percentile over a pre-sorted slice (the common
/// "R-7" method): index `p * (n - 1)`, interpolating between neighbors.
pub fn percentile(sorted_values: &[f64], p: f64) -> f64 {
    if sorted_values.len() == 1 {
        return sorted_values[0];
    }
    let rank = p * (sorted_values.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        return sorted_values[lower];
    }
    let frac = rank - lower as f64;
    sorted_values[lower] + frac * (sorted_values[upper] - sorted_values[lower])
}

/// Histogram over integer buckets `min_bin..=max_bin`, rounding each value
/// to the nearest integer first (accommodates the non-integer `Overall`
/// element, per spec.md §4.5). Every bucket in range is present even when
/// empty so the distribution always sums exactly to `count`.
pub fn histogram(values: &[f64], min_bin: i64, max_bin: i64) -> Distribution {
    let mut dist: Distribution = (min_bin..=max_bin).map(|b| (b.to_string(), 0)).collect();
    for &v in values {
        let bucket = v.round() as i64;
        let bucket = bucket.clamp(min_bin, max_bin);
        *dist.entry(bucket.to_string()).or_insert(0) += 1;
    }
    dist
}

/// Most frequent value in a 1..5 Likert response set; ties broken toward
/// the lowest value for determinism.
pub fn mode_of_responses(values: &[i16]) -> i16 {
    let mut counts: BTreeMap<i16, u64> = BTreeMap::new();
    for &v in values {
        *counts.entry(v).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .max_by_key(|(value, count)| (*count, std::cmp::Reverse(*value)))
        .map(|(value, _)| value)
        .unwrap_or(0)
}

pub struct ComputedSchoolStat {
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
    pub distribution: Distribution,
}

/// Compute one `SchoolStatistics` row's numbers from raw element values
/// for one `(establishment, cycle, academic_year, element)` group.
pub fn compute_school_stat(
    establishment_id: i64,
    cycle: i16,
    academic_year: &str,
    element: VespaElement,
    mut values: Vec<f64>,
) -> ComputedSchoolStat {
    values.sort_by(|a, b| a.partial_cmp(b).expect("score values are never NaN"));
    let m = mean(&values);
    let sd = population_std_dev(&values, m);
    let (min_bin, max_bin) = if element == VespaElement::Overall { (0, 10) } else { (1, 10) };

    ComputedSchoolStat {
        establishment_id,
        cycle,
        academic_year: academic_year.to_string(),
        element,
        mean: m,
        std_dev: sd,
        count: values.len() as i64,
        percentile_25: percentile(&values, 0.25),
        percentile_50: percentile(&values, 0.50),
        percentile_75: percentile(&values, 0.75),
        distribution: histogram(&values, min_bin, max_bin),
    }
}

pub struct Aggregator {
    pool: PgPool,
}

impl Aggregator {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Recompute every statistics table within `scope`. Runs as one
    /// transaction: truncate, insert, verify — all committed together so
    /// a failed verify rolls back to the prior snapshot instead of
    /// leaving the dashboard reading empty tables.
    pub async fn recompute(&self, scope: Scope) -> ApiResult<AggregateCounts> {
        let mut tx = self.pool.begin().await?;

        let (establishment_filter, year_filter): (Option<i64>, Option<String>) = match &scope {
            Scope::All => (None, None),
            Scope::Establishment(id) => (Some(*id), None),
            Scope::Year(year) => (None, Some(year.clone())),
        };

        sqlx::query(
            "DELETE FROM school_statistics WHERE ($1::bigint IS NULL OR establishment_id = $1) AND ($2::text IS NULL OR academic_year = $2)",
        )
        .bind(establishment_filter)
        .bind(&year_filter)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "DELETE FROM question_statistics WHERE ($1::bigint IS NULL OR establishment_id = $1) AND ($2::text IS NULL OR academic_year = $2)",
        )
        .bind(establishment_filter)
        .bind(&year_filter)
        .execute(&mut *tx)
        .await?;
        if matches!(scope, Scope::All) {
            sqlx::query("DELETE FROM national_statistics").execute(&mut *tx).await?;
            sqlx::query("DELETE FROM national_question_statistics").execute(&mut *tx).await?;
        }

        // Group per-row values by (establishment_id, cycle, academic_year) and
        // compute per-element stats; this groups strictly by each row's own
        // `academic_year`, never today's date (spec.md §4.5 invariant).
        let score_rows: Vec<ScoreRow> = sqlx::query_as::<_, ScoreRow>(
            r#"
            SELECT s.establishment_id, vs.cycle, vs.academic_year,
                   vs.vision, vs.effort, vs.systems, vs.practice, vs.attitude, vs.overall
            FROM vespa_scores vs
            JOIN students s ON s.id = vs.student_id
            WHERE ($1::bigint IS NULL OR s.establishment_id = $1)
              AND ($2::text IS NULL OR vs.academic_year = $2)
            "#,
        )
        .bind(establishment_filter)
        .bind(&year_filter)
        .fetch_all(&mut *tx)
        .await?;

        let mut grouped: BTreeMap<(i64, i16, String), Vec<ScoreRow>> = BTreeMap::new();
        for row in score_rows {
            grouped.entry((row.establishment_id, row.cycle, row.academic_year.clone())).or_default().push(row);
        }

        let mut school_rows = 0u64;
        for ((establishment_id, cycle, academic_year), group) in &grouped {
            for element in VespaElement::ALL {
                let values: Vec<f64> = group.iter().map(|r| r.element_value(element)).collect();
                let stat = compute_school_stat(*establishment_id, *cycle, academic_year, element, values);
                insert_school_stat(&mut tx, &stat).await?;
                school_rows += 1;
            }
        }

        // National rollup aggregates the raw per-student population across
        // establishments, never the per-school means (spec.md §4.5 step 4).
        let mut national_rows = 0u64;
        if matches!(scope, Scope::All) {
            let mut national_grouped: BTreeMap<(i16, String), Vec<ScoreRow>> = BTreeMap::new();
            for group in grouped.values() {
                for row in group {
                    national_grouped.entry((row.cycle, row.academic_year.clone())).or_default().push(row.clone());
                }
            }
            for ((cycle, academic_year), group) in &national_grouped {
                for element in VespaElement::ALL {
                    let values: Vec<f64> = group.iter().map(|r| r.element_value(element)).collect();
                    let stat = compute_school_stat(0, *cycle, academic_year, element, values);
                    insert_national_stat(&mut tx, *cycle, academic_year, element, &stat).await?;
                    national_rows += 1;
                }
            }
        }

        let response_rows: Vec<ResponseRow> = sqlx::query_as::<_, ResponseRow>(
            r#"
            SELECT s.establishment_id, qr.question_id, qr.cycle, qr.academic_year, qr.response_value
            FROM question_responses qr
            JOIN students s ON s.id = qr.student_id
            WHERE ($1::bigint IS NULL OR s.establishment_id = $1)
              AND ($2::text IS NULL OR qr.academic_year = $2)
            "#,
        )
        .bind(establishment_filter)
        .bind(&year_filter)
        .fetch_all(&mut *tx)
        .await?;

        let mut q_grouped: BTreeMap<(i64, String, i16, String), Vec<i16>> = BTreeMap::new();
        for row in &response_rows {
            q_grouped
                .entry((row.establishment_id, row.question_id.clone(), row.cycle, row.academic_year.clone()))
                .or_default()
                .push(row.response_value);
        }

        let mut question_rows = 0u64;
        for ((establishment_id, question_id, cycle, academic_year), mut values) in q_grouped.clone() {
            values.sort_unstable();
            let float_values: Vec<f64> = values.iter().map(|&v| v as f64).collect();
            let m = mean(&float_values);
            let sd = population_std_dev(&float_values, m);
            let dist = histogram(&float_values, 1, 5);
            insert_question_stat(
                &mut tx,
                establishment_id,
                &question_id,
                cycle,
                &academic_year,
                m,
                sd,
                values.len() as i64,
                mode_of_responses(&values),
                &dist,
            )
            .await?;
            question_rows += 1;
        }

        let mut national_question_rows = 0u64;
        if matches!(scope, Scope::All) {
            let mut national_q_grouped: BTreeMap<(String, i16, String), Vec<i16>> = BTreeMap::new();
            for ((_, question_id, cycle, academic_year), values) in q_grouped {
                national_q_grouped.entry((question_id, cycle, academic_year)).or_default().extend(values);
            }
            for ((question_id, cycle, academic_year), mut values) in national_q_grouped {
                values.sort_unstable();
                let float_values: Vec<f64> = values.iter().map(|&v| v as f64).collect();
                let m = mean(&float_values);
                let sd = population_std_dev(&float_values, m);
                let dist = histogram(&float_values, 1, 5);
                insert_national_question_stat(
                    &mut tx,
                    &question_id,
                    cycle,
                    &academic_year,
                    m,
                    sd,
                    values.len() as i64,
                    mode_of_responses(&values),
                    &dist,
                )
                .await?;
                national_question_rows += 1;
            }
        }

        tx.commit().await?;

        Ok(AggregateCounts { school_rows, question_rows, national_rows, national_question_rows })
    }

    /// Read back the national per-cycle/per-element means just written by
    /// `recompute(Scope::All)`, keyed for `SourceCrmClient::write_national_averages`
    /// (spec.md §4.5 step 5 write-back, performed by the orchestrator after recompute).
    pub async fn national_means_by_year(
        &self,
        academic_year: &str,
    ) -> ApiResult<Vec<((i16, VespaElement), f64)>> {
        let rows: Vec<(i16, VespaElement, f64)> = sqlx::query_as(
            "SELECT cycle, element, mean FROM national_statistics WHERE academic_year = $1",
        )
        .bind(academic_year)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(cycle, element, mean)| ((cycle, element), mean)).collect())
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct ScoreRow {
    establishment_id: i64,
    cycle: i16,
    academic_year: String,
    vision: i16,
    effort: i16,
    systems: i16,
    practice: i16,
    attitude: i16,
    overall: f64,
}

impl ScoreRow {
    fn element_value(&self, element: VespaElement) -> f64 {
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

#[derive(Debug, Clone, sqlx::FromRow)]
struct ResponseRow {
    establishment_id: i64,
    question_id: String,
    cycle: i16,
    academic_year: String,
    response_value: i16,
}

async fn insert_school_stat(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    stat: &ComputedSchoolStat,
) -> ApiResult<()> {
    sqlx::query(
        r#"
        INSERT INTO school_statistics (
            establishment_id, cycle, academic_year, element,
            mean, std_dev, count, percentile_25, percentile_50, percentile_75, distribution
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(stat.establishment_id)
    .bind(stat.cycle)
    .bind(&stat.academic_year)
    .bind(stat.element)
    .bind(stat.mean)
    .bind(stat.std_dev)
    .bind(stat.count)
    .bind(stat.percentile_25)
    .bind(stat.percentile_50)
    .bind(stat.percentile_75)
    .bind(sqlx::types::Json(&stat.distribution))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn insert_national_stat(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    cycle: i16,
    academic_year: &str,
    element: VespaElement,
    stat: &ComputedSchoolStat,
) -> ApiResult<()> {
    sqlx::query(
        r#"
        INSERT INTO national_statistics (
            cycle, academic_year, element,
            mean, std_dev, count, percentile_25, percentile_50, percentile_75, distribution
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(cycle)
    .bind(academic_year)
    .bind(element)
    .bind(stat.mean)
    .bind(stat.std_dev)
    .bind(stat.count)
    .bind(stat.percentile_25)
    .bind(stat.percentile_50)
    .bind(stat.percentile_75)
    .bind(sqlx::types::Json(&stat.distribution))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn insert_question_stat(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    establishment_id: i64,
    question_id: &str,
    cycle: i16,
    academic_year: &str,
    mean: f64,
    std_dev: f64,
    count: i64,
    mode: i16,
    distribution: &Distribution,
) -> ApiResult<()> {
    sqlx::query(
        r#"
        INSERT INTO question_statistics (
            establishment_id, question_id, cycle, academic_year, mean, std_dev, count, mode, distribution
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(establishment_id)
    .bind(question_id)
    .bind(cycle)
    .bind(academic_year)
    .bind(mean)
    .bind(std_dev)
    .bind(count)
    .bind(mode)
    .bind(sqlx::types::Json(distribution))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn insert_national_question_stat(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    question_id: &str,
    cycle: i16,
    academic_year: &str,
    mean: f64,
    std_dev: f64,
    count: i64,
    mode: i16,
    distribution: &Distribution,
) -> ApiResult<()> {
    sqlx::query(
        r#"
        INSERT INTO national_question_statistics (
            question_id, cycle, academic_year, mean, std_dev, count, mode, distribution
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(question_id)
    .bind(cycle)
    .bind(academic_year)
    .bind(mean)
    .bind(std_dev)
    .bind(count)
    .bind(mode)
    .bind(sqlx::types::Json(distribution))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_and_population_std_dev() {
        let values = vec![2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let m = mean(&values);
        assert!((m - 5.0).abs() < 1e-9);
        let sd = population_std_dev(&values, m);
        assert!((sd - 2.0).abs() < 1e-9);
    }

    #[test]
    fn percentiles_are_non_decreasing() {
        let mut values: Vec<f64> = (1..=10).map(|v| v as f64).collect();
        values.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let p25 = percentile(&values, 0.25);
        let p50 = percentile(&values, 0.50);
        let p75 = percentile(&values, 0.75);
        assert!(p25 <= p50);
        assert!(p50 <= p75);
    }

    #[test]
    fn histogram_sums_to_count() {
        let values = vec![1.0, 1.0, 5.0, 10.0, 10.0, 10.0];
        let dist = histogram(&values, 1, 10);
        let total: u64 = dist.values().sum();
        assert_eq!(total, values.len() as u64);
        assert_eq!(dist.len(), 10);
    }

    #[test]
    fn histogram_rounds_overall_to_nearest_integer_and_includes_zero_bucket() {
        let values = vec![0.0, 4.4, 4.6];
        let dist = histogram(&values, 0, 10);
        assert_eq!(dist.len(), 11);
        assert_eq!(*dist.get("4").unwrap(), 1);
        assert_eq!(*dist.get("5").unwrap(), 1);
        assert_eq!(*dist.get("0").unwrap(), 1);
    }

    #[test]
    fn mode_breaks_ties_toward_lowest_value() {
        assert_eq!(mode_of_responses(&[1, 1, 5, 5, 3]), 1);
        assert_eq!(mode_of_responses(&[2, 2, 2, 3]), 2);
    }

    #[test]
    fn compute_school_stat_conserves_count_and_orders_percentiles() {
        let values: Vec<f64> = (1..=10).map(|v| v as f64).collect();
        let stat = compute_school_stat(1, 1, "2024/2025", VespaElement::Vision, values.clone());
        assert_eq!(stat.count, values.len() as i64);
        assert!(stat.percentile_25 <= stat.percentile_50);
        assert!(stat.percentile_50 <= stat.percentile_75);
        let total: u64 = stat.distribution.values().sum();
        assert_eq!(total, values.len() as u64);
    }
}
