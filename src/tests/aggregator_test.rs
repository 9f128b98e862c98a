//! Scenario E (aggregate conservation) and the national-rollup invariant,
//! spec.md §4.5 step 4 / §8.

use sqlx::PgPool;

use crate::models::UseStandardYear;
use crate::services::aggregator::{Aggregator, Scope};
use crate::tests::common::{seed_establishment, seed_student, seed_uniform_score};

/// National per-element stats must be computed from the raw per-student
/// population, never from an average of per-school means — otherwise a
/// small school's mean counts as much as a large school's, which would
/// silently bias the national figure (Simpson's-paradox-shaped bug).
#[sqlx::test]
async fn national_mean_is_population_weighted_not_school_averaged(pool: PgPool) {
    let small_school = seed_establishment(&pool, "small-school", UseStandardYear::Yes).await;
    let large_school = seed_establishment(&pool, "large-school", UseStandardYear::Yes).await;

    // One student scoring 2, at a school of one.
    let s1 = seed_student(&pool, small_school, "s1", "s1@example.com", "2024/2025").await;
    seed_uniform_score(&pool, s1, 1, "2024/2025", 2).await;

    // Three students scoring 8 each, at a school of three.
    for (i, email) in ["l1@example.com", "l2@example.com", "l3@example.com"].iter().enumerate() {
        let sid = seed_student(&pool, large_school, &format!("l{i}"), email, "2024/2025").await;
        seed_uniform_score(&pool, sid, 1, "2024/2025", 8).await;
    }

    let aggregator = Aggregator::new(pool.clone());
    aggregator.recompute(Scope::All).await.expect("recompute");

    // Average of school means would be (2 + 8) / 2 = 5. The population
    // mean across all four students is (2 + 8 + 8 + 8) / 4 = 6.5.
    let national_mean: f64 = sqlx::query_scalar(
        "SELECT mean FROM national_statistics WHERE cycle = 1 AND academic_year = '2024/2025' AND element = 'vision'",
    )
    .fetch_one(&pool)
    .await
    .expect("fetch national mean");

    assert!(
        (national_mean - 6.5).abs() < 1e-9,
        "expected population-weighted mean 6.5, got {national_mean}"
    );
}

/// Scores are grouped by each row's own `academic_year`, never by today's
/// date — two years' worth of scores for the same establishment and cycle
/// must never be pooled into one statistics row.
#[sqlx::test]
async fn school_statistics_group_strictly_by_each_row_own_academic_year(pool: PgPool) {
    let establishment_id = seed_establishment(&pool, "multi-year-school", UseStandardYear::Yes).await;

    let s1 = seed_student(&pool, establishment_id, "s1", "s1@example.com", "2023/2024").await;
    seed_uniform_score(&pool, s1, 1, "2023/2024", 4).await;

    let s2 = seed_student(&pool, establishment_id, "s2", "s2@example.com", "2024/2025").await;
    seed_uniform_score(&pool, s2, 1, "2024/2025", 9).await;

    let aggregator = Aggregator::new(pool.clone());
    let counts = aggregator.recompute(Scope::All).await.expect("recompute");
    assert_eq!(counts.school_rows, 12, "2 years x 6 elements = 12 distinct school_statistics rows");

    let mean_2023: f64 = sqlx::query_scalar(
        "SELECT mean FROM school_statistics WHERE establishment_id = $1 AND cycle = 1 AND academic_year = '2023/2024' AND element = 'vision'",
    )
    .bind(establishment_id)
    .fetch_one(&pool)
    .await
    .expect("fetch 2023 mean");
    assert!((mean_2023 - 4.0).abs() < 1e-9);

    let mean_2024: f64 = sqlx::query_scalar(
        "SELECT mean FROM school_statistics WHERE establishment_id = $1 AND cycle = 1 AND academic_year = '2024/2025' AND element = 'vision'",
    )
    .bind(establishment_id)
    .fetch_one(&pool)
    .await
    .expect("fetch 2024 mean");
    assert!((mean_2024 - 9.0).abs() < 1e-9);
}

/// `recompute` truncates-then-inserts inside one transaction: rerunning it
/// with the same data must leave the same row count, not accumulate rows.
#[sqlx::test]
async fn recompute_is_repeatable_without_accumulating_rows(pool: PgPool) {
    let establishment_id = seed_establishment(&pool, "repeat-school", UseStandardYear::Yes).await;
    let student_id = seed_student(&pool, establishment_id, "s1", "s1@example.com", "2024/2025").await;
    seed_uniform_score(&pool, student_id, 1, "2024/2025", 6).await;

    let aggregator = Aggregator::new(pool.clone());
    aggregator.recompute(Scope::All).await.expect("first recompute");
    aggregator.recompute(Scope::All).await.expect("second recompute");

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM school_statistics WHERE establishment_id = $1")
        .bind(establishment_id)
        .fetch_one(&pool)
        .await
        .expect("count school_statistics");
    assert_eq!(count, 6, "one recompute's worth of rows (6 elements), not two");
}
